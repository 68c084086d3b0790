use image::Rgb;
use serde::Serialize;

/// Hemorrhage categories, in the order of the stage-2 logits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Subtype {
    Intraventricular,
    Intraparenchymal,
    Subarachnoid,
    Epidural,
    Subdural,
    #[serde(rename = "Skull Fracture")]
    SkullFracture,
}

impl Subtype {
    pub const ALL: [Subtype; 6] = [
        Subtype::Intraventricular,
        Subtype::Intraparenchymal,
        Subtype::Subarachnoid,
        Subtype::Epidural,
        Subtype::Subdural,
        Subtype::SkullFracture,
    ];

    pub fn from_index(index: usize) -> Option<Subtype> {
        Self::ALL.get(index).copied()
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Subtype::Intraventricular => "Intraventricular",
            Subtype::Intraparenchymal => "Intraparenchymal",
            Subtype::Subarachnoid => "Subarachnoid",
            Subtype::Epidural => "Epidural",
            Subtype::Subdural => "Subdural",
            Subtype::SkullFracture => "Skull Fracture",
        }
    }

    /// Name with spaces replaced, for generated file names.
    pub fn file_stem(&self) -> String {
        self.name().replace(' ', "_")
    }

    /// Detection threshold for this subtype.
    pub fn threshold(&self) -> f64 {
        super::SUBTYPE_THRESHOLD
    }

    /// Box color in explanation overlays.
    pub fn color(&self) -> Rgb<u8> {
        match self {
            Subtype::Intraventricular => Rgb([255, 0, 0]),
            Subtype::Intraparenchymal => Rgb([0, 255, 0]),
            Subtype::Subarachnoid => Rgb([0, 0, 255]),
            Subtype::Epidural => Rgb([255, 255, 0]),
            Subtype::Subdural => Rgb([255, 0, 255]),
            Subtype::SkullFracture => Rgb([0, 255, 255]),
        }
    }
}

impl std::fmt::Display for Subtype {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
