#[cfg(test)]
mod end_to_end_tests {
    use crate::{
        config::{AppConfig, ModelRole},
        error::InferenceError,
        explain::explain_subtypes,
        model::{loader, registry::ModelRegistry},
        pipeline::{
            format::{format_for_display, NO_SUBTYPE_NOTE},
            testing::{FixedClassifier, FixedDetector},
            Subtype, TwoStagePipeline,
        },
        preprocessing,
    };
    use image::{ImageFormat, Rgb, RgbImage};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn scan_on_disk(dir: &std::path::Path) -> std::path::PathBuf {
        let img = RgbImage::from_fn(96, 96, |x, y| Rgb([(x + y) as u8, 40, 40]));
        let path = dir.join("scan.png");
        img.save_with_format(&path, ImageFormat::Png).unwrap();
        path
    }

    fn pipeline(detector: f32, classifier: [f32; 6]) -> TwoStagePipeline {
        let registry = ModelRegistry::new();
        registry.register(ModelRole::Detector, Arc::new(FixedDetector::new(detector)));
        registry.register(
            ModelRole::SubtypeClassifier,
            Arc::new(FixedClassifier::new(classifier)),
        );
        TwoStagePipeline::from_registry(&registry, &[]).unwrap()
    }

    #[test]
    fn test_full_system_flow() {
        // file -> preprocessing -> both stages -> formatting -> explanations on disk
        let dir = tempdir().unwrap();
        let bytes = std::fs::read(scan_on_disk(dir.path())).unwrap();
        let prepared = preprocessing::image::process_bytes(&bytes).unwrap();
        assert_eq!(prepared.tensor.shape(), &[1, 3, 224, 224]);

        let result = pipeline(0.93, [0.1, 0.1, 0.75, 0.1, 0.6, 0.1])
            .run(prepared)
            .unwrap();
        let display = format_for_display(&result);

        assert!(display.hemorrhage_detected);
        assert_eq!(display.detection_probability, "93.00%");
        assert_eq!(display.detection_confidence, "High");
        let names: Vec<_> = display.subtypes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["Subarachnoid", "Subdural"]);

        let explanations = explain_subtypes(
            result.activations.as_ref().unwrap(),
            &result.original,
            result.detected_subtypes(),
        )
        .unwrap();
        assert_eq!(explanations.len(), 2);
        assert_eq!(explanations[0].subtype, Subtype::Subarachnoid);

        for explanation in &explanations {
            assert_eq!(explanation.overlay.dimensions(), (96, 96));
            let path = explanation.save(dir.path(), "abc").unwrap();
            assert!(path.exists());
        }
        assert!(dir.path().join("abc_Subdural_gradcam.png").exists());
    }

    #[test]
    fn test_positive_without_subtypes() {
        let prepared = preprocessing::image::process_bytes(&png(32, 32)).unwrap();
        let result = pipeline(0.55, [0.2; 6]).run(prepared).unwrap();
        let display = format_for_display(&result);

        assert!(display.hemorrhage_detected);
        assert_eq!(display.detection_confidence, "Low");
        assert!(display.subtypes.is_empty());
        assert_eq!(display.note.as_deref(), Some(NO_SUBTYPE_NOTE));
    }

    #[test]
    fn test_threshold_boundary_is_positive() {
        let prepared = preprocessing::image::process_bytes(&png(32, 32)).unwrap();
        let result = pipeline(0.5, [0.0; 6]).run(prepared).unwrap();
        assert!(result.stage1.has_hemorrhage);
        assert!(result.stage2.is_some());
    }

    #[test]
    fn test_grayscale_input_is_accepted() {
        let gray = image::GrayImage::from_pixel(40, 30, image::Luma([128]));
        let mut bytes = Vec::new();
        gray.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();

        let prepared = preprocessing::image::process_bytes(&bytes).unwrap();
        assert_eq!(prepared.original.dimensions(), (40, 30));
        assert_eq!(prepared.tensor.shape(), &[1, 3, 224, 224]);
    }

    #[test]
    fn test_startup_with_missing_model_files() {
        // Config parsing and model loading as done at startup: missing files
        // leave the registry not ready with the reason recorded per role.
        let config = AppConfig::from_yaml(
            r#"
models:
  - role: detector
    name: "Hemorrhage Detector"
    path: "does/not/exist/stage1.onnx"
  - role: subtype_classifier
    name: "Subtype Classifier"
    path: "does/not/exist/stage2.onnx"
"#,
        )
        .unwrap();

        let registry = ModelRegistry::new();
        loader::load_all(&config.models, &registry);

        assert!(!registry.is_ready());
        let failures = registry.failures();
        assert_eq!(failures.len(), 2);
        assert!(matches!(
            TwoStagePipeline::from_registry(&registry, &config.models),
            Err(InferenceError::ModelsNotLoaded)
        ));
    }

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::new(width, height);
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }
}
