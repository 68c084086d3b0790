#[cfg(test)]
mod observability_tests {
    use metrics::{counter, histogram};
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tracing::info;
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    #[test]
    fn test_metrics_recording_without_recorder() {
        // With no global recorder installed these are no-ops and must not panic.
        counter!("analysis_requests_total").increment(1);
        histogram!("inference_duration_seconds").record(0.12);
        counter!("upload_rejected_total").increment(1);
    }

    #[test]
    fn test_prometheus_metrics_collection() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            counter!("analysis_requests_total").increment(3);
            counter!("hemorrhage_detected_total").increment(1);
            histogram!("inference_duration_seconds").record(0.25);
        });

        let output = handle.render();
        assert!(output.contains("analysis_requests_total 3"));
        assert!(output.contains("hemorrhage_detected_total 1"));
        assert!(output.contains("inference_duration_seconds"));
    }

    #[test]
    fn test_tracing_setup() {
        let result = tracing_subscriber::registry()
            .with(EnvFilter::try_new("info").unwrap_or_else(|_| EnvFilter::new("error")))
            .with(tracing_subscriber::fmt::layer().with_test_writer())
            .try_init();

        // Another test may already own the global subscriber.
        if result.is_ok() {
            info!("tracing initialized for test");
        }
    }
}
