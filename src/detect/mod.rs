mod backend;
mod backends;
pub mod prep;
mod result;

use anyhow::Result;

use crate::config::DetectorSettings;

pub use backend::Detector;
pub use backends::StubDetector;
#[cfg(feature = "backend-tract")]
pub use backends::TractDetector;
pub use result::{BoundingBox, FrameCounts, RoiStatus};

/// Build and warm up the configured detector.
///
/// Any failure here is an initialization error for the pipeline.
pub fn build_detector(settings: &DetectorSettings) -> Result<Box<dyn Detector>> {
    let mut detector: Box<dyn Detector> = match settings.backend.as_str() {
        "stub" => Box::new(StubDetector::new()),
        #[cfg(feature = "backend-tract")]
        "tract" => {
            let weights = settings
                .weights
                .as_ref()
                .ok_or_else(|| anyhow::anyhow!("detector backend 'tract' needs weights"))?;
            Box::new(TractDetector::new(weights, settings.img_size)?)
        }
        #[cfg(not(feature = "backend-tract"))]
        "tract" => anyhow::bail!("detector backend 'tract' requires the backend-tract feature"),
        other => anyhow::bail!("unknown detector backend '{}'", other),
    };
    detector.warm_up()?;
    log::info!("detector backend '{}' ready", detector.name());
    Ok(detector)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_backend_is_rejected() {
        let settings = DetectorSettings {
            backend: "yolo9000".to_string(),
            ..DetectorSettings::default()
        };
        assert!(build_detector(&settings).is_err());
    }

    #[test]
    fn stub_backend_builds() -> Result<()> {
        let detector = build_detector(&DetectorSettings::default())?;
        assert_eq!(detector.name(), "stub");
        Ok(())
    }
}
