//! Template extractor: turns a captured image into a matchable template.
//!
//! Extraction is tried in a fixed order and stops at the first non-empty
//! result:
//!
//! 1. The driver's extractor with the image alone
//! 2. The same extractor with each configured format code
//! 3. The nested (inner service) extractor, in the same two steps
//!
//! A `None` result is an extraction failure, reported separately from a
//! capture that produced nothing.

use crate::capture::blocking;
use biolink_core::DebugTrace;
use biolink_core::constants::EXTRACT_FORMAT_CODES;
use biolink_hardware::{AnyDriver, Extractable, SensorDriver};
use std::sync::Arc;
use tracing::debug;

/// Runs the extraction fallback chain.
///
/// # Examples
///
/// ```
/// use biolink_core::DebugTrace;
/// use biolink_engine::extractor::TemplateExtractor;
/// use biolink_hardware::mock::MockSensor;
///
/// let (sensor, handle) = MockSensor::new();
/// handle.set_extract_result(Some(1), vec![0x5A; 480]);
///
/// let mut trace = DebugTrace::new();
/// let template = TemplateExtractor::new().extract(&sensor, &[0; 4096], &mut trace);
///
/// assert_eq!(template, Some(vec![0x5A; 480]));
/// assert_eq!(handle.extract_calls(), 3); // none, format 0, format 1
/// ```
#[derive(Debug, Clone)]
pub struct TemplateExtractor {
    formats: Vec<i64>,
}

impl TemplateExtractor {
    pub fn new() -> Self {
        Self {
            formats: EXTRACT_FORMAT_CODES.to_vec(),
        }
    }

    /// Override the format codes tried after the plain call.
    pub fn with_formats(mut self, formats: Vec<i64>) -> Self {
        self.formats = formats;
        self
    }

    /// Run the chain against `extractor`. Blocking.
    pub fn extract(
        &self,
        extractor: &dyn Extractable,
        image: &[u8],
        trace: &mut DebugTrace,
    ) -> Option<Vec<u8>> {
        if let Some(template) = self.extract_with(extractor, "Service", image, trace) {
            return Some(template);
        }

        match extractor.nested_extractor() {
            Some(nested) => self.extract_with(nested.as_ref(), "Inner service", image, trace),
            None => {
                trace.push("No inner extractor available");
                None
            }
        }
    }

    fn extract_with(
        &self,
        extractor: &dyn Extractable,
        label: &str,
        image: &[u8],
        trace: &mut DebugTrace,
    ) -> Option<Vec<u8>> {
        let formats = std::iter::once(None).chain(self.formats.iter().copied().map(Some));
        for format in formats {
            match extractor.extract(image, format) {
                Ok(Some(template)) if !template.is_empty() => {
                    trace.push(format!(
                        "{label} extracted {} bytes (format {})",
                        template.len(),
                        format.map_or_else(|| "none".to_string(), |f| f.to_string())
                    ));
                    return Some(template);
                }
                Ok(_) => debug!("{} extract with format {:?} returned nothing", label, format),
                Err(e) => {
                    trace.push(format!("{label} extract failed: {e}"));
                    // A missing entry point will not appear for another format.
                    if matches!(e, biolink_hardware::HardwareError::Unsupported { .. }) {
                        return None;
                    }
                }
            }
        }
        None
    }

    /// Run the chain against an open driver on the blocking pool.
    pub async fn extract_from_driver(
        &self,
        driver: Arc<AnyDriver>,
        image: Vec<u8>,
        trace: &mut DebugTrace,
    ) -> Option<Vec<u8>> {
        let chain = self.clone();
        let outcome = blocking(move || {
            let mut local = DebugTrace::new();
            let template = chain.extract(driver.as_ref(), &image, &mut local);
            local.extend(driver.drain_journal());
            (template, local)
        })
        .await;

        match outcome {
            Ok((template, local)) => {
                trace.extend(local);
                template
            }
            Err(e) => {
                trace.push(format!("Extraction task failed: {e}"));
                None
            }
        }
    }
}

impl Default for TemplateExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use biolink_hardware::mock::MockSensor;

    #[test]
    fn test_plain_call_first() {
        let (sensor, handle) = MockSensor::new();
        handle.set_extract_result(None, vec![1; 300]);

        let mut trace = DebugTrace::new();
        let template = TemplateExtractor::new().extract(&sensor, &[0; 4096], &mut trace);

        assert_eq!(template, Some(vec![1; 300]));
        assert_eq!(handle.extract_calls(), 1);
        assert!(trace.contains("format none"));
    }

    #[test]
    fn test_nested_extractor_used_last() {
        let (sensor, handle) = MockSensor::new();
        let (inner, inner_handle) = MockSensor::with_name("Inner");
        inner_handle.set_extract_result(Some(256), vec![2; 400]);
        handle.set_nested_extractor(Arc::new(inner));

        let mut trace = DebugTrace::new();
        let template = TemplateExtractor::new().extract(&sensor, &[0; 4096], &mut trace);

        assert_eq!(template, Some(vec![2; 400]));
        assert_eq!(handle.extract_calls(), 4);
        assert_eq!(inner_handle.extract_calls(), 4);
        assert!(trace.contains("Inner service extracted 400 bytes (format 256)"));
    }

    #[test]
    fn test_unsupported_skips_to_nested() {
        let (sensor, handle) = MockSensor::new();
        handle.set_extract_unsupported(true);

        let mut trace = DebugTrace::new();
        let template = TemplateExtractor::new().extract(&sensor, &[0; 4096], &mut trace);

        assert_eq!(template, None);
        assert_eq!(handle.extract_calls(), 1);
        assert!(trace.contains("No inner extractor available"));
    }

    #[test]
    fn test_empty_templates_are_not_success() {
        let (sensor, handle) = MockSensor::new();
        handle.set_extract_result(None, Vec::new());
        handle.set_extract_result(Some(0), vec![8; 16]);

        let mut trace = DebugTrace::new();
        let template = TemplateExtractor::new().extract(&sensor, &[0; 4096], &mut trace);
        assert_eq!(template, Some(vec![8; 16]));
    }

    #[tokio::test]
    async fn test_extract_from_driver() {
        let (sensor, handle) = MockSensor::new();
        handle.set_extract_result(Some(0), vec![6; 64]);

        let mut trace = DebugTrace::new();
        let template = TemplateExtractor::new()
            .extract_from_driver(Arc::new(AnyDriver::Mock(sensor)), vec![0; 4096], &mut trace)
            .await;

        assert_eq!(template, Some(vec![6; 64]));
    }
}
