// THEORY:
// A page check answers "what changed on this page since the baseline?" for one
// device form factor. It captures the page at the device's viewport, scores the
// change in the page text, and runs the image comparison against the baseline
// capture when one is supplied. Everything the check stores (the fresh capture,
// the difference visualization, the region crops) lands in one session.
//
// Capturing is someone else's job: a browser driver, a screenshot service, or fixed
// bytes in a test all sit behind `PageCapture`. The image comparison is CPU-bound
// and runs on tokio's blocking pool.

use crate::core_modules::artifacts::{ArtifactRef, encode_png};
use crate::core_modules::session::SessionKey;
use crate::core_modules::text_delta::text_change_percentage;
use crate::error::{CompareError, PageCheckError};
use crate::pipeline::{ComparisonPipeline, ImageReport, NO_BASELINE_PERCENT, decode};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Desktop,
    Mobile,
    Tablet,
}

impl DeviceType {
    pub const ALL: [DeviceType; 3] = [DeviceType::Desktop, DeviceType::Mobile, DeviceType::Tablet];

    pub fn viewport(self) -> Viewport {
        match self {
            DeviceType::Desktop => Viewport { width: 1920, height: 1080 },
            DeviceType::Mobile => Viewport { width: 414, height: 736 },
            DeviceType::Tablet => Viewport { width: 800, height: 1280 },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DeviceType::Desktop => "desktop",
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
        }
    }
}

impl FromStr for DeviceType {
    type Err = PageCheckError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeviceType::ALL
            .into_iter()
            .find(|device| device.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PageCheckError::UnknownDevice(s.to_string()))
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    /// Name under which a capture at this viewport is stored.
    pub fn capture_artifact_name(self) -> String {
        format!("capture_{self}.png")
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// What a capture collaborator returns for one page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capture {
    /// Encoded screenshot (PNG, JPEG, ...).
    pub image: Vec<u8>,
    /// Page text or source.
    pub text: String,
}

/// Loads a page at a viewport and returns its screenshot and text.
pub trait PageCapture: Send + Sync {
    fn capture(
        &self,
        url: &str,
        viewport: Viewport,
    ) -> impl Future<Output = Result<Capture, PageCheckError>> + Send;
}

/// Serves the same capture for every request.
#[derive(Debug, Clone)]
pub struct StaticCapture {
    capture: Capture,
}

impl StaticCapture {
    pub fn new(image: Vec<u8>, text: impl Into<String>) -> Self {
        Self {
            capture: Capture {
                image,
                text: text.into(),
            },
        }
    }
}

impl PageCapture for StaticCapture {
    async fn capture(&self, _url: &str, _viewport: Viewport) -> Result<Capture, PageCheckError> {
        Ok(self.capture.clone())
    }
}

/// Baseline material for one device. Empty values count as absent.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    pub image: Option<Vec<u8>>,
    pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CheckRequest {
    pub url: String,
    /// Raw device name as supplied by the client.
    pub device_type: String,
    pub baseline: Baseline,
}

impl CheckRequest {
    fn validate(&self) -> Result<DeviceType, PageCheckError> {
        if self.url.trim().is_empty() {
            return Err(PageCheckError::MissingInformation("url"));
        }
        if self.device_type.trim().is_empty() {
            return Err(PageCheckError::MissingInformation("device type"));
        }
        self.device_type.parse()
    }
}

/// The full response of a page check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageReport {
    #[serde(rename = "imageURL")]
    pub image_url: String,
    pub large_text: String,
    pub text_percent_change: String,
    #[serde(flatten)]
    pub image: ImageReport,
}

pub struct PageChecker<C> {
    capture: C,
    pipeline: Arc<ComparisonPipeline>,
}

impl<C: PageCapture> PageChecker<C> {
    pub fn new(capture: C, pipeline: Arc<ComparisonPipeline>) -> Self {
        Self { capture, pipeline }
    }

    #[instrument(skip_all, fields(url = %request.url, device = %request.device_type))]
    pub async fn check(&self, request: CheckRequest) -> Result<PageReport, PageCheckError> {
        let device = request.validate()?;
        let viewport = device.viewport();
        let session = SessionKey::generate();

        let capture = self.capture.capture(&request.url, viewport).await?;

        let text_percent_change = match request.baseline.text.as_deref() {
            Some(baseline) if !baseline.is_empty() => {
                format!("{:.2}", text_change_percentage(baseline, &capture.text))
            }
            _ => NO_BASELINE_PERCENT.to_string(),
        };

        let pipeline = self.pipeline.clone();
        let baseline_image = request.baseline.image.filter(|bytes| !bytes.is_empty());
        let screenshot = capture.image;
        let task_session = session.clone();
        let (image_url, image) = tokio::task::spawn_blocking(move || {
            compare_capture(
                &pipeline,
                baseline_image.as_deref(),
                &screenshot,
                &task_session,
                viewport,
            )
        })
        .await??;

        info!(
            session = %session,
            image_percent_change = %image.image_percent_change,
            text_percent_change = %text_percent_change,
            "page check complete"
        );

        Ok(PageReport {
            image_url: image_url.to_string(),
            large_text: capture.text,
            text_percent_change,
            image,
        })
    }

    /// Checks `url` on every form factor concurrently. Devices missing from
    /// `baselines` are checked without a baseline.
    pub async fn check_all_devices(
        &self,
        url: &str,
        mut baselines: HashMap<DeviceType, Baseline>,
    ) -> Vec<(DeviceType, Result<PageReport, PageCheckError>)> {
        let checks = DeviceType::ALL.into_iter().map(|device| {
            let request = CheckRequest {
                url: url.to_string(),
                device_type: device.to_string(),
                baseline: baselines.remove(&device).unwrap_or_default(),
            };
            async move { (device, self.check(request).await) }
        });
        join_all(checks).await
    }
}

/// Compares the fresh capture against the baseline (if any), then stores the capture
/// itself in the same session.
fn compare_capture(
    pipeline: &ComparisonPipeline,
    baseline: Option<&[u8]>,
    screenshot: &[u8],
    session: &SessionKey,
    viewport: Viewport,
) -> Result<(ArtifactRef, ImageReport), CompareError> {
    let current = decode(screenshot)?;

    let report = match baseline {
        Some(baseline) => {
            let baseline = decode(baseline)?;
            pipeline.compare(baseline, current.clone(), session)?.report()
        }
        None => {
            pipeline.store().open_session(session)?;
            ImageReport::no_baseline()
        }
    };

    let name = viewport.capture_artifact_name();
    let bytes = encode_png(&name, &current)?;
    let image_url = pipeline.store().put(session, &name, &bytes)?;
    Ok((image_url, report))
}
