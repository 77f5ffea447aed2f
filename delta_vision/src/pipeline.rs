// THEORY:
// The `pipeline` module is the top-level API of the comparison engine. It
// encapsulates the full stack behind one call: give it a baseline capture, a current
// capture and a session key, and it returns how much changed, where, and where the
// evidence was stored.
//
// Stages, strictly downstream:
// 1.  Canvas normalization (pad both captures to a common size).
// 2.  Pixel delta (headline percentage plus the change mask).
// 3.  Structural difference map (windowed similarity on grayscale).
// 4.  Change region extraction (threshold, components, noise floor, crops).
// 5.  Artifact emission (difference visualization and crops, one namespace).
//
// The numeric stages are pure and run on the caller's thread. Only stage 5 touches
// storage, through the injected `ArtifactStore`. A comparison either completes all
// five stages or fails with a `CompareError`: no result ever pairs a percentage with
// missing artifacts.

use crate::core_modules::artifacts::{ArtifactRef, ArtifactStore, emit};
use crate::core_modules::canvas::{DEFAULT_PADDING, normalize};
use crate::core_modules::change_regions::region_extractor::extract_regions;
use crate::core_modules::change_regions::{DEFAULT_MIN_REGION_AREA, Point, Rect};
use crate::core_modules::pixel_delta::{Percentage, pixel_delta};
use crate::core_modules::session::SessionKey;
use crate::core_modules::structural::{SimilarityScore, SsimParams, structural_diff_map};
use crate::error::CompareError;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// The percentage reported when there is no baseline to compare against.
pub const NO_BASELINE_PERCENT: &str = "100";

/// Configuration for the ComparisonPipeline, allowing for tunable behavior.
#[derive(Debug, Clone)]
pub struct CompareConfig {
    /// Noise floor: a change region must cover strictly more pixels than this.
    pub min_region_area: usize,
    /// Fill color for the margins added when captures differ in size.
    pub padding_color: [u8; 3],
    pub ssim: SsimParams,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            min_region_area: DEFAULT_MIN_REGION_AREA,
            padding_color: DEFAULT_PADDING,
            ssim: SsimParams::default(),
        }
    }
}

/// One reported change and the stored snapshot of it.
#[derive(Debug, Clone, PartialEq)]
pub struct SpottedChange {
    pub bounding_box: Rect,
    pub area: usize,
    pub image: ArtifactRef,
}

impl SpottedChange {
    pub fn corners(&self) -> [Point; 4] {
        self.bounding_box.corners()
    }
}

/// The complete outcome of one comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonResult {
    /// Share of differing channel cells on the common canvas, in `[0, 100]`.
    pub percentage: Percentage,
    /// Mean structural similarity. Kept for diagnostics; reports do not carry it.
    pub structural_score: SimilarityScore,
    /// `(width, height)` of the common canvas.
    pub canvas: (u32, u32),
    /// Reading order of each region's top-left corner.
    pub spotted_changes: Vec<SpottedChange>,
    pub overall_difference: ArtifactRef,
}

impl ComparisonResult {
    pub fn report(&self) -> ImageReport {
        ImageReport {
            image_percent_change: format!("{:.2}", self.percentage),
            spotted_changes: self
                .spotted_changes
                .iter()
                .map(|change| SpottedChangeReport {
                    image_url: change.image.to_string(),
                    coordinates: change.corners().map(|p| [p.x, p.y]),
                })
                .collect(),
            overall_difference: self.overall_difference.to_string(),
        }
    }
}

/// Serializable form of a spotted change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpottedChangeReport {
    #[serde(rename = "imageURL")]
    pub image_url: String,
    /// Top-left, top-right, bottom-left, bottom-right.
    pub coordinates: [[u32; 2]; 4],
}

/// Serializable form of a comparison, as delivered to clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReport {
    pub image_percent_change: String,
    pub spotted_changes: Vec<SpottedChangeReport>,
    pub overall_difference: String,
}

impl ImageReport {
    /// The report used when no baseline image was supplied.
    pub fn no_baseline() -> Self {
        Self {
            image_percent_change: NO_BASELINE_PERCENT.to_string(),
            spotted_changes: Vec::new(),
            overall_difference: String::new(),
        }
    }
}

/// Decodes an encoded capture (PNG, JPEG, ...) into 3-channel RGB. Alpha is dropped.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, CompareError> {
    let image = image::load_from_memory(bytes)?.to_rgb8();
    ensure_not_empty(&image)?;
    Ok(image)
}

fn ensure_not_empty(image: &RgbImage) -> Result<(), CompareError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(CompareError::InvalidImage(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    Ok(())
}

/// The main, top-level struct for the comparison engine.
pub struct ComparisonPipeline {
    config: CompareConfig,
    store: Arc<dyn ArtifactStore>,
}

impl ComparisonPipeline {
    pub fn new(config: CompareConfig, store: Arc<dyn ArtifactStore>) -> Self {
        Self { config, store }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> {
        &self.store
    }

    /// Compares `after` (the current capture) against `before` (the baseline).
    #[instrument(skip_all, fields(session = %session))]
    pub fn compare(
        &self,
        before: RgbImage,
        after: RgbImage,
        session: &SessionKey,
    ) -> Result<ComparisonResult, CompareError> {
        ensure_not_empty(&before)?;
        ensure_not_empty(&after)?;

        // Stage 1: Canvas Normalization
        let (before, after) = normalize(before, after, self.config.padding_color);
        if before.dimensions() != after.dimensions() {
            warn!(
                before = ?before.dimensions(),
                after = ?after.dimensions(),
                "normalization left captures with different sizes"
            );
            return Err(CompareError::mismatch(before.dimensions(), after.dimensions()));
        }

        // Stage 2: Pixel Delta
        let delta = pixel_delta(&before, &after)?;

        // Stage 3: Structural Difference Map
        let (structural_score, diff) = structural_diff_map(&before, &after, &self.config.ssim)?;
        debug!(
            percentage = delta.percentage,
            structural_score, "scored captures"
        );

        // Stage 4: Change Region Extraction
        let regions = extract_regions(&diff, &delta.mask, &after, self.config.min_region_area)?;

        // Stage 5: Artifact Emission
        let artifacts = emit(self.store.as_ref(), session, &diff, &regions)?;

        let spotted_changes: Vec<SpottedChange> = regions
            .into_iter()
            .zip(artifacts.regions)
            .map(|(region, image)| SpottedChange {
                bounding_box: region.bounding_box,
                area: region.area,
                image,
            })
            .collect();

        info!(
            percentage = delta.percentage,
            regions = spotted_changes.len(),
            "comparison complete"
        );

        Ok(ComparisonResult {
            percentage: delta.percentage,
            structural_score,
            canvas: after.dimensions(),
            spotted_changes,
            overall_difference: artifacts.diff,
        })
    }

    /// Decodes both captures, then compares them. Nothing is stored if decoding fails.
    pub fn compare_encoded(
        &self,
        before: &[u8],
        after: &[u8],
        session: &SessionKey,
    ) -> Result<ComparisonResult, CompareError> {
        let before = decode(before)?;
        let after = decode(after)?;
        self.compare(before, after, session)
    }

    pub fn compare_files(
        &self,
        before: &Path,
        after: &Path,
        session: &SessionKey,
    ) -> Result<ComparisonResult, CompareError> {
        let before = open(before)?;
        let after = open(after)?;
        self.compare(before, after, session)
    }
}

fn open(path: &Path) -> Result<RgbImage, CompareError> {
    let image = image::open(path)
        .map_err(|e| CompareError::InvalidImage(format!("{}: {e}", path.display())))?
        .to_rgb8();
    ensure_not_empty(&image)?;
    Ok(image)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::artifacts::{DIFF_ARTIFACT, MemoryArtifactStore, encode_png};
    use crate::error::StorageError;
    use image::Rgb;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Accepts the session, then fails every write after the first.
    #[derive(Default)]
    struct FailingStore {
        writes: AtomicUsize,
    }

    impl ArtifactStore for FailingStore {
        fn open_session(&self, _session: &SessionKey) -> Result<(), StorageError> {
            Ok(())
        }

        fn put(
            &self,
            session: &SessionKey,
            name: &str,
            _bytes: &[u8],
        ) -> Result<ArtifactRef, StorageError> {
            if self.writes.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(ArtifactRef::new(format!("failing://{session}/{name}")));
            }
            Err(StorageError::Io {
                path: name.into(),
                source: std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full"),
            })
        }
    }

    fn white(width: u32, height: u32) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb([255, 255, 255]))
    }

    fn with_black_square(mut image: RgbImage, x0: u32, y0: u32, side: u32) -> RgbImage {
        for y in y0..y0 + side {
            for x in x0..x0 + side {
                image.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        image
    }

    fn pipeline() -> (ComparisonPipeline, Arc<MemoryArtifactStore>) {
        let store = Arc::new(MemoryArtifactStore::new());
        (
            ComparisonPipeline::new(CompareConfig::default(), store.clone()),
            store,
        )
    }

    #[test]
    fn black_square_on_white_end_to_end() {
        let (pipeline, store) = pipeline();
        let session = SessionKey::new("square").unwrap();
        let before = white(100, 100);
        let after = with_black_square(before.clone(), 20, 20, 10);

        let result = pipeline.compare(before, after, &session).unwrap();

        assert!((result.percentage - 1.0).abs() < 1e-9);
        assert_eq!(result.canvas, (100, 100));
        assert_eq!(result.spotted_changes.len(), 1);
        let report = result.report();
        assert_eq!(report.image_percent_change, "1.00");
        assert_eq!(
            report.spotted_changes[0].coordinates,
            [[20, 20], [30, 20], [20, 30], [30, 30]]
        );

        let crop = store.get(&session, "change_0.png").unwrap();
        let crop = image::load_from_memory(&crop).unwrap().to_rgb8();
        assert_eq!(crop.dimensions(), (10, 10));
        assert!(crop.pixels().all(|p| p.0 == [0, 0, 0]));
        assert!(store.get(&session, DIFF_ARTIFACT).is_some());
    }

    #[test]
    fn striped_edit_is_reported_as_one_region() {
        let (pipeline, _) = pipeline();
        let before = white(60, 60);
        let mut after = before.clone();
        for y in (20..40).step_by(2) {
            for x in 20..40 {
                after.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }

        let result = pipeline.compare(before, after, &SessionKey::generate()).unwrap();
        let report = result.report();
        assert_eq!(report.image_percent_change, "5.56");
        assert_eq!(report.spotted_changes.len(), 1);
        assert_eq!(
            report.spotted_changes[0].coordinates,
            [[20, 20], [40, 20], [20, 39], [40, 39]]
        );
    }

    #[test]
    fn comparing_a_capture_with_itself_finds_nothing() {
        let (pipeline, _) = pipeline();
        let image = RgbImage::from_fn(64, 48, |x, y| Rgb([(x * 4) as u8, (y * 5) as u8, 90]));

        let result = pipeline
            .compare(image.clone(), image, &SessionKey::generate())
            .unwrap();
        assert_eq!(result.percentage, 0.0);
        assert!(result.spotted_changes.is_empty());
        assert!((result.structural_score - 1.0).abs() < 1e-9);
        assert_eq!(result.report().image_percent_change, "0.00");
    }

    #[test]
    fn unequal_sizes_are_padded_not_rejected() {
        let (pipeline, _) = pipeline();
        let before = white(50, 50);
        let after = white(70, 60);

        let result = pipeline.compare(before, after, &SessionKey::generate()).unwrap();
        assert_eq!(result.canvas, (70, 60));
        // White padding on a white capture changes nothing.
        assert_eq!(result.percentage, 0.0);
    }

    #[test]
    fn padded_margin_counts_as_change() {
        let (pipeline, _) = pipeline();
        let before = RgbImage::from_pixel(10, 10, Rgb([0, 0, 0]));
        let after = RgbImage::from_pixel(10, 20, Rgb([0, 0, 0]));

        let result = pipeline.compare(before, after, &SessionKey::generate()).unwrap();
        assert_eq!(result.canvas, (10, 20));
        assert!((result.percentage - 50.0).abs() < 1e-9);
    }

    #[test]
    fn reused_session_key_is_a_storage_error() {
        let (pipeline, _) = pipeline();
        let session = SessionKey::new("twice").unwrap();
        let before = white(30, 30);
        let after = with_black_square(before.clone(), 5, 5, 8);

        pipeline.compare(before.clone(), after.clone(), &session).unwrap();
        let err = pipeline.compare(before, after, &session).unwrap_err();
        assert!(matches!(err, CompareError::Storage(StorageError::Collision { .. })));
    }

    #[test]
    fn undecodable_input_stores_nothing() {
        let (pipeline, store) = pipeline();
        let session = SessionKey::new("garbage").unwrap();
        let good = encode_png("good", &white(8, 8)).unwrap();

        let err = pipeline
            .compare_encoded(&good, b"definitely not an image", &session)
            .unwrap_err();
        assert!(matches!(err, CompareError::InvalidImage(_)));
        assert!(store.names(&session).is_empty());
        // The key was never consumed.
        pipeline.compare_encoded(&good, &good, &session).unwrap();
    }

    #[test]
    fn failed_artifact_write_yields_no_result() {
        let store = Arc::new(FailingStore::default());
        let pipeline = ComparisonPipeline::new(CompareConfig::default(), store.clone());
        let before = white(100, 100);
        let after = with_black_square(before.clone(), 20, 20, 10);

        let err = pipeline.compare(before, after, &SessionKey::generate()).unwrap_err();
        assert!(matches!(err, CompareError::Storage(StorageError::Io { .. })));
        // The diff was written, the crop was refused.
        assert_eq!(store.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn empty_images_are_invalid() {
        let (pipeline, _) = pipeline();
        let err = pipeline
            .compare(RgbImage::new(0, 0), white(2, 2), &SessionKey::generate())
            .unwrap_err();
        assert!(matches!(err, CompareError::InvalidImage(_)));
    }

    #[test]
    fn report_serializes_to_the_client_contract() {
        let (pipeline, _) = pipeline();
        let session = SessionKey::new("json").unwrap();
        let before = white(100, 100);
        let after = with_black_square(before.clone(), 20, 20, 10);
        let report = pipeline.compare(before, after, &session).unwrap().report();

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["imagePercentChange"], "1.00");
        assert_eq!(value["overallDifference"], "memory://json/diff_box.png");
        assert_eq!(value["spottedChanges"][0]["imageURL"], "memory://json/change_0.png");
        assert_eq!(
            value["spottedChanges"][0]["coordinates"],
            serde_json::json!([[20, 20], [30, 20], [20, 30], [30, 30]])
        );
    }

    #[test]
    fn no_baseline_contract() {
        let value = serde_json::to_value(ImageReport::no_baseline()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "imagePercentChange": "100",
                "spottedChanges": [],
                "overallDifference": ""
            })
        );
    }

    #[test]
    fn noise_floor_is_configurable() {
        let store = Arc::new(MemoryArtifactStore::new());
        let config = CompareConfig {
            // Above the 16x16 footprint the similarity window gives a 10x10 square.
            min_region_area: 1000,
            ..CompareConfig::default()
        };
        let pipeline = ComparisonPipeline::new(config, store);
        let before = white(100, 100);
        let after = with_black_square(before.clone(), 20, 20, 10);

        let result = pipeline.compare(before, after, &SessionKey::generate()).unwrap();
        assert!(result.spotted_changes.is_empty());
        assert!(result.percentage > 0.0);
    }
}
