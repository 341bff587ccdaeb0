//! Core face-masking engine.

use std::path::Path;

use image::RgbaImage;
use tracing::debug;

use crate::cascade::Cascade;
use crate::cluster::cluster_detections;
use crate::codec;
use crate::compositor::{self, Mask};
use crate::detection::{Detection, DetectionParams, FaceDetector};
use crate::error::{DecodeError, Result, StartupError};

/// Result of anonymizing one image.
#[derive(Debug, Clone)]
pub struct Processed {
    /// The anonymized image, PNG-encoded.
    pub png: Vec<u8>,
    /// One region per face that was masked.
    pub faces: Vec<Detection>,
}

/// The engine holding the face detector and the mask.
///
/// Create once at startup and share it between requests; it is never mutated
/// after construction.
pub struct FaceMasker {
    detector: Box<dyn FaceDetector>,
    mask: Mask,
    params: DetectionParams,
}

impl FaceMasker {
    /// Create an engine from any detector.
    #[must_use]
    pub fn new(detector: impl FaceDetector + 'static, mask: Mask, params: DetectionParams) -> Self {
        Self {
            detector: Box::new(detector),
            mask,
            params,
        }
    }

    /// Create an engine from a cascade blob and an optional mask image.
    ///
    /// Falls back to the embedded mask when `mask` is `None`.
    ///
    /// # Errors
    ///
    /// Returns a [`StartupError`] if the cascade or the mask cannot be decoded.
    pub fn from_assets(
        cascade: &[u8],
        mask: Option<&[u8]>,
        params: DetectionParams,
    ) -> std::result::Result<Self, StartupError> {
        let cascade = Cascade::unpack(cascade)?;
        let mask = match mask {
            Some(bytes) => Mask::from_bytes(bytes)?,
            None => Mask::embedded()?,
        };
        debug!(
            trees = cascade.tree_count(),
            depth = cascade.depth(),
            mask = ?mask.dimensions(),
            "face masker ready"
        );
        Ok(Self::new(cascade, mask, params))
    }

    /// The detection parameters in use.
    #[must_use]
    pub fn params(&self) -> &DetectionParams {
        &self.params
    }

    /// Locate faces: one clustered region per face.
    #[must_use]
    pub fn detect(&self, image: &RgbaImage) -> Vec<Detection> {
        let gray = codec::grayscale(image);
        let candidates = self.detector.detect(&gray, &self.params);
        let faces = cluster_detections(&candidates, self.params.iou_threshold);
        debug!(
            candidates = candidates.len(),
            faces = faces.len(),
            "faces detected"
        );
        faces
    }

    /// Mask every detected face in place and report where they were.
    pub fn anonymize(&self, image: &mut RgbaImage) -> Vec<Detection> {
        let faces = self.detect(image);
        compositor::composite(image, &self.mask, &faces);
        faces
    }

    /// Decode, mask and re-encode an image.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the input is not a supported image or the
    /// output cannot be encoded.
    pub fn process(&self, bytes: &[u8]) -> std::result::Result<Processed, DecodeError> {
        let mut image = codec::decode(bytes)?;
        let faces = self.anonymize(&mut image);
        let png = codec::encode_png(&image)?;
        Ok(Processed { png, faces })
    }

    /// Mask a local image file and write the PNG to `output`.
    ///
    /// Returns the number of faces masked.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be accessed or the input is not
    /// a supported image.
    pub fn process_file(&self, input: &Path, output: &Path) -> Result<usize> {
        let bytes = std::fs::read(input)?;
        let processed = self.process(&bytes)?;

        if let Some(parent) = output.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(output, &processed.png)?;
        Ok(processed.faces.len())
    }
}
