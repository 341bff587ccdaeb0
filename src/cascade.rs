//! Pixel-comparison cascade classifier.
//!
//! The trained model is a sequence of binary decision trees. Each internal
//! node compares the intensity of two pixels whose positions are stored
//! relative to the scanned window (in 1/256ths of the window side). Leaves
//! hold a score contribution; after every tree the running sum is checked
//! against a threshold and the window is rejected as soon as it falls below.
//!
//! Blob layout (little-endian): 8 header bytes, `u32` tree depth, `u32` tree
//! count, then per tree `4 * 2^depth - 4` signed split codes, `2^depth` `f32`
//! leaf scores and one `f32` threshold.

use image::GrayImage;

use crate::detection::{Detection, DetectionParams, FaceDetector};
use crate::error::CascadeError;

/// Bytes skipped at the start of a blob.
const HEADER_LEN: usize = 8;
/// Deepest tree accepted; trained models use 6.
const MAX_DEPTH: u32 = 16;

/// Little-endian cursor over a cascade blob.
struct BlobReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BlobReader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], CascadeError> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.bytes.len());
        let Some(end) = end else {
            return Err(CascadeError::Truncated {
                offset: self.pos,
                needed: len - (self.bytes.len() - self.pos.min(self.bytes.len())),
            });
        };
        let chunk = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(chunk)
    }

    fn u32(&mut self) -> Result<u32, CascadeError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn f32(&mut self) -> Result<f32, CascadeError> {
        self.u32().map(f32::from_bits)
    }
}

/// A trained face cascade, immutable once unpacked.
#[derive(Debug, Clone)]
pub struct Cascade {
    depth: u32,
    codes: Vec<i8>,
    scores: Vec<f32>,
    thresholds: Vec<f32>,
}

impl Cascade {
    /// Unpack a trained cascade blob.
    ///
    /// # Errors
    ///
    /// Returns a [`CascadeError`] if the blob is truncated, declares an
    /// unsupported depth, or contains no trees.
    pub fn unpack(blob: &[u8]) -> Result<Self, CascadeError> {
        let mut reader = BlobReader {
            bytes: blob,
            pos: 0,
        };
        reader.take(HEADER_LEN)?;

        let depth = reader.u32()?;
        if depth == 0 || depth > MAX_DEPTH {
            return Err(CascadeError::Depth(depth));
        }
        let tree_count = reader.u32()? as usize;
        if tree_count == 0 {
            return Err(CascadeError::Empty);
        }

        let leaves = 1usize << depth;
        let mut codes = Vec::new();
        let mut scores = Vec::new();
        let mut thresholds = Vec::new();

        for _ in 0..tree_count {
            // Node 0 is unused; pad it so node `i` starts at `4 * i`.
            codes.extend_from_slice(&[0; 4]);
            #[allow(clippy::cast_possible_wrap)]
            codes.extend(reader.take(4 * leaves - 4)?.iter().map(|&b| b as i8));
            for _ in 0..leaves {
                scores.push(reader.f32()?);
            }
            thresholds.push(reader.f32()?);
        }

        Ok(Self {
            depth,
            codes,
            scores,
            thresholds,
        })
    }

    /// Depth of every tree in the cascade.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.depth
    }

    /// Number of trees (stages) in the cascade.
    #[must_use]
    pub fn tree_count(&self) -> usize {
        self.thresholds.len()
    }

    /// Score the square window of side `scale` centered at `(row, col)`.
    ///
    /// Returns a negative value when the window is rejected.
    fn classify_region(&self, gray: &GrayImage, row: i32, col: i32, scale: i32) -> f32 {
        let leaves = 1usize << self.depth;
        let pixels = gray.as_raw();
        #[allow(clippy::cast_possible_wrap)]
        let (max_row, max_col) = (gray.height() as i32 - 1, gray.width() as i32 - 1);
        #[allow(clippy::cast_sign_loss)]
        let pixel = |r: i32, c: i32| -> u8 {
            let r = (r >> 8).clamp(0, max_row) as usize;
            let c = (c >> 8).clamp(0, max_col) as usize;
            pixels[r * gray.width() as usize + c]
        };

        let (r, c) = (row * 256, col * 256);
        let mut root = 0usize;
        let mut sum = 0.0_f32;

        for (tree, &threshold) in self.thresholds.iter().enumerate() {
            let mut idx = 1usize;
            for _ in 0..self.depth {
                let code = &self.codes[root + 4 * idx..root + 4 * idx + 4];
                let p1 = pixel(
                    r + i32::from(code[0]) * scale,
                    c + i32::from(code[1]) * scale,
                );
                let p2 = pixel(
                    r + i32::from(code[2]) * scale,
                    c + i32::from(code[3]) * scale,
                );
                idx = 2 * idx + usize::from(p1 <= p2);
            }

            sum += self.scores[leaves * tree + idx - leaves];
            if sum <= threshold {
                return -1.0;
            }
            root += 4 * leaves;
        }

        sum - self.thresholds[self.thresholds.len() - 1]
    }

    /// Slide windows of one size over the whole image.
    fn scan(&self, gray: &GrayImage, scale: i32, params: &DetectionParams) -> Vec<Detection> {
        #[allow(clippy::cast_possible_truncation)]
        let step = ((params.shift_factor * scale as f32) as i32).max(1);
        let offset = scale / 2 + 1;
        #[allow(clippy::cast_possible_wrap)]
        let (rows, cols) = (gray.height() as i32, gray.width() as i32);

        let mut found = Vec::new();
        let mut row = offset;
        while row <= rows - offset {
            let mut col = offset;
            while col <= cols - offset {
                let q = self.classify_region(gray, row, col, scale);
                if q > 0.0 && q > params.quality_threshold {
                    found.push(Detection::new(row, col, scale, q));
                }
                col += step;
            }
            row += step;
        }
        found
    }

    /// Window sizes visited for an image of the given dimensions.
    fn pyramid(params: &DetectionParams, rows: u32, cols: u32) -> Vec<i32> {
        let limit = params.max_size.min(rows).min(cols);
        let mut sizes = Vec::new();
        let mut scale = params.min_size.max(1);
        while scale <= limit {
            #[allow(clippy::cast_possible_wrap)]
            sizes.push(scale as i32);
            #[allow(
                clippy::cast_possible_truncation,
                clippy::cast_sign_loss,
                clippy::cast_precision_loss
            )]
            let next = (scale as f32 * params.scale_factor) as u32;
            scale = next.max(scale + 1);
        }
        sizes
    }

    /// Run the cascade over every window size and position.
    ///
    /// Candidates are returned in scan order: by window size, then row, then
    /// column. Uses parallel iteration over window sizes when the `parallel`
    /// feature is enabled; the result is identical either way.
    #[must_use]
    pub fn run(&self, gray: &GrayImage, params: &DetectionParams) -> Vec<Detection> {
        let sizes = Self::pyramid(params, gray.height(), gray.width());

        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            sizes
                .par_iter()
                .map(|&scale| self.scan(gray, scale, params))
                .collect::<Vec<_>>()
                .into_iter()
                .flatten()
                .collect()
        }

        #[cfg(not(feature = "parallel"))]
        {
            sizes
                .iter()
                .flat_map(|&scale| self.scan(gray, scale, params))
                .collect()
        }
    }
}

impl FaceDetector for Cascade {
    fn detect(&self, gray: &GrayImage, params: &DetectionParams) -> Vec<Detection> {
        self.run(gray, params)
    }
}

/// Assemble a cascade blob from `(codes, leaf scores, threshold)` trees.
#[cfg(test)]
pub(crate) fn pack(depth: u32, trees: &[(Vec<i8>, Vec<f32>, f32)]) -> Vec<u8> {
    let mut blob = vec![0u8; HEADER_LEN];
    blob.extend_from_slice(&depth.to_le_bytes());
    blob.extend_from_slice(&u32::try_from(trees.len()).unwrap().to_le_bytes());
    for (codes, scores, threshold) in trees {
        #[allow(clippy::cast_sign_loss)]
        blob.extend(codes.iter().map(|&c| c as u8));
        for s in scores {
            blob.extend_from_slice(&s.to_le_bytes());
        }
        blob.extend_from_slice(&threshold.to_le_bytes());
    }
    blob
}
