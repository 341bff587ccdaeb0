//! Raster assets compiled into the binary.

/// Default overlay drawn over every detected face (64x64 RGBA).
pub(crate) const MASK_PNG: &[u8] = include_bytes!("../assets/mask.png");
