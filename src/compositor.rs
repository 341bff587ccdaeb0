//! Draw the mask over detected faces.
//!
//! The mask is resampled with nearest-neighbour filtering to each face's
//! side length and alpha-blended over the canvas (`out = top + (1 - a) * bottom`),
//! so transparent parts of the mask leave the photo visible. Regions that
//! run past the canvas edge are clipped.

use image::imageops::{self, FilterType};
use image::{Pixel, RgbaImage};

use crate::assets;
use crate::detection::Detection;
use crate::error::StartupError;

/// The overlay raster, decoded once and shared read-only.
#[derive(Debug, Clone)]
pub struct Mask {
    image: RgbaImage,
}

impl Mask {
    /// Wrap an already decoded overlay.
    #[must_use]
    pub fn new(image: RgbaImage) -> Self {
        Self { image }
    }

    /// Decode an overlay from encoded image bytes (any format `image` reads).
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Mask`] if the bytes cannot be decoded.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StartupError> {
        let image = image::load_from_memory(bytes)
            .map_err(StartupError::Mask)?
            .to_rgba8();
        Ok(Self { image })
    }

    /// The overlay shipped with the crate.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::Mask`] if the embedded PNG is corrupt.
    pub fn embedded() -> Result<Self, StartupError> {
        Self::from_bytes(assets::MASK_PNG)
    }

    /// Width and height of the overlay before resampling.
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    /// The overlay resampled to a `side` x `side` square.
    #[must_use]
    pub fn resized(&self, side: u32) -> RgbaImage {
        imageops::resize(&self.image, side, side, FilterType::Nearest)
    }
}

/// A rectangle of canvas pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// The part of a face's square that lands on a `width` x `height` canvas.
///
/// Returns `None` if the square has no area or lies entirely off-canvas.
#[must_use]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn mask_region(width: u32, height: u32, face: &Detection) -> Option<Region> {
    if face.scale <= 0 {
        return None;
    }
    let (x, y) = face.top_left();
    let side = i64::from(face.scale);

    let x1 = x.max(0);
    let y1 = y.max(0);
    let x2 = (x + side).min(i64::from(width));
    let y2 = (y + side).min(i64::from(height));
    if x1 >= x2 || y1 >= y2 {
        return None;
    }

    // Clamped to the canvas, so every value fits in a u32.
    Some(Region {
        x: x1 as u32,
        y: y1 as u32,
        width: (x2 - x1) as u32,
        height: (y2 - y1) as u32,
    })
}

/// Index of the source pixel shown at `offset` when `src` pixels are
/// stretched over `side` output pixels (nearest neighbour, sampled at the
/// pixel center).
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn nearest(offset: i64, side: i64, src: u32) -> u32 {
    let src = i128::from(src);
    let index = (2 * i128::from(offset) + 1) * src / (2 * i128::from(side));
    index.clamp(0, src - 1) as u32
}

/// Blend the mask over every face, in order; later faces draw on top.
///
/// Only the on-canvas part of each face square is sampled, so the work per
/// face is bounded by the canvas size whatever the face's scale.
pub fn composite(canvas: &mut RgbaImage, mask: &Mask, faces: &[Detection]) {
    let (width, height) = canvas.dimensions();
    let (mask_w, mask_h) = mask.dimensions();
    if mask_w == 0 || mask_h == 0 {
        return;
    }

    for face in faces {
        let Some(region) = mask_region(width, height, face) else {
            continue;
        };
        let (left, top) = face.top_left();
        let side = i64::from(face.scale);

        for y in region.y..region.y + region.height {
            let sy = nearest(i64::from(y) - top, side, mask_h);
            for x in region.x..region.x + region.width {
                let sx = nearest(i64::from(x) - left, side, mask_w);
                canvas
                    .get_pixel_mut(x, y)
                    .blend(mask.image.get_pixel(sx, sy));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use proptest::prelude::*;

    const BG: Rgba<u8> = Rgba([10, 20, 30, 255]);
    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);

    fn solid_mask(color: Rgba<u8>) -> Mask {
        Mask::new(RgbaImage::from_pixel(8, 8, color))
    }

    #[test]
    fn embedded_mask_loads_with_correct_dimensions() {
        let mask = Mask::embedded().unwrap();
        assert_eq!(mask.dimensions(), (64, 64));
    }

    #[test]
    fn embedded_mask_is_transparent_at_corners_and_opaque_in_center() {
        let mask = Mask::embedded().unwrap();
        assert_eq!(mask.image.get_pixel(0, 0)[3], 0);
        assert_eq!(mask.image.get_pixel(32, 32)[3], 255);
    }

    #[test]
    fn resize_produces_requested_square() {
        let mask = Mask::embedded().unwrap();
        assert_eq!(mask.resized(40).dimensions(), (40, 40));
        assert_eq!(mask.resized(1).dimensions(), (1, 1));
    }

    #[test]
    fn no_faces_leaves_canvas_untouched() {
        let mut canvas = RgbaImage::from_pixel(50, 50, BG);
        let before = canvas.clone();
        composite(&mut canvas, &solid_mask(RED), &[]);
        assert_eq!(canvas, before);
    }

    #[test]
    fn opaque_mask_covers_exactly_the_face_square() {
        let mut canvas = RgbaImage::from_pixel(100, 100, BG);
        composite(
            &mut canvas,
            &solid_mask(RED),
            &[Detection::new(50, 40, 20, 1.0)],
        );
        for (x, y, px) in canvas.enumerate_pixels() {
            let inside = (30..50).contains(&x) && (40..60).contains(&y);
            assert_eq!(*px, if inside { RED } else { BG }, "pixel ({x},{y})");
        }
    }

    #[test]
    fn transparent_mask_pixels_keep_the_photo() {
        let mut canvas = RgbaImage::from_pixel(40, 40, BG);
        composite(
            &mut canvas,
            &solid_mask(Rgba([255, 0, 0, 0])),
            &[Detection::new(20, 20, 16, 1.0)],
        );
        assert!(canvas.pixels().all(|px| *px == BG));
    }

    #[test]
    fn translucent_mask_blends_with_the_photo() {
        let mut canvas = RgbaImage::from_pixel(40, 40, Rgba([0, 0, 0, 255]));
        composite(
            &mut canvas,
            &solid_mask(Rgba([255, 255, 255, 128])),
            &[Detection::new(20, 20, 16, 1.0)],
        );
        let px = canvas.get_pixel(20, 20);
        assert!((120..=136).contains(&px[0]), "got {px:?}");
        assert!(px[3] >= 254, "got {px:?}");
    }

    #[test]
    fn face_at_corner_is_clipped_not_rejected() {
        let mut canvas = RgbaImage::from_pixel(30, 30, BG);
        composite(
            &mut canvas,
            &solid_mask(RED),
            &[Detection::new(0, 0, 20, 1.0)],
        );
        assert_eq!(*canvas.get_pixel(0, 0), RED);
        assert_eq!(*canvas.get_pixel(9, 9), RED);
        assert_eq!(*canvas.get_pixel(10, 10), BG);
    }

    #[test]
    fn later_faces_draw_on_top() {
        let mut canvas = RgbaImage::from_pixel(60, 60, BG);
        let blue = Rgba([0, 0, 255, 255]);
        let faces = [
            Detection::new(30, 30, 20, 1.0),
            Detection::new(30, 30, 20, 1.0),
        ];
        composite(&mut canvas, &solid_mask(RED), &faces[..1]);
        composite(&mut canvas, &solid_mask(blue), &faces[1..]);
        assert_eq!(*canvas.get_pixel(30, 30), blue);
    }

    #[test]
    fn region_off_canvas_is_none() {
        assert_eq!(mask_region(50, 50, &Detection::new(-40, -40, 20, 1.0)), None);
        assert_eq!(mask_region(50, 50, &Detection::new(200, 10, 20, 1.0)), None);
        assert_eq!(mask_region(50, 50, &Detection::new(10, 10, 0, 1.0)), None);
    }

    #[test]
    fn region_is_clipped_at_edges() {
        assert_eq!(
            mask_region(50, 50, &Detection::new(45, 2, 20, 1.0)),
            Some(Region {
                x: 0,
                y: 35,
                width: 12,
                height: 15,
            })
        );
    }

    #[test]
    fn huge_face_only_touches_the_canvas() {
        let mut canvas = RgbaImage::from_pixel(10, 10, BG);
        composite(
            &mut canvas,
            &solid_mask(RED),
            &[
                Detection::new(5, 5, 12_000, 1.0),
                Detection::new(5, 5, i32::MAX, 1.0),
            ],
        );
        assert!(canvas.pixels().all(|px| *px == RED));
    }

    #[test]
    fn mask_is_stretched_by_nearest_neighbour() {
        // Left half red, right half blue, drawn over a 4px square.
        let blue = Rgba([0, 0, 255, 255]);
        let mask = Mask::new(RgbaImage::from_fn(2, 1, |x, _| if x == 0 { RED } else { blue }));
        let mut canvas = RgbaImage::from_pixel(4, 4, BG);
        composite(&mut canvas, &mask, &[Detection::new(2, 2, 4, 1.0)]);
        for y in 0..4 {
            assert_eq!(*canvas.get_pixel(0, y), RED);
            assert_eq!(*canvas.get_pixel(1, y), RED);
            assert_eq!(*canvas.get_pixel(2, y), blue);
            assert_eq!(*canvas.get_pixel(3, y), blue);
        }
    }

    proptest! {
        #[test]
        fn composite_changes_exactly_the_clipped_region(
            width in 1u32..48,
            height in 1u32..48,
            row in -60i32..110,
            col in -60i32..110,
            scale in -5i32..120,
        ) {
            let face = Detection::new(row, col, scale, 1.0);
            let mut canvas = RgbaImage::from_pixel(width, height, BG);
            composite(&mut canvas, &solid_mask(RED), &[face]);

            let region = mask_region(width, height, &face);
            for (x, y, px) in canvas.enumerate_pixels() {
                let inside = region.is_some_and(|r| {
                    (r.x..r.x + r.width).contains(&x) && (r.y..r.y + r.height).contains(&y)
                });
                prop_assert_eq!(*px, if inside { RED } else { BG }, "pixel ({}, {})", x, y);
            }
        }

        #[test]
        fn clipped_regions_lie_within_canvas(
            width in 1u32..400,
            height in 1u32..400,
            row in -300i32..700,
            col in -300i32..700,
            scale in -5i32..500,
        ) {
            if let Some(r) = mask_region(width, height, &Detection::new(row, col, scale, 1.0)) {
                prop_assert!(r.width > 0 && r.height > 0);
                prop_assert!(r.x + r.width <= width);
                prop_assert!(r.y + r.height <= height);
            }
        }
    }
}
