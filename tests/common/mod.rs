#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anonymous_face::error::{FetchError, PublishError};
use anonymous_face::http::{FetchedImage, Upload};
use anonymous_face::{
    Detection, DetectionParams, Event, FaceDetector, Fetcher, Keys, Publisher, UnsignedEvent,
};
use image::{GrayImage, Rgba, RgbaImage};

pub const BOT_NSEC: &str = "nsec1vl029mgpspedva04g90vltkh6fvh240zqtv9k0t9af8935ke9laqsnlfe5";
pub const BOT_PUBKEY: &str = "7e7e9c42a91bfef19fa929e5fda1b72e0ebc1a4c1141673e2794234d86addf4e";
pub const UPLOAD_LOCATION: &str = "http://files.example/d/Xyz";

/// Reports the same candidates for every image.
pub struct FixedDetector(pub Vec<Detection>);

impl FaceDetector for FixedDetector {
    fn detect(&self, _: &GrayImage, _: &DetectionParams) -> Vec<Detection> {
        self.0.clone()
    }
}

/// Serves one canned response and records every URL asked for.
#[derive(Clone)]
pub struct StubFetcher {
    pub response: FetchedImage,
    pub calls: Arc<Mutex<Vec<String>>>,
}

impl StubFetcher {
    pub fn serving(bytes: Vec<u8>, content_type: &str) -> Self {
        Self {
            response: FetchedImage {
                bytes,
                content_type: Some(content_type.to_string()),
            },
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Fetcher for StubFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        self.calls.lock().unwrap().push(url.to_string());
        Ok(self.response.clone())
    }
}

/// Accepts every upload, keeps a copy and answers with [`UPLOAD_LOCATION`].
#[derive(Clone, Default)]
pub struct StubPublisher {
    pub uploads: Arc<Mutex<Vec<Upload>>>,
}

impl StubPublisher {
    pub fn uploads(&self) -> Vec<Upload> {
        self.uploads.lock().unwrap().clone()
    }
}

impl Publisher for StubPublisher {
    fn publish(&self, upload: Upload) -> Result<String, PublishError> {
        self.uploads.lock().unwrap().push(upload);
        Ok(UPLOAD_LOCATION.to_string())
    }
}

/// A flat gray photo.
pub fn photo(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([120, 110, 100, 255]))
}

pub fn png_bytes(image: &RgbaImage) -> Vec<u8> {
    anonymous_face::codec::encode_png(image).expect("encode fixture")
}

pub fn jpeg_bytes(image: &RgbaImage) -> Vec<u8> {
    let rgb = image::DynamicImage::ImageRgba8(image.clone()).to_rgb8();
    let mut out = std::io::Cursor::new(Vec::new());
    rgb.write_to(&mut out, image::ImageFormat::Jpeg)
        .expect("encode fixture");
    out.into_inner()
}

/// A message signed by a throwaway author.
pub fn signed_message(content: &str, tags: &[&[&str]]) -> Event {
    let author = Keys::parse(&"5a".repeat(32)).expect("valid secret");
    UnsignedEvent {
        pubkey: author.public_key_hex(),
        created_at: 1_700_000_000,
        kind: 1,
        tags: tags
            .iter()
            .map(|tag| tag.iter().map(|s| (*s).to_string()).collect())
            .collect(),
        content: content.to_string(),
    }
    .sign(&author)
    .expect("sign fixture")
}

pub fn body(event: &Event) -> Vec<u8> {
    serde_json::to_vec(event).expect("serialize fixture")
}

/// Blob for a cascade of `trees` depth-1 trees that every window passes.
pub fn accepting_cascade(trees: usize) -> Vec<u8> {
    let mut blob = vec![0u8; 8];
    blob.extend_from_slice(&1u32.to_le_bytes());
    blob.extend_from_slice(&u32::try_from(trees).unwrap().to_le_bytes());
    for _ in 0..trees {
        blob.extend_from_slice(&[0; 4]);
        for score in [1.0f32, 1.0] {
            blob.extend_from_slice(&score.to_le_bytes());
        }
        blob.extend_from_slice(&0.0f32.to_le_bytes());
    }
    blob
}
