//! Mask faces in images linked from Nostr messages.
//!
//! A message tagged `#anonymousface` that links an image is answered with a
//! signed reply linking a copy of that image in which every detected face is
//! covered by a cartoon mask.
//!
//! Detection uses a pixel-intensity-comparison cascade ("pico") scanned over
//! a scale pyramid; redundant hits are merged by overlap before masking.
//!
//! # Quick Start
//!
//! ```no_run
//! use anonymous_face::{DetectionParams, FaceMasker};
//!
//! let cascade = std::fs::read("facefinder").expect("cascade file");
//! let masker = FaceMasker::from_assets(&cascade, None, DetectionParams::default())
//!     .expect("valid cascade");
//! let faces = masker
//!     .process_file("photo.jpg".as_ref(), "photo_masked.png".as_ref())
//!     .expect("image processed");
//! println!("masked {faces} face(s)");
//! ```
//!
//! # Answering messages
//!
//! [`Workflow`] runs one request end to end: parse and verify the message,
//! pick the image URL, fetch, mask, publish and sign the reply. The fetch and
//! publish steps go through the [`Fetcher`] and [`Publisher`] traits so they
//! can be swapped out.
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use anonymous_face::{
//!     DetectionParams, FaceMasker, HttpFetcher, HttpPublisher, Keys, Workflow, WorkflowConfig,
//!     DEFAULT_UPLOAD_URL,
//! };
//!
//! let cascade = std::fs::read("facefinder").expect("cascade file");
//! let masker = FaceMasker::from_assets(&cascade, None, DetectionParams::default()).unwrap();
//! let timeout = Some(Duration::from_secs(30));
//! let workflow = Workflow::new(
//!     Arc::new(masker),
//!     Keys::parse("nsec1...").unwrap(),
//!     Box::new(HttpFetcher::new(timeout).unwrap()),
//!     Box::new(HttpPublisher::new(DEFAULT_UPLOAD_URL, timeout).unwrap()),
//!     WorkflowConfig::default(),
//! );
//! let reply = workflow.handle(br#"{"id":"..."}"#);
//! ```

#![deny(missing_docs)]

mod assets;
pub mod cascade;
pub mod cluster;
pub mod codec;
pub mod compositor;
pub mod detection;
mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod keys;
#[cfg(feature = "server")]
pub mod server;
pub mod workflow;

pub use cascade::Cascade;
pub use codec::{default_output_path, is_supported_image};
pub use compositor::Mask;
pub use detection::{Detection, DetectionParams, FaceDetector};
pub use engine::{FaceMasker, Processed};
pub use error::{Error, Result};
pub use event::{Event, UnsignedEvent};
pub use http::{
    Fetcher, HttpFetcher, HttpPublisher, Publisher, DEFAULT_MAX_FETCH_BYTES, DEFAULT_UPLOAD_URL,
};
pub use keys::Keys;
pub use workflow::{Workflow, WorkflowConfig};
