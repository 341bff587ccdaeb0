//! Request workflow: from an inbound message to a signed reply.
//!
//! Each state is a type, and each transition consumes one state and returns
//! the next or the error type of that stage:
//!
//! ```text
//! Received -> Validated -> TargetExtracted -> ImageFetched
//!          -> ImageProcessed -> Published -> Signed -> Emitted
//! ```
//!
//! The first failure ends the request. Nothing is retried and nothing is
//! emitted unless every stage succeeded.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info};

use crate::codec;
use crate::engine::FaceMasker;
use crate::error::{
    DecodeError, FetchError, ParseError, PublishError, Result, SigningError, ValidationError,
};
use crate::event::{Event, UnsignedEvent, TOPIC_TAG};
use crate::http::{normalize_published_url, FetchedImage, Fetcher, Publisher, Upload};
use crate::keys::Keys;

/// Topic label that marks a message for this service.
pub const DEFAULT_TRIGGER_LABEL: &str = "anonymousface";

static URL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https?://[-A-Za-z0-9+&@#/%?=~_|!:,.;()*]+").expect("URL pattern compiles")
});

/// Find the first `http(s)` URL in free text.
#[must_use]
pub fn extract_url(content: &str) -> Option<&str> {
    URL_PATTERN.find(content).map(|m| m.as_str())
}

/// Options controlling which messages are accepted.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Value of the `t` tag a message must carry.
    pub trigger_label: String,
    /// Check the inbound id and signature before acting on a message.
    pub verify_signatures: bool,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            trigger_label: DEFAULT_TRIGGER_LABEL.to_string(),
            verify_signatures: true,
        }
    }
}

/// A message that parsed.
#[derive(Debug)]
pub struct Received {
    event: Event,
}

/// A message that verified and is addressed to this service.
#[derive(Debug)]
pub struct Validated {
    event: Event,
}

/// The URL of the image to anonymize.
#[derive(Debug)]
pub struct TargetExtracted {
    event: Event,
    url: String,
}

/// The downloaded image bytes.
#[derive(Debug)]
pub struct ImageFetched {
    event: Event,
    image: FetchedImage,
}

/// The anonymized, encoded image.
#[derive(Debug)]
pub struct ImageProcessed {
    event: Event,
    png: Vec<u8>,
    faces: usize,
}

/// Where the anonymized image can be found.
#[derive(Debug)]
pub struct Published {
    event: Event,
    url: String,
}

/// The signed reply.
#[derive(Debug)]
pub struct Signed {
    reply: Event,
}

/// The reply, serialized for the response body.
#[derive(Debug)]
pub struct Emitted {
    /// The signed reply.
    pub reply: Event,
    /// Its JSON encoding.
    pub payload: String,
}

impl Received {
    /// Parse the request body.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] if the body is not an event.
    pub fn parse(body: &[u8]) -> std::result::Result<Self, ParseError> {
        Ok(Self {
            event: Event::from_json(body)?,
        })
    }

    /// The parsed message.
    #[must_use]
    pub fn event(&self) -> &Event {
        &self.event
    }

    /// Verify the message and check it carries the trigger label.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError`] if verification is enabled and fails, or
    /// [`ValidationError::MissingTrigger`].
    pub fn validate(self, config: &WorkflowConfig) -> Result<Validated> {
        if config.verify_signatures {
            self.event.verify()?;
        }
        if !self.event.has_tag(TOPIC_TAG, &config.trigger_label) {
            return Err(ValidationError::MissingTrigger(config.trigger_label.clone()).into());
        }
        Ok(Validated { event: self.event })
    }
}

impl Validated {
    /// Pick the first URL out of the message text.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::MissingUrl`] if the content has none.
    pub fn extract_target(self) -> std::result::Result<TargetExtracted, ValidationError> {
        let url = extract_url(&self.event.content)
            .ok_or(ValidationError::MissingUrl)?
            .to_string();
        Ok(TargetExtracted {
            event: self.event,
            url,
        })
    }
}

impl TargetExtracted {
    /// The URL that will be fetched.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Download the target image.
    ///
    /// # Errors
    ///
    /// Returns the fetcher's [`FetchError`].
    pub fn fetch(self, fetcher: &dyn Fetcher) -> std::result::Result<ImageFetched, FetchError> {
        let image = fetcher.fetch(&self.url)?;
        debug!(url = %self.url, bytes = image.bytes.len(), "image fetched");
        Ok(ImageFetched {
            event: self.event,
            image,
        })
    }
}

impl ImageFetched {
    /// Detect, mask and re-encode the image.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload is not a supported image.
    pub fn process(self, masker: &FaceMasker) -> std::result::Result<ImageProcessed, DecodeError> {
        codec::check_content_type(self.image.content_type.as_deref())?;
        let processed = masker.process(&self.image.bytes)?;
        Ok(ImageProcessed {
            event: self.event,
            png: processed.png,
            faces: processed.faces.len(),
        })
    }
}

impl ImageProcessed {
    /// Number of faces that were masked.
    #[must_use]
    pub fn faces(&self) -> usize {
        self.faces
    }

    /// Upload the image and normalize the returned location.
    ///
    /// # Errors
    ///
    /// Returns the publisher's [`PublishError`].
    pub fn publish(self, publisher: &dyn Publisher) -> std::result::Result<Published, PublishError> {
        let upload = Upload::png(self.png);
        debug!(digest = %upload.digest, bytes = upload.bytes.len(), "publishing");
        let location = publisher.publish(upload)?;
        Ok(Published {
            event: self.event,
            url: normalize_published_url(&location),
        })
    }
}

impl Published {
    /// The public URL of the anonymized image.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Build and sign the reply pointing at the published image.
    ///
    /// # Errors
    ///
    /// Returns a [`SigningError`] if the reply cannot be encoded or signed.
    pub fn sign(self, keys: &Keys, created_at: i64) -> std::result::Result<Signed, SigningError> {
        let reply = UnsignedEvent::reply_to(&self.event, keys, self.url, created_at).sign(keys)?;
        Ok(Signed { reply })
    }
}

impl Signed {
    /// Serialize the reply for the response body.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Serialize`] if serialization fails.
    pub fn emit(self) -> std::result::Result<Emitted, SigningError> {
        let payload = serde_json::to_string(&self.reply)?;
        Ok(Emitted {
            reply: self.reply,
            payload,
        })
    }
}

/// Everything a request needs, built once at startup.
pub struct Workflow {
    masker: Arc<FaceMasker>,
    keys: Keys,
    fetcher: Box<dyn Fetcher>,
    publisher: Box<dyn Publisher>,
    config: WorkflowConfig,
}

impl Workflow {
    /// Assemble the workflow from its collaborators.
    #[must_use]
    pub fn new(
        masker: Arc<FaceMasker>,
        keys: Keys,
        fetcher: Box<dyn Fetcher>,
        publisher: Box<dyn Publisher>,
        config: WorkflowConfig,
    ) -> Self {
        Self {
            masker,
            keys,
            fetcher,
            publisher,
            config,
        }
    }

    /// The key replies are signed with.
    #[must_use]
    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Run every stage for one request body, stamping the reply with the
    /// current time.
    ///
    /// # Errors
    ///
    /// Returns the error of the first stage that failed.
    pub fn handle(&self, body: &[u8]) -> Result<Emitted> {
        self.handle_at(body, chrono::Utc::now().timestamp())
    }

    /// Run every stage for one request body with an explicit reply timestamp.
    ///
    /// # Errors
    ///
    /// Returns the error of the first stage that failed.
    pub fn handle_at(&self, body: &[u8], created_at: i64) -> Result<Emitted> {
        let received = Received::parse(body)?;
        let request_id = received.event().id.clone();

        let target = received.validate(&self.config)?.extract_target()?;
        info!(id = %request_id, url = %target.url(), "anonymizing");

        let processed = target
            .fetch(self.fetcher.as_ref())?
            .process(&self.masker)?;
        let faces = processed.faces();

        let published = processed.publish(self.publisher.as_ref())?;
        let url = published.url().to_string();

        let emitted = published.sign(&self.keys, created_at)?.emit()?;
        info!(id = %request_id, reply = %emitted.reply.id, faces, url = %url, "replied");
        Ok(emitted)
    }
}
