//! Error types for the anonymous-face crate.
//!
//! Each stage of the request workflow has its own error type so callers can
//! tell where a request stopped. [`Error`] wraps them all and maps each to an
//! HTTP status. Failures while loading the process-wide assets or the signing
//! key are [`StartupError`]s and are fatal to the whole process.

/// The inbound message could not be parsed or does not verify.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The body is not a well-formed message.
    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),

    /// The `id` field does not match the hash of the message contents.
    #[error("message id does not match its contents")]
    IdMismatch,

    /// The `pubkey` field is not a valid x-only public key.
    #[error("invalid author public key: {0}")]
    PublicKey(String),

    /// The `sig` field is not a valid Schnorr signature encoding.
    #[error("invalid signature encoding: {0}")]
    SignatureEncoding(String),

    /// The signature does not verify against the claimed author.
    #[error("signature does not verify against the author key")]
    BadSignature,
}

/// The message parsed but is not something this service should act on.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    /// The message lacks the trigger topic tag.
    #[error("message is not tagged #{0}")]
    MissingTrigger(String),

    /// No URL was found in the message content.
    #[error("message content contains no URL")]
    MissingUrl,
}

/// Retrieving the target image failed.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    /// The request could not be sent or the body could not be read.
    #[error("failed to fetch {url}: {source}")]
    Request {
        /// The URL that was requested.
        url: String,
        /// Underlying transport error.
        #[source]
        source: reqwest::Error,
    },

    /// The remote answered with a non-success status.
    #[error("fetching {url} returned HTTP {status}")]
    Status {
        /// The URL that was requested.
        url: String,
        /// HTTP status code.
        status: u16,
    },

    /// The body was cut off while being read.
    #[error("failed to read body of {url}: {source}")]
    Body {
        /// The URL that was requested.
        url: String,
        /// Underlying read error.
        #[source]
        source: std::io::Error,
    },

    /// The body is larger than the fetcher accepts.
    #[error("{url} is larger than {limit} bytes")]
    TooLarge {
        /// The URL that was requested.
        url: String,
        /// Largest accepted body, in bytes.
        limit: u64,
    },
}

/// The fetched payload could not be turned into pixels, or the result could
/// not be encoded.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The payload is empty.
    #[error("image payload is empty")]
    Empty,

    /// The remote declared a content type that is not an image.
    #[error("remote content is not an image ({0})")]
    NotAnImage(String),

    /// The payload is in a format this service does not accept.
    #[error("unsupported image format: {0}")]
    UnsupportedFormat(String),

    /// The payload claims a supported format but is corrupt.
    #[error("failed to decode image: {0}")]
    Image(#[from] image::ImageError),

    /// Writing the anonymized image failed.
    #[error("failed to encode image: {0}")]
    Encode(image::ImageError),
}

/// Uploading the anonymized image failed.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The upload request could not be sent or the response could not be read.
    #[error("upload failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The upload host answered with a non-success status.
    #[error("upload host returned HTTP {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The upload host answered without a URL.
    #[error("upload host returned an empty location")]
    EmptyLocation,
}

/// Building or signing the reply failed.
#[derive(Debug, thiserror::Error)]
pub enum SigningError {
    /// The message could not be serialized.
    #[error("failed to serialize message: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The freshly signed reply did not verify.
    #[error("signed reply failed verification: {0}")]
    SelfCheck(ParseError),
}

/// The signing secret could not be turned into a key pair.
#[derive(Debug, thiserror::Error)]
pub enum KeyError {
    /// No secret was provided.
    #[error("signing secret is not set")]
    Missing,

    /// The secret is not valid bech32.
    #[error("invalid bech32 secret: {0}")]
    Bech32(String),

    /// The bech32 secret has the wrong human-readable prefix.
    #[error("expected an nsec secret, got prefix {0:?}")]
    WrongPrefix(String),

    /// The secret is not valid hex.
    #[error("invalid hex secret: {0}")]
    Hex(#[from] hex::FromHexError),

    /// The bytes are not a valid secp256k1 secret key.
    #[error("invalid secret key: {0}")]
    Secp(#[from] secp256k1::Error),
}

/// The trained classifier blob is malformed.
#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    /// The blob ended before all declared trees were read.
    #[error("cascade blob truncated at byte {offset} (needed {needed} more)")]
    Truncated {
        /// Offset at which reading stopped.
        offset: usize,
        /// Number of bytes that were missing.
        needed: usize,
    },

    /// The declared tree depth is outside the supported range.
    #[error("unsupported cascade tree depth {0}")]
    Depth(u32),

    /// The blob declares no trees.
    #[error("cascade contains no trees")]
    Empty,
}

/// Errors that prevent the service from starting.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    /// The classifier blob could not be unpacked.
    #[error("cannot unpack classifier: {0}")]
    Cascade(#[from] CascadeError),

    /// The mask raster could not be decoded.
    #[error("cannot decode mask: {0}")]
    Mask(image::ImageError),

    /// The signing key could not be derived.
    #[error("cannot load signing key: {0}")]
    Key(#[from] KeyError),

    /// An asset file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A request failure, tagged by the workflow stage that produced it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Received → Validated: the message did not parse or verify.
    #[error(transparent)]
    Parse(#[from] ParseError),

    /// Received → Validated / TargetExtracted: nothing to act on.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// TargetExtracted → ImageFetched.
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// ImageFetched → Processed.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// Processed → Published.
    #[error(transparent)]
    Publish(#[from] PublishError),

    /// Published → Signed → Emitted.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// Local file access (offline masking only).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// HTTP status code reported to the client for this failure.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Parse(_) | Self::Validation(_) => 400,
            Self::Fetch(_) | Self::Publish(_) => 502,
            Self::Decode(_) | Self::Signing(_) | Self::Io(_) => 500,
        }
    }
}

/// A specialized `Result` type for this crate.
pub type Result<T> = std::result::Result<T, Error>;
