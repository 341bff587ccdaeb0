//! Outbound HTTP: fetching the target image and publishing the result.
//!
//! Both collaborators are blocking. A request's worker simply waits on them,
//! so a slow remote only holds up its own request.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::CONTENT_TYPE;
use sha2::{Digest, Sha256};

use crate::codec::{OUTPUT_CONTENT_TYPE, OUTPUT_EXTENSION};
use crate::error::{FetchError, PublishError};

/// Largest image body [`HttpFetcher`] reads unless configured otherwise.
pub const DEFAULT_MAX_FETCH_BYTES: u64 = 20 * 1024 * 1024;

/// Upload endpoint used when none is configured.
pub const DEFAULT_UPLOAD_URL: &str = "https://void.cat/upload?cli=true";

/// Header carrying the uploaded file's MIME type.
pub const CONTENT_TYPE_HEADER: &str = "V-Content-Type";
/// Header carrying the hex SHA-256 of the uploaded bytes.
pub const DIGEST_HEADER: &str = "V-Full-Digest";
/// Header carrying the uploaded file's name.
pub const FILENAME_HEADER: &str = "V-Filename";

/// Raw bytes of a fetched resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedImage {
    /// Response body.
    pub bytes: Vec<u8>,
    /// `Content-Type` the remote declared, if any.
    pub content_type: Option<String>,
}

/// Retrieves the image a message links to.
pub trait Fetcher: Send + Sync {
    /// Download `url`.
    ///
    /// # Errors
    ///
    /// Returns a [`FetchError`] on transport failure or a non-2xx status.
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError>;
}

/// An encoded image ready for upload, with its integrity digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Upload {
    /// Encoded image.
    pub bytes: Vec<u8>,
    /// Lowercase hex SHA-256 of `bytes`.
    pub digest: String,
    /// MIME type of `bytes`.
    pub content_type: String,
    /// File name suggested to the host.
    pub filename: String,
}

impl Upload {
    /// Wrap PNG bytes, computing their digest.
    #[must_use]
    pub fn png(bytes: Vec<u8>) -> Self {
        let digest = hex::encode(Sha256::digest(&bytes));
        Self {
            bytes,
            digest,
            content_type: OUTPUT_CONTENT_TYPE.to_string(),
            filename: format!("image.{OUTPUT_EXTENSION}"),
        }
    }
}

/// Stores an encoded image somewhere reachable.
pub trait Publisher: Send + Sync {
    /// Upload the image and return the location the host reports.
    ///
    /// # Errors
    ///
    /// Returns a [`PublishError`] if the host rejects the upload or does not
    /// answer with a location.
    fn publish(&self, upload: Upload) -> Result<String, PublishError>;
}

/// Turn the host's answer into the URL put in the reply.
///
/// Forces `https` and appends the output file extension.
#[must_use]
pub fn normalize_published_url(location: &str) -> String {
    let location = location.trim();
    let mut url = match location.strip_prefix("http://") {
        Some(rest) => format!("https://{rest}"),
        None => location.to_string(),
    };
    let suffix = format!(".{OUTPUT_EXTENSION}");
    if !url.ends_with(&suffix) {
        url.push_str(&suffix);
    }
    url
}

/// [`Fetcher`] backed by a blocking `reqwest` client.
///
/// Bodies larger than the configured limit are refused, either up front from
/// `Content-Length` or once the limit is crossed while reading.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
}

impl HttpFetcher {
    /// Build a fetcher whose requests give up after `timeout`, if set.
    ///
    /// # Errors
    ///
    /// Returns the client builder's error if TLS initialisation fails.
    pub fn new(timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            max_bytes: DEFAULT_MAX_FETCH_BYTES,
        })
    }

    /// Refuse bodies larger than `max_bytes`.
    #[must_use]
    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    /// Largest body accepted, in bytes.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchedImage, FetchError> {
        let request_error = |source| FetchError::Request {
            url: url.to_string(),
            source,
        };

        let response = self.client.get(url).send().map_err(request_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let too_large = || FetchError::TooLarge {
            url: url.to_string(),
            limit: self.max_bytes,
        };
        if response
            .content_length()
            .is_some_and(|len| len > self.max_bytes)
        {
            return Err(too_large());
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        let mut bytes = Vec::new();
        response
            .take(self.max_bytes.saturating_add(1))
            .read_to_end(&mut bytes)
            .map_err(|source| FetchError::Body {
                url: url.to_string(),
                source,
            })?;
        if u64::try_from(bytes.len()).unwrap_or(u64::MAX) > self.max_bytes {
            return Err(too_large());
        }
        Ok(FetchedImage {
            bytes,
            content_type,
        })
    }
}

/// [`Publisher`] that POSTs the image to a file host.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: Client,
    endpoint: String,
}

impl HttpPublisher {
    /// Build a publisher for `endpoint`; requests give up after `timeout`, if set.
    ///
    /// # Errors
    ///
    /// Returns the client builder's error if TLS initialisation fails.
    pub fn new(endpoint: impl Into<String>, timeout: Option<Duration>) -> reqwest::Result<Self> {
        let mut builder = Client::builder();
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        Ok(Self {
            client: builder.build()?,
            endpoint: endpoint.into(),
        })
    }

    /// Where uploads are sent.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Publisher for HttpPublisher {
    fn publish(&self, upload: Upload) -> Result<String, PublishError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(CONTENT_TYPE_HEADER, upload.content_type)
            .header(DIGEST_HEADER, upload.digest)
            .header(FILENAME_HEADER, upload.filename)
            .body(upload.bytes)
            .send()?;

        let status = response.status();
        let body = response.text()?;
        if !status.is_success() {
            return Err(PublishError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let location = body.trim();
        if location.is_empty() {
            return Err(PublishError::EmptyLocation);
        }
        Ok(location.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    /// Answer one request with `status` and `body`, handing back the raw
    /// request once it has been read.
    fn serve_once(status: &str, headers: &str, body: &str) -> (String, JoinHandle<Vec<u8>>) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}/upload", listener.local_addr().unwrap());
        let response = format!(
            "HTTP/1.1 {status}\r\n{headers}Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let request = read_request(&mut stream);
            stream.write_all(response.as_bytes()).ok();
            request
        });
        (url, handle)
    }

    fn read_request(stream: &mut TcpStream) -> Vec<u8> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = stream.read(&mut chunk).unwrap();
            if n == 0 {
                return buf;
            }
            buf.extend_from_slice(&chunk[..n]);
            if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                let head = String::from_utf8_lossy(&buf[..end]).to_ascii_lowercase();
                let len: usize = head
                    .lines()
                    .find_map(|line| line.strip_prefix("content-length:"))
                    .map_or(0, |v| v.trim().parse().unwrap());
                if buf.len() >= end + 4 + len {
                    return buf;
                }
            }
        }
    }

    #[test]
    fn publisher_sends_integrity_headers_and_returns_location() {
        let (url, server) = serve_once("200 OK", "", "http://files.example/d/abc\n");
        let publisher = HttpPublisher::new(url, Some(Duration::from_secs(5))).unwrap();
        let upload = Upload::png(b"fake png bytes".to_vec());
        let digest = upload.digest.clone();

        let location = publisher.publish(upload).unwrap();
        assert_eq!(location, "http://files.example/d/abc");

        let request = server.join().unwrap();
        let text = String::from_utf8_lossy(&request).to_ascii_lowercase();
        assert!(text.starts_with("post /upload"));
        assert!(text.contains(&format!("v-full-digest: {digest}")));
        assert!(text.contains("v-content-type: image/png"));
        assert!(text.contains("v-filename: image.png"));
        assert!(request.ends_with(b"fake png bytes"));
    }

    #[test]
    fn publisher_reports_rejection_with_body() {
        let (url, server) = serve_once("500 Internal Server Error", "", "disk full");
        let publisher = HttpPublisher::new(url, Some(Duration::from_secs(5))).unwrap();
        let err = publisher.publish(Upload::png(vec![1, 2, 3])).unwrap_err();
        server.join().unwrap();
        assert!(matches!(
            err,
            PublishError::Status { status: 500, ref body } if body == "disk full"
        ));
    }

    #[test]
    fn publisher_rejects_blank_location() {
        let (url, server) = serve_once("200 OK", "", "  \n");
        let publisher = HttpPublisher::new(url, Some(Duration::from_secs(5))).unwrap();
        let err = publisher.publish(Upload::png(vec![1])).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, PublishError::EmptyLocation));
    }

    #[test]
    fn fetcher_returns_body_and_content_type() {
        let (url, server) = serve_once("200 OK", "Content-Type: image/png\r\n", "pixels");
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5))).unwrap();
        let image = fetcher.fetch(&url).unwrap();
        server.join().unwrap();
        assert_eq!(image.bytes, b"pixels");
        assert_eq!(image.content_type.as_deref(), Some("image/png"));
    }

    #[test]
    fn fetcher_maps_non_success_to_status() {
        let (url, server) = serve_once("404 Not Found", "", "gone");
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5))).unwrap();
        let err = fetcher.fetch(&url).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, FetchError::Status { status: 404, .. }));
    }

    #[test]
    fn fetcher_refuses_oversized_body() {
        let (url, server) = serve_once("200 OK", "", &"x".repeat(100));
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5)))
            .unwrap()
            .with_max_bytes(16);
        assert_eq!(fetcher.max_bytes(), 16);
        let err = fetcher.fetch(&url).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, FetchError::TooLarge { limit: 16, .. }));
    }

    #[test]
    fn fetcher_accepts_body_at_the_limit() {
        let (url, server) = serve_once("200 OK", "", &"x".repeat(16));
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(5)))
            .unwrap()
            .with_max_bytes(16);
        assert_eq!(fetcher.fetch(&url).unwrap().bytes.len(), 16);
        server.join().unwrap();
    }

    #[test]
    fn upload_digest_is_sha256_of_bytes() {
        let upload = Upload::png(b"abc".to_vec());
        assert_eq!(
            upload.digest,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(upload.content_type, "image/png");
        assert_eq!(upload.filename, "image.png");
    }

    #[test]
    fn normalize_forces_https_and_png_extension() {
        assert_eq!(
            normalize_published_url("http://void.cat/d/AbC\n"),
            "https://void.cat/d/AbC.png"
        );
        assert_eq!(
            normalize_published_url("https://void.cat/d/AbC"),
            "https://void.cat/d/AbC.png"
        );
        assert_eq!(
            normalize_published_url("https://host/x.png"),
            "https://host/x.png"
        );
    }

    #[test]
    fn fetch_of_unreachable_host_is_request_error() {
        let fetcher = HttpFetcher::new(Some(Duration::from_secs(2))).unwrap();
        let err = fetcher.fetch("http://127.0.0.1:9/a.jpg").unwrap_err();
        assert!(matches!(err, FetchError::Request { .. }));
    }
}
