//! Fall-event upload client.
//!
//! One HTTP multipart POST per alert: `image` (JPEG), `location`,
//! `description` and `occurred_at` (ISO-8601 UTC). Any 2xx with a JSON body
//! counts as accepted. No retries happen here.

use anyhow::Context;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::blocking::multipart::{Form, Part};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::fmt;
use std::time::Duration;


pub const DEFAULT_UPLOAD_URL: &str = "http://localhost:8000/api/fall-events/";
pub const DEFAULT_UPLOAD_TIMEOUT: Duration = Duration::from_secs(10);

const SUCCESS_BODY_LOG_CHARS: usize = 200;
const ERROR_BODY_LOG_CHARS: usize = 500;

/// Metadata and image bytes for one upload.
#[derive(Clone, Debug)]
pub struct UploadRequest {
    pub image_jpeg: Vec<u8>,
    pub filename: String,
    pub location: String,
    pub description: String,
    pub occurred_at: DateTime<Utc>,
}

impl UploadRequest {
    pub fn occurred_at_iso(&self) -> String {
        self.occurred_at.to_rfc3339_opts(SecondsFormat::Micros, true)
    }
}

/// What the backend returned for an accepted upload.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct UploadReceipt {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Failure classes for a single upload attempt.
#[derive(Debug)]
pub enum UploadError {
    /// Server unreachable (refused, DNS, reset).
    Connection(String),
    Timeout(String),
    /// Non-2xx response; `body` is truncated.
    Status { code: u16, body: String },
    /// 2xx response whose body was not the expected JSON.
    MalformedResponse(String),
    Io(std::io::Error),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::Connection(msg) => write!(f, "connection failed: {msg}"),
            UploadError::Timeout(msg) => write!(f, "request timed out: {msg}"),
            UploadError::Status { code, body } => write!(f, "http status {code}: {body}"),
            UploadError::MalformedResponse(msg) => write!(f, "malformed response: {msg}"),
            UploadError::Io(err) => write!(f, "io error: {err}"),
        }
    }
}

impl std::error::Error for UploadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            UploadError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Io(err)
    }
}

/// Upload collaborator used by the dispatcher.
pub trait Uploader: Send + Sync {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError>;

    /// Human-readable target for logs.
    fn endpoint(&self) -> &str;
}

/// `reqwest`-backed uploader posting to the fall-event endpoint.
pub struct HttpUploader {
    client: Client,
    url: String,
}

impl HttpUploader {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .context("build upload http client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

impl Uploader for HttpUploader {
    fn upload(&self, request: &UploadRequest) -> Result<UploadReceipt, UploadError> {
        let occurred_at = request.occurred_at_iso();
        log::info!(
            "upload: POST {} ({} bytes, location={}, occurred_at={})",
            self.url,
            request.image_jpeg.len(),
            request.location,
            occurred_at
        );

        let image = Part::bytes(request.image_jpeg.clone())
            .file_name(request.filename.clone())
            .mime_str("image/jpeg")
            .map_err(classify_error)?;
        let form = Form::new()
            .part("image", image)
            .text("location", request.location.clone())
            .text("description", request.description.clone())
            .text("occurred_at", occurred_at);

        let response = self
            .client
            .post(&self.url)
            .multipart(form)
            .send()
            .map_err(classify_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            log::error!(
                "upload: status {} body {}",
                status,
                truncate(&body, ERROR_BODY_LOG_CHARS)
            );
            return Err(UploadError::Status {
                code: status.as_u16(),
                body: truncate(&body, ERROR_BODY_LOG_CHARS).to_string(),
            });
        }

        let text = response.text().map_err(classify_error)?;
        log::info!(
            "upload: status {} body {}",
            status,
            truncate(&text, SUCCESS_BODY_LOG_CHARS)
        );

        let receipt: UploadReceipt = serde_json::from_str(&text)
            .map_err(|err| UploadError::MalformedResponse(err.to_string()))?;
        match &receipt.image_url {
            Some(url) => log::info!("upload: accepted, image_url {}", url),
            None => log::warn!("upload: accepted but response has no image_url"),
        }
        Ok(receipt)
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}

fn classify_error(err: reqwest::Error) -> UploadError {
    if err.is_timeout() {
        return UploadError::Timeout(err.to_string());
    }
    if err.is_connect() {
        return UploadError::Connection(err.to_string());
    }
    if let Some(status) = err.status() {
        return UploadError::Status {
            code: status.as_u16(),
            body: String::new(),
        };
    }
    if err.is_decode() || err.is_body() {
        return UploadError::MalformedResponse(err.to_string());
    }
    // Anything else kept the request from completing.
    UploadError::Connection(err.to_string())
}

/// Longest prefix of `text` with at most `max_chars` characters.
pub(crate) fn truncate(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
