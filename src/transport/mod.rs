//! HTTP transport to the fall-event backend.
//!
//! - `upload`: multipart POST of one alert image plus metadata
//! - `api`: list/detail queries against stored events

pub mod api;
pub mod upload;

pub use api::{BackendClient, FallEventRecord};
pub use upload::{
    HttpUploader, UploadError, UploadReceipt, UploadRequest, Uploader, DEFAULT_UPLOAD_TIMEOUT,
    DEFAULT_UPLOAD_URL,
};
