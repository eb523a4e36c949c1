//! Direct-to-S3 uploads through presigned POST forms
//!
//! Every entry is posted as `multipart/form-data` to its presigned `url`:
//! the presigned `fields` first, then the file under `file`. Progress is
//! reported while the body streams out; the bucket answers `204 No Content`
//! on success.

use crate::{Error, Result};
use bytes::Bytes;
use futures::stream;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Chunk size of the streamed file body
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Presigned POST target handed out by the server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadMeta {
    pub url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, String>,
}

/// One file selected for upload
#[derive(Debug, Clone)]
pub struct UploadEntry {
    /// Entry reference used in progress events
    pub reference: String,
    pub meta: UploadMeta,
    pub file_name: String,
    pub content_type: Option<String>,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadStatus {
    /// Percent sent; `100` only once the bucket accepted the file
    Progress(u8),
    Error(String),
}

/// Progress notification for one entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadEvent {
    pub reference: String,
    pub status: UploadStatus,
}

/// Uploads entries straight to the bucket
#[derive(Debug, Clone)]
pub struct S3Uploader {
    client: reqwest::Client,
    chunk_size: usize,
}

/// In-flight uploads started by one [`S3Uploader::upload`] call
///
/// Dropping the handle aborts whatever is still in flight.
pub struct UploadHandle {
    abort: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl UploadHandle {
    /// Abort every upload still in flight (the view went away)
    pub fn abort(&self) {
        let _ = self.abort.send(true);
    }

    /// Wait for every upload to finish or abort
    pub async fn join(self) {
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(error = %e, "Upload task panicked");
            }
        }
    }
}

impl S3Uploader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| Error::UploadError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Start uploading every entry concurrently
    pub fn upload(
        &self,
        entries: Vec<UploadEntry>,
        events: mpsc::UnboundedSender<UploadEvent>,
    ) -> UploadHandle {
        let (abort, aborted) = watch::channel(false);

        let tasks = entries
            .into_iter()
            .map(|entry| {
                let uploader = self.clone();
                let events = events.clone();
                let mut aborted = aborted.clone();

                tokio::spawn(async move {
                    let reference = entry.reference.clone();
                    tokio::select! {
                        status = uploader.upload_one(entry, events.clone()) => {
                            let _ = events.send(UploadEvent { reference, status });
                        }
                        _ = aborted.wait_for(|aborted| *aborted) => {
                            debug!(%reference, "Upload aborted");
                        }
                    }
                })
            })
            .collect();

        UploadHandle { abort, tasks }
    }

    #[instrument(skip_all, fields(reference = %entry.reference, bytes = entry.data.len()))]
    async fn upload_one(
        &self,
        entry: UploadEntry,
        events: mpsc::UnboundedSender<UploadEvent>,
    ) -> UploadStatus {
        let form = match self.build_form(&entry, events) {
            Ok(form) => form,
            Err(e) => return UploadStatus::Error(e.to_string()),
        };

        let response = match self.client.post(&entry.meta.url).multipart(form).send().await {
            Ok(response) => response,
            Err(e) => {
                warn!(error = %e, "Upload request failed");
                return UploadStatus::Error(format!("upload request failed: {}", e));
            }
        };

        let status = response.status();
        if status == reqwest::StatusCode::NO_CONTENT {
            info!("Upload complete");
            UploadStatus::Progress(100)
        } else {
            warn!(status = status.as_u16(), "Upload rejected");
            UploadStatus::Error(format!("upload rejected with HTTP {}", status.as_u16()))
        }
    }

    fn build_form(
        &self,
        entry: &UploadEntry,
        events: mpsc::UnboundedSender<UploadEvent>,
    ) -> Result<Form> {
        let mut form = Form::new();
        for (key, value) in &entry.meta.fields {
            form = form.text(key.clone(), value.clone());
        }

        let total = entry.data.len() as u64;
        let loaded = Arc::new(AtomicU64::new(0));
        let reference = entry.reference.clone();

        let chunks: Vec<Bytes> = (0..entry.data.len())
            .step_by(self.chunk_size)
            .map(|start| {
                let end = (start + self.chunk_size).min(entry.data.len());
                entry.data.slice(start..end)
            })
            .collect();

        let body = stream::iter(chunks.into_iter().map(move |chunk| {
            let sent = loaded.fetch_add(chunk.len() as u64, Ordering::SeqCst) + chunk.len() as u64;
            if let Some(percent) = progress_percent(sent, total) {
                let _ = events.send(UploadEvent {
                    reference: reference.clone(),
                    status: UploadStatus::Progress(percent),
                });
            }
            Ok::<Bytes, std::io::Error>(chunk)
        }));

        let mut part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total)
            .file_name(entry.file_name.clone());
        if let Some(content_type) = &entry.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| Error::UploadError(format!("Invalid content type: {}", e)))?;
        }

        Ok(form.part("file", part))
    }
}

/// `round(loaded / total * 100)` while below 100
fn progress_percent(loaded: u64, total: u64) -> Option<u8> {
    if total == 0 {
        return None;
    }
    let percent = (loaded as f64 / total as f64 * 100.0).round();
    (percent < 100.0).then_some(percent as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_percent() {
        assert_eq!(progress_percent(0, 100), Some(0));
        assert_eq!(progress_percent(1, 3), Some(33));
        assert_eq!(progress_percent(2, 3), Some(67));
        assert_eq!(progress_percent(995, 1000), None);
        assert_eq!(progress_percent(1000, 1000), None);
        assert_eq!(progress_percent(5, 0), None);
    }

    #[test]
    fn test_meta_from_server_json() {
        let meta: UploadMeta = serde_json::from_value(serde_json::json!({
            "url": "https://bucket.s3.amazonaws.com",
            "fields": {"key": "photos/1.jpg", "policy": "abc", "x-amz-signature": "sig"}
        }))
        .unwrap();
        assert_eq!(meta.fields.len(), 3);
        assert_eq!(meta.fields["key"], "photos/1.jpg");
    }
}
