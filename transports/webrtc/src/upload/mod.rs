//! External uploaders for live file inputs

pub mod s3;

pub use s3::{S3Uploader, UploadEntry, UploadEvent, UploadHandle, UploadMeta, UploadStatus};
