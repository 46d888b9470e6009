//! Edit-time file uploads that turn into an `Attachments` field value.

use std::path::PathBuf;

use async_trait::async_trait;

use reviewsync_core::{Attachment, FieldValue};

/// A local file to push to the blob host before a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadFile {
    pub path: PathBuf,
    /// Name shown next to the attachment; defaults to the file name.
    pub filename: String,
}

impl UploadFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self { path, filename }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("upload rejected: {0}")]
    Rejected(String),
    #[error("upload transport error: {0}")]
    Transport(String),
}

/// Pushes a file somewhere publicly fetchable and returns its direct URL.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(&self, file: &UploadFile) -> Result<String, UploadError>;
}

/// Upload every file concurrently and collect the successes.
///
/// Failures are logged and the file is left out. Returns `None` when nothing
/// was uploaded, so callers can skip the field entirely.
pub async fn collect_attachments(uploader: &dyn Uploader, files: &[UploadFile]) -> Option<FieldValue> {
    if files.is_empty() {
        return None;
    }

    let uploads = files.iter().map(|file| async move { (file, uploader.upload(file).await) });
    let results = futures::future::join_all(uploads).await;

    let mut attachments = Vec::with_capacity(files.len());
    for (file, result) in results {
        match result {
            Ok(url) => attachments.push(Attachment {
                url,
                filename: Some(file.filename.clone()),
            }),
            Err(err) => {
                tracing::warn!(file = %file.path.display(), error = %err, "upload failed; omitting file");
            }
        }
    }

    if attachments.is_empty() {
        None
    } else {
        Some(FieldValue::Attachments(attachments))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    struct FakeUploader {
        failing: HashSet<String>,
    }

    #[async_trait]
    impl Uploader for FakeUploader {
        async fn upload(&self, file: &UploadFile) -> Result<String, UploadError> {
            if self.failing.contains(&file.filename) {
                Err(UploadError::Transport("connection reset".into()))
            } else {
                Ok(format!("https://blobs.test/{}", file.filename))
            }
        }
    }

    #[tokio::test]
    async fn failed_uploads_are_omitted() {
        let uploader = FakeUploader {
            failing: ["b.jpg".to_string()].into_iter().collect(),
        };
        let files = vec![
            UploadFile::new("/photos/a.jpg"),
            UploadFile::new("/photos/b.jpg"),
            UploadFile::new("/photos/c.jpg"),
        ];

        let value = collect_attachments(&uploader, &files).await;
        let Some(FieldValue::Attachments(list)) = value.clone() else {
            panic!("expected attachments, got {value:?}");
        };
        let names: Vec<_> = list.iter().filter_map(|a| a.filename.as_deref()).collect();
        assert_eq!(names, vec!["a.jpg", "c.jpg"]);
        assert_eq!(list[0].url, "https://blobs.test/a.jpg");
    }

    #[tokio::test]
    async fn all_failures_yield_no_field() {
        let uploader = FakeUploader {
            failing: ["a.jpg".to_string()].into_iter().collect(),
        };
        let value = collect_attachments(&uploader, &[UploadFile::new("a.jpg")]).await;
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn no_files_yield_no_field() {
        let uploader = FakeUploader {
            failing: HashSet::new(),
        };
        assert_eq!(collect_attachments(&uploader, &[]).await, None);
    }
}
