//! Acceptance rules for files attached to a report submission.

use sha2::{Digest, Sha256};

use crate::error::ApiError;
use crate::storage::BlobStore;

/// (extension, sniffed MIME types that may carry it)
const ALLOWED: &[(&str, &[&str])] = &[
    ("jpg", &["image/jpeg"]),
    ("jpeg", &["image/jpeg"]),
    ("png", &["image/png"]),
    ("gif", &["image/gif"]),
    ("pdf", &["application/pdf"]),
    ("doc", &["application/msword", "application/x-ole-storage"]),
    ("docx", &["application/vnd.openxmlformats-officedocument.wordprocessingml.document", "application/zip"]),
];

/// An upload that passed the type and size checks but is not stored yet.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub key: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    /// Check an uploaded file against the allow-list. Both the file name's
    /// extension and the sniffed content must agree.
    pub fn accept(file_name: &str, bytes: Vec<u8>, max_bytes: usize) -> Result<Self, ApiError> {
        if bytes.is_empty() {
            return Err(ApiError::field("file", "File is empty"));
        }
        if bytes.len() > max_bytes {
            return Err(ApiError::field("file", format!("File exceeds the {max_bytes} byte limit")));
        }
        let ext = file_name
            .rsplit_once('.')
            .map(|(_, e)| e.to_ascii_lowercase())
            .unwrap_or_default();
        let Some((ext, mimes)) = ALLOWED.iter().find(|(e, _)| *e == ext) else {
            return Err(ApiError::field("file", "Only images and documents are allowed"));
        };
        let sniffed = infer::get(&bytes).map(|t| t.mime_type());
        let content_type = match sniffed {
            Some(m) if mimes.contains(&m) => mimes[0].to_string(),
            _ => return Err(ApiError::field("file", "File content does not match its type")),
        };
        let hash = hex::encode(Sha256::digest(&bytes));
        Ok(Self { key: format!("{hash}.{ext}"), content_type, bytes })
    }

    /// Persist to the blob store and return the reference for the report row.
    pub async fn store(self, blobs: &dyn BlobStore) -> Result<String, ApiError> {
        blobs.put(&self.key, &self.content_type, &self.bytes).await?;
        Ok(self.key)
    }
}
