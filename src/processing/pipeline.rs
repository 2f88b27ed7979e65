//! Download → transform → upload pipeline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info};

use super::{sanitize_file_name, split_file, zip_file, ProcessingError, Scratch};
use crate::dispatch::{
    ActionKind, ActionParams, DerivedMetadata, FileProcessor, FileRef, ProcessedFile, SentFile,
};
use crate::storage::AccountId;

/// Errors raised by a [`FileTransfer`] implementation.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// An output file to deliver.
#[derive(Debug, Clone, Copy)]
pub struct Upload<'a> {
    pub path: &'a Path,
    pub file_name: &'a str,
    pub caption: Option<&'a str>,
    pub thumb: Option<&'a Path>,
}

/// Moves files between the chat platform and local disk.
#[async_trait]
pub trait FileTransfer: Send + Sync {
    /// Downloads `file` to `dest`. Only returns `Ok` once `dest` is complete.
    async fn download(&self, file: &FileRef, dest: &Path) -> Result<(), TransferError>;

    /// Sends a document to `to`, returning the id of the sent message.
    async fn upload(&self, to: AccountId, upload: Upload<'_>) -> Result<i32, TransferError>;
}

/// Size limits applied when producing outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferLimits {
    /// Size of each part when splitting.
    pub split_size: u64,
    /// Largest file sent in one piece.
    pub max_upload: u64,
}

impl TransferLimits {
    #[must_use]
    pub const fn from_mb(split_size_mb: u64, max_upload_mb: u64) -> Self {
        Self {
            split_size: split_size_mb * 1024 * 1024,
            max_upload: max_upload_mb * 1024 * 1024,
        }
    }
}

/// Production file-processing collaborator.
pub struct TransferPipeline {
    transfer: Arc<dyn FileTransfer>,
    limits: TransferLimits,
}

impl TransferPipeline {
    #[must_use]
    pub fn new(transfer: Arc<dyn FileTransfer>, limits: TransferLimits) -> Self {
        Self { transfer, limits }
    }

    async fn rename(
        &self,
        file: &FileRef,
        params: &ActionParams,
        scratch: &mut Scratch,
    ) -> Result<ProcessedFile, ProcessingError> {
        let new_name = params
            .new_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ProcessingError::InvalidInput("missing file name".to_owned()))?;
        let final_name = sanitize_file_name(&format!("{new_name}{}", file.extension()));

        let path = scratch.file(&final_name).await?;
        self.transfer.download(file, &path).await?;

        let size = tokio::fs::metadata(&path).await?.len();
        if size > self.limits.max_upload {
            return Err(ProcessingError::TooLarge {
                size,
                max: self.limits.max_upload,
            });
        }

        let caption = params
            .caption
            .clone()
            .unwrap_or_else(|| format!("✅ Renamed: {final_name}"));
        let thumb = existing_thumb(params.thumb.as_deref()).await;

        let message_id = self
            .transfer
            .upload(
                params.owner,
                Upload {
                    path: &path,
                    file_name: &final_name,
                    caption: Some(&caption),
                    thumb: thumb.as_deref(),
                },
            )
            .await?;

        info!("Renamed file delivered as {}", final_name);
        Ok(ProcessedFile {
            sent: vec![SentFile {
                message_id,
                file_name: final_name.clone(),
            }],
            metadata: DerivedMetadata {
                file_name: final_name,
                size,
                parts: None,
            },
        })
    }

    async fn compress(
        &self,
        file: &FileRef,
        params: &ActionParams,
        scratch: &mut Scratch,
    ) -> Result<ProcessedFile, ProcessingError> {
        let entry_name = sanitize_file_name(&file.display_name());
        let stem = Path::new(&entry_name)
            .file_stem()
            .map_or_else(|| "file".to_owned(), |s| s.to_string_lossy().into_owned());
        let zip_name = format!("{stem}.zip");

        let source = scratch.file("source").await?;
        self.transfer.download(file, &source).await?;

        let zip_path = scratch.file(&zip_name).await?;
        let size = {
            let (src, dest, entry) = (source.clone(), zip_path.clone(), entry_name.clone());
            tokio::task::spawn_blocking(move || zip_file(&src, &dest, &entry)).await??
        };
        debug!("Compressed {} into {} bytes", entry_name, size);

        if size <= self.limits.max_upload {
            let caption = format!("🗜 Compressed: {zip_name}");
            let message_id = self
                .transfer
                .upload(
                    params.owner,
                    Upload {
                        path: &zip_path,
                        file_name: &zip_name,
                        caption: Some(&caption),
                        thumb: None,
                    },
                )
                .await?;

            return Ok(ProcessedFile {
                sent: vec![SentFile {
                    message_id,
                    file_name: zip_name.clone(),
                }],
                metadata: DerivedMetadata {
                    file_name: zip_name,
                    size,
                    parts: None,
                },
            });
        }

        let sent = self.send_parts(params.owner, &zip_path).await?;
        if sent.is_empty() {
            return Err(ProcessingError::InvalidInput("archive is empty".to_owned()));
        }
        Ok(ProcessedFile {
            metadata: DerivedMetadata {
                file_name: zip_name,
                size,
                parts: Some(sent.len()),
            },
            sent,
        })
    }

    async fn split(
        &self,
        file: &FileRef,
        params: &ActionParams,
        scratch: &mut Scratch,
    ) -> Result<ProcessedFile, ProcessingError> {
        let name = sanitize_file_name(&file.display_name());
        let source = scratch.file(&name).await?;
        self.transfer.download(file, &source).await?;
        let size = tokio::fs::metadata(&source).await?.len();

        let sent = self.send_parts(params.owner, &source).await?;
        Ok(ProcessedFile {
            metadata: DerivedMetadata {
                file_name: name,
                size,
                parts: Some(sent.len()),
            },
            sent,
        })
    }

    /// Splits `source` and uploads every part as "Part i/n".
    ///
    /// An empty source yields no parts and sends nothing.
    async fn send_parts(
        &self,
        owner: AccountId,
        source: &Path,
    ) -> Result<Vec<SentFile>, ProcessingError> {
        let parts = {
            let (src, chunk) = (source.to_path_buf(), self.limits.split_size);
            tokio::task::spawn_blocking(move || split_file(&src, chunk)).await??
        };
        let total = parts.len();
        info!("Sending {} parts", total);

        let mut sent = Vec::with_capacity(total);
        for (i, part) in parts.iter().enumerate() {
            let file_name = part
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let caption = format!("Part {}/{}", i + 1, total);
            let message_id = self
                .transfer
                .upload(
                    owner,
                    Upload {
                        path: part,
                        file_name: &file_name,
                        caption: Some(&caption),
                        thumb: None,
                    },
                )
                .await?;
            sent.push(SentFile {
                message_id,
                file_name,
            });
        }

        Ok(sent)
    }
}

/// Resolves the saved thumbnail, skipping it if the file is gone.
async fn existing_thumb(thumb: Option<&str>) -> Option<PathBuf> {
    let path = PathBuf::from(thumb?);
    tokio::fs::try_exists(&path)
        .await
        .unwrap_or(false)
        .then_some(path)
}

#[async_trait]
impl FileProcessor for TransferPipeline {
    async fn perform(
        &self,
        kind: ActionKind,
        file: &FileRef,
        params: &ActionParams,
        scratch: &mut Scratch,
    ) -> Result<ProcessedFile, ProcessingError> {
        match kind {
            ActionKind::Rename => self.rename(file, params, scratch).await,
            ActionKind::Compress => self.compress(file, params, scratch).await,
            ActionKind::Split => self.split(file, params, scratch).await,
        }
    }
}

impl std::fmt::Debug for TransferPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferPipeline")
            .field("limits", &self.limits)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::Mutex;

    use super::*;

    #[derive(Debug, Clone)]
    struct Sent {
        to: AccountId,
        file_name: String,
        caption: Option<String>,
        thumb: bool,
        size: u64,
    }

    struct FakeTransfer {
        content: Vec<u8>,
        fail_upload: bool,
        sent: Mutex<Vec<Sent>>,
    }

    impl FakeTransfer {
        fn new(content: Vec<u8>) -> Self {
            Self {
                content,
                fail_upload: false,
                sent: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FileTransfer for FakeTransfer {
        async fn download(&self, _file: &FileRef, dest: &Path) -> Result<(), TransferError> {
            tokio::fs::write(dest, &self.content).await?;
            Ok(())
        }

        async fn upload(&self, to: AccountId, upload: Upload<'_>) -> Result<i32, TransferError> {
            if self.fail_upload {
                return Err(TransferError::Request("upload rejected".to_owned()));
            }
            let size = tokio::fs::metadata(upload.path).await?.len();
            let mut sent = self.sent.lock().await;
            sent.push(Sent {
                to,
                file_name: upload.file_name.to_owned(),
                caption: upload.caption.map(str::to_owned),
                thumb: upload.thumb.is_some(),
                size,
            });
            Ok(i32::try_from(sent.len()).unwrap_or(i32::MAX))
        }
    }

    fn params(new_name: Option<&str>) -> ActionParams {
        ActionParams {
            owner: AccountId(42),
            new_name: new_name.map(str::to_owned),
            caption: None,
            thumb: None,
        }
    }

    fn pipeline(transfer: &Arc<FakeTransfer>, limits: TransferLimits) -> TransferPipeline {
        TransferPipeline::new(Arc::clone(transfer) as Arc<dyn FileTransfer>, limits)
    }

    const LARGE: TransferLimits = TransferLimits {
        split_size: 1024,
        max_upload: 1024 * 1024,
    };

    #[tokio::test]
    async fn test_rename_keeps_extension() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::new(vec![1u8; 300]));
        let mut scratch = Scratch::new(base.path(), "r1");
        let file = FileRef::new("f1", Some("clip.mp4".to_owned()));

        let out = pipeline(&transfer, LARGE)
            .perform(ActionKind::Rename, &file, &params(Some("holiday")), &mut scratch)
            .await
            .unwrap();

        assert_eq!(out.metadata.file_name, "holiday.mp4");
        assert_eq!(out.metadata.size, 300);
        assert_eq!(out.metadata.parts, None);
        assert_eq!(out.first_message(), Some(1));

        let sent = transfer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, AccountId(42));
        assert_eq!(sent[0].caption.as_deref(), Some("✅ Renamed: holiday.mp4"));
        assert!(!sent[0].thumb);
    }

    #[tokio::test]
    async fn test_rename_uses_saved_caption_and_thumb() {
        let base = tempfile::tempdir().unwrap();
        let thumb = base.path().join("42.jpg");
        std::fs::write(&thumb, b"jpg").unwrap();

        let transfer = Arc::new(FakeTransfer::new(b"abc".to_vec()));
        let mut scratch = Scratch::new(base.path(), "r2");
        let file = FileRef::new("f1", Some("a.txt".to_owned()));
        let params = ActionParams {
            caption: Some("my caption".to_owned()),
            thumb: Some(thumb.display().to_string()),
            ..params(Some("b"))
        };

        pipeline(&transfer, LARGE)
            .perform(ActionKind::Rename, &file, &params, &mut scratch)
            .await
            .unwrap();

        let sent = transfer.sent.lock().await;
        assert_eq!(sent[0].caption.as_deref(), Some("my caption"));
        assert!(sent[0].thumb);
    }

    #[tokio::test]
    async fn test_rename_requires_name() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::new(b"abc".to_vec()));
        let mut scratch = Scratch::new(base.path(), "r3");

        let result = pipeline(&transfer, LARGE)
            .perform(ActionKind::Rename, &FileRef::new("f", None), &params(Some("  ")), &mut scratch)
            .await;

        assert!(matches!(result, Err(ProcessingError::InvalidInput(_))));
        assert!(!scratch.is_materialized());
    }

    #[tokio::test]
    async fn test_rename_too_large() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::new(vec![0u8; 2048]));
        let mut scratch = Scratch::new(base.path(), "r4");
        let limits = TransferLimits {
            split_size: 512,
            max_upload: 1024,
        };

        let result = pipeline(&transfer, limits)
            .perform(ActionKind::Rename, &FileRef::new("f", None), &params(Some("x")), &mut scratch)
            .await;

        assert!(matches!(result, Err(ProcessingError::TooLarge { size: 2048, max: 1024 })));
        assert!(transfer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_compress_single_archive() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::new(b"text ".repeat(500)));
        let mut scratch = Scratch::new(base.path(), "c1");
        let file = FileRef::new("f", Some("report.txt".to_owned()));

        let out = pipeline(&transfer, LARGE)
            .perform(ActionKind::Compress, &file, &params(None), &mut scratch)
            .await
            .unwrap();

        assert_eq!(out.metadata.file_name, "report.zip");
        assert_eq!(out.metadata.parts, None);

        let sent = transfer.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].caption.as_deref(), Some("🗜 Compressed: report.zip"));
        assert_eq!(sent[0].size, out.metadata.size);
    }

    #[tokio::test]
    async fn test_compress_oversized_archive_is_split() {
        let base = tempfile::tempdir().unwrap();
        // xorshift noise does not deflate below the upload limit
        let mut state = 0x2545_f491_u32;
        let content: Vec<u8> = (0..20_000)
            .map(|_| {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                state.to_le_bytes()[0]
            })
            .collect();
        let transfer = Arc::new(FakeTransfer::new(content));
        let mut scratch = Scratch::new(base.path(), "c2");
        let limits = TransferLimits {
            split_size: 4096,
            max_upload: 4096,
        };

        let out = pipeline(&transfer, limits)
            .perform(ActionKind::Compress, &FileRef::new("f", Some("blob.bin".to_owned())), &params(None), &mut scratch)
            .await
            .unwrap();

        let parts = out.metadata.parts.unwrap();
        assert!(parts >= 2);
        assert_eq!(out.sent.len(), parts);

        let sent = transfer.sent.lock().await;
        assert_eq!(sent[0].file_name, "blob.zip.part001");
        assert_eq!(sent[0].caption.as_deref(), Some(format!("Part 1/{parts}").as_str()));
    }

    #[tokio::test]
    async fn test_split_sends_numbered_parts() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::new(vec![9u8; 2500]));
        let mut scratch = Scratch::new(base.path(), "s1");

        let out = pipeline(&transfer, LARGE)
            .perform(ActionKind::Split, &FileRef::new("f", Some("movie.mkv".to_owned())), &params(None), &mut scratch)
            .await
            .unwrap();

        assert_eq!(out.metadata.file_name, "movie.mkv");
        assert_eq!(out.metadata.size, 2500);
        assert_eq!(out.metadata.parts, Some(3));

        let sent = transfer.sent.lock().await;
        let names: Vec<&str> = sent.iter().map(|s| s.file_name.as_str()).collect();
        assert_eq!(names, ["movie.mkv.part001", "movie.mkv.part002", "movie.mkv.part003"]);
        assert_eq!(sent[2].caption.as_deref(), Some("Part 3/3"));
        assert_eq!(sent[2].size, 452);
    }

    #[tokio::test]
    async fn test_split_empty_file_yields_zero_parts() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer::new(Vec::new()));
        let mut scratch = Scratch::new(base.path(), "s2");

        let out = pipeline(&transfer, LARGE)
            .perform(ActionKind::Split, &FileRef::new("f", Some("empty.bin".to_owned())), &params(None), &mut scratch)
            .await
            .unwrap();

        assert!(out.sent.is_empty());
        assert_eq!(out.metadata.size, 0);
        assert_eq!(out.metadata.parts, Some(0));
        assert!(transfer.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_upload_leaves_artifacts_for_cleanup() {
        let base = tempfile::tempdir().unwrap();
        let transfer = Arc::new(FakeTransfer {
            fail_upload: true,
            ..FakeTransfer::new(vec![1u8; 10])
        });
        let mut scratch = Scratch::new(base.path(), "f1");

        let result = pipeline(&transfer, LARGE)
            .perform(ActionKind::Rename, &FileRef::new("f", None), &params(Some("n")), &mut scratch)
            .await;
        assert!(matches!(result, Err(ProcessingError::Transfer(_))));
        assert!(scratch.root().join("n").exists());

        scratch.cleanup().await;
        assert!(!scratch.root().exists());
    }
}
