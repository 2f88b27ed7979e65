//! Bot API implementation of the file and message transports.

use std::path::Path;

use async_trait::async_trait;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::InputFile;
use teloxide::RequestError;
use tracing::debug;

use super::RateLimiter;
use crate::commands::Messenger;
use crate::dispatch::FileRef;
use crate::processing::{FileTransfer, TransferError, Upload};
use crate::storage::AccountId;

/// Downloads and uploads files through the Bot API.
///
/// Every outgoing message goes through one shared [`RateLimiter`].
pub struct TelegramTransfer {
    bot: Bot,
    limiter: RateLimiter,
}

impl TelegramTransfer {
    #[must_use]
    pub const fn new(bot: Bot, limiter: RateLimiter) -> Self {
        Self { bot, limiter }
    }

    async fn note_flood_wait(&self, error: &RequestError) {
        if let RequestError::RetryAfter(wait) = error {
            self.limiter.handle_flood_wait(wait.duration()).await;
        }
    }
}

pub(crate) const fn chat_of(user: AccountId) -> ChatId {
    ChatId(user.0)
}

fn request_error(e: impl std::fmt::Display) -> TransferError {
    TransferError::Request(e.to_string())
}

#[async_trait]
impl FileTransfer for TelegramTransfer {
    async fn download(&self, file: &FileRef, dest: &Path) -> Result<(), TransferError> {
        let meta = self
            .bot
            .get_file(file.id.clone())
            .await
            .map_err(request_error)?;

        let mut out = tokio::fs::File::create(dest).await?;
        self.bot
            .download_file(&meta.path, &mut out)
            .await
            .map_err(request_error)?;
        out.sync_all().await?;

        debug!("Downloaded {} ({} bytes)", file.display_name(), meta.size);
        Ok(())
    }

    async fn upload(&self, to: AccountId, upload: Upload<'_>) -> Result<i32, TransferError> {
        self.limiter.wait_and_acquire().await;

        let document = InputFile::file(upload.path).file_name(upload.file_name.to_owned());
        let mut request = self.bot.send_document(chat_of(to), document);
        if let Some(caption) = upload.caption {
            request = request.caption(caption);
        }
        if let Some(thumb) = upload.thumb {
            request = request.thumbnail(InputFile::file(thumb));
        }

        match request.await {
            Ok(message) => Ok(message.id.0),
            Err(e) => {
                self.note_flood_wait(&e).await;
                Err(request_error(e))
            }
        }
    }
}

#[async_trait]
impl Messenger for TelegramTransfer {
    async fn send_text(&self, to: AccountId, text: &str) -> Result<(), TransferError> {
        self.limiter.wait_and_acquire().await;

        match self.bot.send_message(chat_of(to), text).await {
            Ok(_) => Ok(()),
            Err(e) => {
                self.note_flood_wait(&e).await;
                Err(request_error(e))
            }
        }
    }
}

impl std::fmt::Debug for TelegramTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramTransfer")
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}
