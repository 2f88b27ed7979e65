//! Update routing: commands, file menus, callbacks and action replies.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use teloxide::dispatching::UpdateHandler;
use teloxide::dptree;
use teloxide::prelude::*;
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup, MessageId, ReplyParameters};
use tracing::{debug, info, warn};

use super::safety::is_flagged_name;
use super::shortener::{share_link, Shortener};
use super::TelegramTransfer;
use crate::commands::{BotCommand, CommandHandler};
use crate::dispatch::{ActionDispatcher, ActionRequest, Completion, FileRef, LIMIT_REACHED_MESSAGE};
use crate::processing::FileTransfer;
use crate::quota::QuotaEngine;
use crate::storage::AccountId;

const MENU_TEXT: &str = "Choose an action for this file:";
const CAPTION_PROMPT: &str =
    "Reply to this message with the caption text you'd like saved as your default caption.";
const CAPTION_PROMPT_MARK: &str = "save as your default caption";

/// Shared state of the update handlers.
pub struct BotApp {
    pub quota: QuotaEngine,
    pub dispatcher: ActionDispatcher,
    pub commands: CommandHandler,
    pub transfer: Arc<TelegramTransfer>,
    pub shortener: Option<Shortener>,
    pub bot_username: Option<String>,
    pub thumb_dir: PathBuf,
    pub split_size_mb: u64,
    pub use_nsfw_filter: bool,
}

/// Builds the update handler tree.
pub fn schema() -> UpdateHandler<anyhow::Error> {
    dptree::entry()
        .branch(Update::filter_message().endpoint(
            |bot: Bot, app: Arc<BotApp>, msg: Message| async move {
                if let Err(e) = handle_message(&bot, &app, &msg).await {
                    warn!("Message handler failed: {:#}", e);
                }
                Ok(())
            },
        ))
        .branch(Update::filter_callback_query().endpoint(
            |bot: Bot, app: Arc<BotApp>, q: CallbackQuery| async move {
                if let Err(e) = handle_callback(&bot, &app, &q).await {
                    warn!("Callback handler failed: {:#}", e);
                }
                Ok(())
            },
        ))
}

/// Polls for updates until Ctrl+C.
pub async fn run(bot: Bot, app: Arc<BotApp>) {
    Dispatcher::builder(bot, schema())
        .dependencies(dptree::deps![app])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.kind);
        })
        .error_handler(LoggingErrorHandler::with_custom_text("Dispatcher error"))
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

fn account_of(user: &teloxide::types::User) -> Option<AccountId> {
    i64::try_from(user.id.0).ok().map(AccountId)
}

/// The transferable file carried by a message, if any.
fn media_of(msg: &Message) -> Option<FileRef> {
    if let Some(doc) = msg.document() {
        return Some(FileRef::new(doc.file.id.clone(), doc.file_name.clone()));
    }
    if let Some(video) = msg.video() {
        return Some(FileRef::new(video.file.id.clone(), video.file_name.clone()));
    }
    if let Some(audio) = msg.audio() {
        return Some(FileRef::new(audio.file.id.clone(), audio.file_name.clone()));
    }
    msg.photo()
        .and_then(<[_]>::last)
        .map(|photo| FileRef::photo(photo.file.id.clone()))
}

fn menu_keyboard() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![
        vec![
            InlineKeyboardButton::callback("✍ Rename", "act_rename"),
            InlineKeyboardButton::callback("🗜 Compress", "act_compress"),
            InlineKeyboardButton::callback("✂ Split", "act_split"),
        ],
        vec![
            InlineKeyboardButton::callback("🖼 Set Thumb", "act_setthumb"),
            InlineKeyboardButton::callback("📝 Save Caption", "act_save_caption"),
        ],
        vec![InlineKeyboardButton::callback("❌ Cancel", "act_cancel")],
    ])
}

async fn reply(bot: &Bot, msg: &Message, text: impl Into<String>) -> Result<Message> {
    bot.send_message(msg.chat.id, text)
        .reply_parameters(ReplyParameters::new(msg.id))
        .await
        .context("failed to send reply")
}

async fn handle_message(bot: &Bot, app: &BotApp, msg: &Message) -> Result<()> {
    if !msg.chat.is_private() {
        return Ok(());
    }
    let Some(user) = msg.from.as_ref().and_then(account_of) else {
        return Ok(());
    };

    if let Some(text) = msg.text() {
        let username = app.bot_username.as_deref();
        if let Some(result) = app.commands.try_handle(user, text, username).await {
            let is_start = matches!(
                BotCommand::parse(text, username),
                Some(Ok(BotCommand::Start))
            );
            let mut request = bot
                .send_message(msg.chat.id, result.message)
                .reply_parameters(ReplyParameters::new(msg.id));
            if is_start {
                request = request.reply_markup(InlineKeyboardMarkup::new(vec![vec![
                    InlineKeyboardButton::callback("Help", "help"),
                ]]));
            }
            request.await.context("failed to send command reply")?;
            return Ok(());
        }

        if let Some(replied) = msg.reply_to_message() {
            return handle_text_reply(bot, app, msg, user, text, replied).await;
        }
        return Ok(());
    }

    if let Some(photo) = msg.photo().and_then(<[_]>::last) {
        return save_thumbnail(bot, app, msg, user, FileRef::photo(photo.file.id.clone())).await;
    }

    if media_of(msg).is_some() {
        app.quota.account(user).await?;
        bot.send_message(msg.chat.id, MENU_TEXT)
            .reply_parameters(ReplyParameters::new(msg.id))
            .reply_markup(menu_keyboard())
            .await
            .context("failed to send action menu")?;
    }
    Ok(())
}

async fn save_thumbnail(
    bot: &Bot,
    app: &BotApp,
    msg: &Message,
    user: AccountId,
    photo: FileRef,
) -> Result<()> {
    app.quota.account(user).await?;
    let path = app.thumb_dir.join(format!("{user}.jpg"));
    app.transfer
        .download(&photo, &path)
        .await
        .context("failed to download thumbnail")?;
    app.quota
        .store()
        .set_thumb(user, Some(path.to_string_lossy().into_owned()))
        .await?;

    info!("Saved thumbnail for user {}", user);
    reply(bot, msg, "✅ Thumbnail saved.").await?;
    Ok(())
}

async fn handle_text_reply(
    bot: &Bot,
    app: &BotApp,
    msg: &Message,
    user: AccountId,
    text: &str,
    replied: &Message,
) -> Result<()> {
    let Some(file) = media_of(replied) else {
        let is_caption_prompt = replied.from.as_ref().is_some_and(|u| u.is_bot)
            && replied
                .text()
                .is_some_and(|t| t.to_lowercase().contains(CAPTION_PROMPT_MARK));
        if is_caption_prompt {
            app.quota.account(user).await?;
            app.quota
                .store()
                .set_caption(user, Some(text.trim().to_owned()))
                .await?;
            reply(bot, msg, "✅ Default caption saved.").await?;
        }
        return Ok(());
    };

    if app.use_nsfw_filter && file.name.as_deref().is_some_and(is_flagged_name) {
        info!("Refused flagged file from user {}", user);
        reply(bot, msg, "🚫 File flagged NSFW. Operation aborted.").await?;
        return Ok(());
    }

    let request = ActionRequest::from_reply(user, file, text);
    if request.text.as_deref().is_none_or(str::is_empty) {
        return Ok(());
    }

    let admission = match app.dispatcher.admit(&request).await {
        Ok(admission) => admission,
        Err(e) => {
            reply(bot, msg, e.user_message()).await?;
            return Ok(());
        }
    };

    let status = reply(bot, msg, format!("⏳ Working on {}...", request.kind)).await?;
    let outcome = app.dispatcher.complete(admission).await;
    delete_quietly(bot, msg.chat.id, status.id).await;

    match outcome {
        Ok(done) => send_share_link(bot, app, msg, &done).await,
        Err(e) => {
            reply(bot, msg, e.user_message()).await?;
        }
    }
    Ok(())
}

async fn delete_quietly(bot: &Bot, chat: ChatId, id: MessageId) {
    if let Err(e) = bot.delete_message(chat, id).await {
        debug!("Could not delete status message: {}", e);
    }
}

/// Replies with a link to a single delivered file. Best effort.
async fn send_share_link(bot: &Bot, app: &BotApp, msg: &Message, done: &Completion) {
    let Some(username) = app.bot_username.as_deref() else {
        return;
    };
    if done.processed.sent.len() != 1 {
        return;
    }
    let Some(message_id) = done.processed.first_message() else {
        return;
    };

    let link = share_link(username, message_id);
    let link = match &app.shortener {
        Some(shortener) => shortener.shorten(&link).await,
        None => link,
    };
    if let Err(e) = reply(bot, msg, format!("🔗 Short link: {link}")).await {
        debug!("Share link not sent: {:#}", e);
    }
}

async fn handle_callback(bot: &Bot, app: &BotApp, q: &CallbackQuery) -> Result<()> {
    let data = q.data.as_deref().unwrap_or_default();
    let Some(user) = account_of(&q.from) else {
        return Ok(());
    };
    debug!("Callback {} from {}", data, user);

    let alert = |text: &'static str| {
        bot.answer_callback_query(q.id.clone())
            .text(text)
            .show_alert(true)
    };

    let Some(menu) = q.regular_message() else {
        alert("This message is no longer available.").await?;
        return Ok(());
    };

    if data == "help" {
        bot.edit_message_text(menu.chat.id, menu.id, CommandHandler::help_text())
            .await
            .context("failed to show help")?;
        bot.answer_callback_query(q.id.clone()).await?;
        return Ok(());
    }

    let Some(file_msg) = menu.reply_to_message() else {
        alert("Reply must be to a file message.").await?;
        return Ok(());
    };
    if media_of(file_msg).is_none() {
        alert("Invalid media.").await?;
        return Ok(());
    }

    let prompt = match data {
        "act_cancel" => {
            bot.edit_message_text(menu.chat.id, menu.id, "Cancelled.").await?;
            None
        }
        "act_setthumb" => Some((
            menu.id,
            "Send /thumbnail and then the image. Or just send the image now.".to_owned(),
        )),
        "act_save_caption" => Some((menu.id, CAPTION_PROMPT.to_owned())),
        "act_rename" | "act_compress" | "act_split" => {
            let account = app.quota.account(user).await?;
            if !QuotaEngine::may_perform(&account) {
                alert(LIMIT_REACHED_MESSAGE).await?;
                return Ok(());
            }
            let text = match data {
                "act_rename" => {
                    "✍ Reply to the file with the desired filename (without extension).".to_owned()
                }
                "act_compress" => {
                    "🗜 Reply to the file with the word `compress` to get a zip of it.".to_owned()
                }
                _ => format!(
                    "✂ Reply to the file with the word `split` to split it into {}MB chunks.",
                    app.split_size_mb
                ),
            };
            Some((file_msg.id, text))
        }
        _ => None,
    };

    if let Some((reply_to, text)) = prompt {
        bot.send_message(menu.chat.id, text)
            .reply_parameters(ReplyParameters::new(reply_to))
            .await
            .context("failed to send prompt")?;
    }
    bot.answer_callback_query(q.id.clone()).await?;
    Ok(())
}

impl std::fmt::Debug for BotApp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotApp")
            .field("bot_username", &self.bot_username)
            .field("thumb_dir", &self.thumb_dir)
            .finish_non_exhaustive()
    }
}
