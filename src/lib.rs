//! File Renamer Bot Library
//!
//! A Telegram bot that renames, compresses and splits uploaded files under a
//! per-user daily quota.
//!
//! This crate provides the core functionality for:
//! - Persisting user accounts and the action audit log
//! - Lazy 24-hour quota accounting with admin and premium bypass
//! - Gating each file action and delegating it to the processing pipeline
//! - Handling user and admin commands via chat messages

pub mod commands;
pub mod config;
pub mod dispatch;
pub mod processing;
pub mod quota;
pub mod storage;
pub mod telegram;
