//! Request and result types shared by the dispatcher and its collaborators.

use std::fmt;
use std::path::Path;

use crate::storage::AccountId;

/// The quota-governed actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Rename,
    Compress,
    Split,
}

impl ActionKind {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Rename => "rename",
            Self::Compress => "compress",
            Self::Split => "split",
        }
    }

    /// Interprets the text a user replied to a file with.
    ///
    /// `compress` and `split` (any case) select those actions, anything else
    /// is taken as the new file name.
    #[must_use]
    pub fn from_reply(text: &str) -> Self {
        match text.trim().to_lowercase().as_str() {
            "compress" => Self::Compress,
            "split" => Self::Split,
            _ => Self::Rename,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Transport-level reference to an uploaded file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRef {
    /// Opaque id the transport downloads by.
    pub id: String,

    /// Original file name, if the platform reported one.
    pub name: Option<String>,

    /// Photos carry no name and are always JPEG.
    pub is_photo: bool,
}

impl FileRef {
    #[must_use]
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: id.into(),
            name,
            is_photo: false,
        }
    }

    #[must_use]
    pub fn photo(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            is_photo: true,
        }
    }

    /// Extension of the original name including the dot, or `""`.
    #[must_use]
    pub fn extension(&self) -> String {
        if self.is_photo {
            return ".jpg".to_owned();
        }
        self.name
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .map(|ext| format!(".{}", ext.to_string_lossy()))
            .unwrap_or_default()
    }

    /// Name to use when the original one is kept.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ => format!("file{}", self.extension()),
        }
    }
}

/// One inbound action as delivered by the chat transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRequest {
    pub user: AccountId,
    pub kind: ActionKind,
    pub file: FileRef,
    /// Free text that came with the action (the new name for renames).
    pub text: Option<String>,
}

impl ActionRequest {
    /// Builds a request from a text reply to a file.
    #[must_use]
    pub fn from_reply(user: AccountId, file: FileRef, text: &str) -> Self {
        Self {
            user,
            kind: ActionKind::from_reply(text),
            file,
            text: Some(text.trim().to_owned()),
        }
    }
}

/// Inputs handed to the file-processing collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionParams {
    /// Where results are delivered.
    pub owner: AccountId,
    /// Target name without extension (renames only).
    pub new_name: Option<String>,
    /// Saved caption of the owner.
    pub caption: Option<String>,
    /// Saved thumbnail of the owner.
    pub thumb: Option<String>,
}

/// A delivered output file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFile {
    pub message_id: i32,
    pub file_name: String,
}

/// Facts about the produced output, recorded in the audit log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DerivedMetadata {
    /// Name of the produced file (renamed file, archive, or split source).
    pub file_name: String,
    /// Size in bytes of that file.
    pub size: u64,
    /// Number of parts, when the output was split.
    pub parts: Option<usize>,
}

/// Successful collaborator result. Only returned once every output is
/// fully written and delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedFile {
    pub sent: Vec<SentFile>,
    pub metadata: DerivedMetadata,
}

impl ProcessedFile {
    /// The first delivered message, used for share links.
    #[must_use]
    pub fn first_message(&self) -> Option<i32> {
        self.sent.first().map(|s| s.message_id)
    }
}

/// Lifecycle of a single request.
///
/// `AwaitingAction → PermissionChecked → {Rejected | Delegated}`, and from
/// `Delegated` to `Completed` (logged and counted) or `Failed` (cleaned up,
/// not counted).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    AwaitingAction,
    PermissionChecked,
    Rejected,
    Delegated,
    Completed,
    Failed,
}

impl RequestState {
    /// Whether `next` is a legal successor of `self`.
    #[must_use]
    pub const fn can_advance_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::AwaitingAction, Self::PermissionChecked)
                | (Self::PermissionChecked, Self::Rejected | Self::Delegated)
                | (Self::Delegated, Self::Completed | Self::Failed)
        )
    }

    #[cfg(test)]
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Completed | Self::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_from_reply() {
        assert_eq!(ActionKind::from_reply("compress"), ActionKind::Compress);
        assert_eq!(ActionKind::from_reply("  SPLIT "), ActionKind::Split);
        assert_eq!(ActionKind::from_reply("holiday video"), ActionKind::Rename);
    }

    #[test]
    fn test_extension() {
        assert_eq!(FileRef::new("a", Some("movie.mkv".to_owned())).extension(), ".mkv");
        assert_eq!(FileRef::new("a", Some("archive.tar.gz".to_owned())).extension(), ".gz");
        assert_eq!(FileRef::new("a", Some("README".to_owned())).extension(), "");
        assert_eq!(FileRef::new("a", None).extension(), "");
        assert_eq!(FileRef::photo("p").extension(), ".jpg");
    }

    #[test]
    fn test_display_name_fallback() {
        assert_eq!(FileRef::new("a", Some("doc.pdf".to_owned())).display_name(), "doc.pdf");
        assert_eq!(FileRef::new("a", None).display_name(), "file");
        assert_eq!(FileRef::photo("p").display_name(), "file.jpg");
    }

    #[test]
    fn test_request_state_transitions() {
        use RequestState::*;

        assert!(AwaitingAction.can_advance_to(PermissionChecked));
        assert!(PermissionChecked.can_advance_to(Rejected));
        assert!(PermissionChecked.can_advance_to(Delegated));
        assert!(Delegated.can_advance_to(Completed));
        assert!(Delegated.can_advance_to(Failed));

        assert!(!AwaitingAction.can_advance_to(Delegated));
        assert!(!Rejected.can_advance_to(Delegated));
        assert!(!Completed.can_advance_to(Failed));

        assert!(Rejected.is_terminal());
        assert!(!Delegated.is_terminal());
    }
}
