//! Per-request gating state machine.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::{ActionKind, ActionParams, ActionRequest, FileProcessor, ProcessedFile, RequestState};
use crate::processing::{ProcessingError, Scratch};
use crate::quota::QuotaEngine;
use crate::storage::{AccountId, LogAction, LogDetails, LogEntry, StoreError};

/// Rejection text shown when the daily limit is exhausted.
pub const LIMIT_REACHED_MESSAGE: &str =
    "🚫 Daily limit reached. Ask admin to increase your limit or purchase premium.";

/// Why a request did not complete.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("Daily limit reached ({used}/{limit})")]
    QuotaExceeded { used: u32, limit: i64 },

    #[error("Operation failed: {0}")]
    Collaborator(#[from] ProcessingError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl DispatchError {
    /// Text to show the requesting user.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::QuotaExceeded { .. } => LIMIT_REACHED_MESSAGE.to_owned(),
            Self::Collaborator(e) => format!("❌ Operation failed: {e}"),
            Self::Store(_) => "❌ Something went wrong. Please try again later.".to_owned(),
        }
    }

    /// Terminal state the request ended in.
    #[must_use]
    pub const fn state(&self) -> RequestState {
        match self {
            Self::QuotaExceeded { .. } => RequestState::Rejected,
            Self::Collaborator(_) | Self::Store(_) => RequestState::Failed,
        }
    }
}

/// A counted and logged action.
#[derive(Debug, Clone)]
pub struct Completion {
    pub kind: ActionKind,
    pub processed: ProcessedFile,
    pub log: LogEntry,
}

/// A request that passed the permission check and may be delegated.
#[derive(Debug)]
pub struct Admission<'a> {
    request: &'a ActionRequest,
    label: String,
    state: RequestState,
    params: ActionParams,
}

impl Admission<'_> {
    #[must_use]
    pub const fn request(&self) -> &ActionRequest {
        self.request
    }
}

/// Runs quota-governed actions.
///
/// Holds no per-user state: each request re-reads its account through the
/// quota engine.
pub struct ActionDispatcher {
    quota: QuotaEngine,
    processor: Arc<dyn FileProcessor>,
    scratch_base: PathBuf,
    sequence: AtomicU64,
}

impl ActionDispatcher {
    #[must_use]
    pub fn new(
        quota: QuotaEngine,
        processor: Arc<dyn FileProcessor>,
        scratch_base: impl Into<PathBuf>,
    ) -> Self {
        Self {
            quota,
            processor,
            scratch_base: scratch_base.into(),
            sequence: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub const fn quota(&self) -> &QuotaEngine {
        &self.quota
    }

    /// Processes one request from permission check to completion.
    pub async fn handle(&self, request: &ActionRequest) -> Result<Completion, DispatchError> {
        let admission = self.admit(request).await?;
        self.complete(admission).await
    }

    /// Runs the permission check, refreshing a stale counter first.
    ///
    /// Nothing is created on disk and nothing is counted here.
    pub async fn admit<'a>(
        &self,
        request: &'a ActionRequest,
    ) -> Result<Admission<'a>, DispatchError> {
        let label = self.next_label(request.user);
        let mut state = RequestState::AwaitingAction;

        let account = self.quota.account(request.user).await?;
        advance(&label, &mut state, RequestState::PermissionChecked);

        if !QuotaEngine::may_perform(&account) {
            advance(&label, &mut state, RequestState::Rejected);
            info!(
                "User {} hit the daily limit ({}/{}), {} rejected",
                account.id, account.daily_count, account.limit, request.kind
            );
            return Err(DispatchError::QuotaExceeded {
                used: account.daily_count,
                limit: account.limit,
            });
        }

        let params = ActionParams {
            owner: request.user,
            new_name: match request.kind {
                ActionKind::Rename => request.text.clone(),
                ActionKind::Compress | ActionKind::Split => None,
            },
            caption: account.caption,
            thumb: account.thumb,
        };
        Ok(Admission {
            request,
            label,
            state,
            params,
        })
    }

    /// Delegates an admitted request and records it if it succeeded.
    ///
    /// A store failure after delivery is logged and the completion is still
    /// returned, since the user already has the output.
    pub async fn complete(&self, admission: Admission<'_>) -> Result<Completion, DispatchError> {
        let Admission {
            request,
            label,
            mut state,
            params,
        } = admission;
        advance(&label, &mut state, RequestState::Delegated);

        let mut scratch = Scratch::new(&self.scratch_base, &label);
        let result = self
            .processor
            .perform(request.kind, &request.file, &params, &mut scratch)
            .await;
        scratch.cleanup().await;

        let processed = match result {
            Ok(processed) => processed,
            Err(e) => {
                advance(&label, &mut state, RequestState::Failed);
                warn!("{} for user {} failed: {}", request.kind, request.user, e);
                return Err(e.into());
            }
        };

        let log = log_entry(request.user, request.kind, &processed, self.quota.now());
        if let Err(e) = self.quota.record_usage(request.user).await {
            error!("{} delivered to user {} but not counted: {}", request.kind, request.user, e);
        } else if let Err(e) = self.quota.store().append_log(&log).await {
            error!("{} counted for user {} but not logged: {}", request.kind, request.user, e);
        }
        advance(&label, &mut state, RequestState::Completed);

        info!(
            "{} completed for user {} ({})",
            log.action, request.user, processed.metadata.file_name
        );
        Ok(Completion {
            kind: request.kind,
            processed,
            log,
        })
    }

    fn next_label(&self, user: AccountId) -> String {
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}_{}", user, Utc::now().timestamp_millis(), seq)
    }
}

fn advance(label: &str, state: &mut RequestState, next: RequestState) {
    debug_assert!(state.can_advance_to(next), "{state:?} -> {next:?}");
    debug!("Request {}: {:?} -> {:?}", label, state, next);
    *state = next;
}

/// Builds the audit record of a completed action.
fn log_entry(
    user: AccountId,
    kind: ActionKind,
    processed: &ProcessedFile,
    time: DateTime<Utc>,
) -> LogEntry {
    let meta = &processed.metadata;
    let (action, details) = match (kind, meta.parts) {
        (ActionKind::Rename, _) => (
            LogAction::Rename,
            LogDetails {
                new_name: Some(meta.file_name.clone()),
                size: Some(meta.size),
                ..LogDetails::default()
            },
        ),
        (ActionKind::Compress, None) => (
            LogAction::Compress,
            LogDetails {
                file: Some(meta.file_name.clone()),
                size: Some(meta.size),
                ..LogDetails::default()
            },
        ),
        (ActionKind::Compress, Some(parts)) => (
            LogAction::CompressSplit,
            LogDetails {
                file: Some(meta.file_name.clone()),
                parts: Some(parts),
                ..LogDetails::default()
            },
        ),
        (ActionKind::Split, parts) => (
            LogAction::Split,
            LogDetails {
                file: Some(meta.file_name.clone()),
                parts: Some(parts.unwrap_or(0)),
                ..LogDetails::default()
            },
        ),
    };
    LogEntry::new(user, action, time, details)
}

impl std::fmt::Debug for ActionDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActionDispatcher")
            .field("scratch_base", &self.scratch_base)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use async_trait::async_trait;
    use chrono::Duration;
    use tokio::sync::Mutex;

    use super::*;
    use crate::dispatch::{DerivedMetadata, FileRef, SentFile};
    use crate::quota::{Clock, ManualClock};
    use crate::storage::{AccountDefaults, AccountPatch, MemoryStore, UserAccount, UserStore};

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Script {
        Succeed,
        SucceedInParts(usize),
        Fail,
    }

    /// Collaborator that writes a temp file and then follows its script.
    struct FakeProcessor {
        script: Script,
        calls: Mutex<Vec<ActionParams>>,
    }

    impl FakeProcessor {
        fn new(script: Script) -> Arc<Self> {
            Arc::new(Self {
                script,
                calls: Mutex::new(Vec::new()),
            })
        }

        async fn call_count(&self) -> usize {
            self.calls.lock().await.len()
        }
    }

    #[async_trait]
    impl FileProcessor for FakeProcessor {
        async fn perform(
            &self,
            kind: ActionKind,
            file: &FileRef,
            params: &ActionParams,
            scratch: &mut Scratch,
        ) -> Result<ProcessedFile, ProcessingError> {
            self.calls.lock().await.push(params.clone());
            let path = scratch.file("download").await?;
            tokio::fs::write(&path, b"partial").await?;

            let file_name = match kind {
                ActionKind::Rename => format!(
                    "{}{}",
                    params.new_name.clone().unwrap_or_default(),
                    file.extension()
                ),
                ActionKind::Compress => "archive.zip".to_owned(),
                ActionKind::Split => file.display_name(),
            };
            match self.script {
                Script::Fail => Err(ProcessingError::InvalidInput("upload failed".to_owned())),
                Script::Succeed => Ok(ProcessedFile {
                    sent: vec![SentFile {
                        message_id: 10,
                        file_name: file_name.clone(),
                    }],
                    metadata: DerivedMetadata {
                        file_name,
                        size: 7,
                        parts: None,
                    },
                }),
                Script::SucceedInParts(parts) => Ok(ProcessedFile {
                    sent: (0..parts)
                        .map(|i| SentFile {
                            message_id: i32::try_from(i).unwrap_or_default(),
                            file_name: format!("{file_name}.part{:03}", i + 1),
                        })
                        .collect(),
                    metadata: DerivedMetadata {
                        file_name,
                        size: 7,
                        parts: Some(parts),
                    },
                }),
            }
        }
    }

    struct Fixture {
        dispatcher: ActionDispatcher,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
        processor: Arc<FakeProcessor>,
        scratch: tempfile::TempDir,
    }

    fn fixture(script: Script) -> Fixture {
        let store = Arc::new(MemoryStore::new(AccountDefaults::new(2, [AccountId(1)])));
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let processor = FakeProcessor::new(script);
        let scratch = tempfile::tempdir().unwrap();

        let quota = QuotaEngine::new(
            Arc::clone(&store) as Arc<dyn UserStore>,
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        let dispatcher = ActionDispatcher::new(
            quota,
            Arc::clone(&processor) as Arc<dyn FileProcessor>,
            scratch.path(),
        );

        Fixture {
            dispatcher,
            store,
            clock,
            processor,
            scratch,
        }
    }

    fn rename(user: i64, name: &str) -> ActionRequest {
        ActionRequest::from_reply(
            AccountId(user),
            FileRef::new("file-1", Some("video.mp4".to_owned())),
            name,
        )
    }

    fn is_empty_dir(path: &Path) -> bool {
        std::fs::read_dir(path).map(|mut d| d.next().is_none()).unwrap_or(true)
    }

    async fn count(store: &MemoryStore, user: i64) -> u32 {
        store.get(AccountId(user)).await.unwrap().unwrap().daily_count
    }

    #[tokio::test]
    async fn test_two_renames_then_limit() {
        let f = fixture(Script::Succeed);

        for name in ["first", "second"] {
            let done = f.dispatcher.handle(&rename(5, name)).await.unwrap();
            assert_eq!(done.kind, ActionKind::Rename);
        }
        assert_eq!(count(&f.store, 5).await, 2);

        let third = f.dispatcher.handle(&rename(5, "third")).await;
        assert!(matches!(
            third,
            Err(DispatchError::QuotaExceeded { used: 2, limit: 2 })
        ));
        assert_eq!(f.processor.call_count().await, 2);
        assert_eq!(count(&f.store, 5).await, 2);

        let logs = f.store.logs_for(AccountId(5)).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].action, LogAction::Rename);
        assert_eq!(logs[0].details.new_name.as_deref(), Some("first.mp4"));
        assert_eq!(logs[0].details.size, Some(7));
    }

    #[tokio::test]
    async fn test_failure_is_not_counted() {
        let f = fixture(Script::Fail);

        let result = f.dispatcher.handle(&rename(5, "name")).await;
        let err = result.unwrap_err();
        assert!(matches!(err, DispatchError::Collaborator(_)));
        assert_eq!(err.state(), RequestState::Failed);
        assert!(err.user_message().starts_with("❌ Operation failed"));

        assert_eq!(count(&f.store, 5).await, 0);
        assert!(f.store.logs_for(AccountId(5)).await.unwrap().is_empty());
        assert!(is_empty_dir(f.scratch.path()));
    }

    #[tokio::test]
    async fn test_success_cleans_up_scratch() {
        let f = fixture(Script::Succeed);
        f.dispatcher.handle(&rename(5, "name")).await.unwrap();
        assert!(is_empty_dir(f.scratch.path()));
    }

    #[tokio::test]
    async fn test_rejection_has_no_side_effects() {
        let f = fixture(Script::Succeed);
        f.dispatcher.quota().set_limit(AccountId(5), 0).await.unwrap();

        let err = f.dispatcher.handle(&rename(5, "name")).await.unwrap_err();
        assert_eq!(err.state(), RequestState::Rejected);
        assert_eq!(err.user_message(), LIMIT_REACHED_MESSAGE);

        assert_eq!(f.processor.call_count().await, 0);
        assert!(is_empty_dir(f.scratch.path()));
        assert_eq!(count(&f.store, 5).await, 0);
    }

    #[tokio::test]
    async fn test_stale_counter_is_reset_before_check() {
        let f = fixture(Script::Succeed);
        let user = AccountId(5);
        f.dispatcher.quota().account(user).await.unwrap();
        for _ in 0..5 {
            f.dispatcher.quota().record_usage(user).await.unwrap();
        }
        assert!(f.dispatcher.handle(&rename(5, "x")).await.is_err());

        f.clock.advance(Duration::hours(25));
        f.dispatcher.handle(&rename(5, "x")).await.unwrap();
        assert_eq!(count(&f.store, 5).await, 1);
    }

    #[tokio::test]
    async fn test_admin_and_premium_bypass_limit() {
        let f = fixture(Script::Succeed);
        f.dispatcher.quota().set_premium(AccountId(6), true).await.unwrap();

        for _ in 0..5 {
            f.dispatcher.handle(&rename(1, "admin")).await.unwrap();
            f.dispatcher.handle(&rename(6, "premium")).await.unwrap();
        }
        assert_eq!(count(&f.store, 1).await, 5);
        assert_eq!(count(&f.store, 6).await, 5);
    }

    #[tokio::test]
    async fn test_params_carry_saved_preferences() {
        let f = fixture(Script::Succeed);
        f.store.ensure(AccountId(5), Utc::now()).await.unwrap();
        f.store.set_caption(AccountId(5), Some("cap".to_owned())).await.unwrap();
        f.store.set_thumb(AccountId(5), Some("thumbs/5.jpg".to_owned())).await.unwrap();

        f.dispatcher.handle(&rename(5, "  new name ")).await.unwrap();

        let calls = f.processor.calls.lock().await;
        assert_eq!(calls[0].owner, AccountId(5));
        assert_eq!(calls[0].new_name.as_deref(), Some("new name"));
        assert_eq!(calls[0].caption.as_deref(), Some("cap"));
        assert_eq!(calls[0].thumb.as_deref(), Some("thumbs/5.jpg"));
    }

    #[tokio::test]
    async fn test_compress_in_parts_is_logged_as_compress_split() {
        let f = fixture(Script::SucceedInParts(3));
        let request = ActionRequest::from_reply(
            AccountId(5),
            FileRef::new("file-1", Some("big.iso".to_owned())),
            "compress",
        );

        let done = f.dispatcher.handle(&request).await.unwrap();
        assert_eq!(done.kind, ActionKind::Compress);
        assert_eq!(done.log.action, LogAction::CompressSplit);
        assert_eq!(done.log.details.parts, Some(3));
        assert_eq!(done.log.details.file.as_deref(), Some("archive.zip"));

        let calls = f.processor.calls.lock().await;
        assert!(calls[0].new_name.is_none());
    }

    #[tokio::test]
    async fn test_split_is_logged_with_parts() {
        let f = fixture(Script::SucceedInParts(2));
        let request = ActionRequest::from_reply(
            AccountId(5),
            FileRef::new("file-1", Some("big.iso".to_owned())),
            "split",
        );

        let done = f.dispatcher.handle(&request).await.unwrap();
        assert_eq!(done.log.action, LogAction::Split);
        assert_eq!(done.log.details.file.as_deref(), Some("big.iso"));
        assert_eq!(done.log.details.parts, Some(2));
    }

    #[tokio::test]
    async fn test_concurrent_requests_count_exactly() {
        let f = fixture(Script::Succeed);
        f.dispatcher.quota().set_limit(AccountId(5), 100).await.unwrap();
        let dispatcher = Arc::new(f.dispatcher);

        let mut handles = Vec::new();
        for i in 0..10 {
            let dispatcher = Arc::clone(&dispatcher);
            handles.push(tokio::spawn(async move {
                dispatcher.handle(&rename(5, &format!("f{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(count(&f.store, 5).await, 10);
        assert_eq!(f.store.logs_for(AccountId(5)).await.unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_empty_split_is_counted_with_zero_parts() {
        let f = fixture(Script::SucceedInParts(0));
        let request = ActionRequest::from_reply(
            AccountId(5),
            FileRef::new("file-1", Some("empty.bin".to_owned())),
            "split",
        );

        let done = f.dispatcher.handle(&request).await.unwrap();
        assert!(done.processed.sent.is_empty());
        assert_eq!(done.log.action, LogAction::Split);
        assert_eq!(done.log.details.parts, Some(0));
        assert_eq!(count(&f.store, 5).await, 1);
    }

    #[tokio::test]
    async fn test_admit_checks_without_delegating() {
        let f = fixture(Script::Succeed);
        let request = rename(5, "name");

        let admission = f.dispatcher.admit(&request).await.unwrap();
        assert_eq!(admission.request().user, AccountId(5));
        assert_eq!(f.processor.call_count().await, 0);
        assert!(is_empty_dir(f.scratch.path()));
        drop(admission);
        assert_eq!(count(&f.store, 5).await, 0);

        f.dispatcher.quota().set_limit(AccountId(5), 0).await.unwrap();
        let err = f.dispatcher.admit(&request).await.unwrap_err();
        assert!(matches!(err, DispatchError::QuotaExceeded { used: 0, limit: 0 }));
    }

    /// Collaborator that reports the owner's counter as seen mid-operation.
    struct CountWatcher {
        store: Arc<MemoryStore>,
        seen: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl FileProcessor for CountWatcher {
        async fn perform(
            &self,
            _kind: ActionKind,
            file: &FileRef,
            params: &ActionParams,
            _scratch: &mut Scratch,
        ) -> Result<ProcessedFile, ProcessingError> {
            let account = self.store.get(params.owner).await.unwrap().unwrap();
            self.seen.lock().await.push(account.daily_count);
            Ok(ProcessedFile {
                sent: vec![SentFile {
                    message_id: 1,
                    file_name: file.display_name(),
                }],
                metadata: DerivedMetadata {
                    file_name: file.display_name(),
                    size: 1,
                    parts: None,
                },
            })
        }
    }

    #[tokio::test]
    async fn test_usage_is_recorded_after_the_operation() {
        let store = Arc::new(MemoryStore::new(AccountDefaults::new(5, [])));
        let watcher = Arc::new(CountWatcher {
            store: Arc::clone(&store),
            seen: Mutex::new(Vec::new()),
        });
        let scratch = tempfile::tempdir().unwrap();
        let quota = QuotaEngine::new(
            Arc::clone(&store) as Arc<dyn UserStore>,
            Arc::new(ManualClock::new(Utc::now())) as Arc<dyn Clock>,
        );
        let dispatcher = ActionDispatcher::new(
            quota,
            Arc::clone(&watcher) as Arc<dyn FileProcessor>,
            scratch.path(),
        );

        for name in ["a", "b", "c"] {
            dispatcher.handle(&rename(5, name)).await.unwrap();
        }

        assert_eq!(*watcher.seen.lock().await, [0, 1, 2]);
        assert_eq!(count(&store, 5).await, 3);
    }

    /// Store whose usage counter and audit log are unavailable.
    struct UncountableStore {
        inner: MemoryStore,
        fail_increment: bool,
    }

    #[async_trait]
    impl UserStore for UncountableStore {
        async fn ensure(&self, id: AccountId, now: DateTime<Utc>) -> Result<UserAccount, StoreError> {
            self.inner.ensure(id, now).await
        }

        async fn get(&self, id: AccountId) -> Result<Option<UserAccount>, StoreError> {
            self.inner.get(id).await
        }

        async fn update(&self, id: AccountId, patch: &AccountPatch) -> Result<(), StoreError> {
            self.inner.update(id, patch).await
        }

        async fn increment_usage(&self, id: AccountId) -> Result<(), StoreError> {
            if self.fail_increment {
                return Err(StoreError::Corrupt("counter offline".to_owned()));
            }
            self.inner.increment_usage(id).await
        }

        async fn reset_usage_if_due(
            &self,
            id: AccountId,
            cutoff: DateTime<Utc>,
            now: DateTime<Utc>,
        ) -> Result<bool, StoreError> {
            self.inner.reset_usage_if_due(id, cutoff, now).await
        }

        async fn user_ids(&self) -> Result<Vec<AccountId>, StoreError> {
            self.inner.user_ids().await
        }

        async fn append_log(&self, _entry: &LogEntry) -> Result<(), StoreError> {
            Err(StoreError::Corrupt("log offline".to_owned()))
        }

        async fn logs_for(&self, id: AccountId) -> Result<Vec<LogEntry>, StoreError> {
            self.inner.logs_for(id).await
        }

        async fn close(&self) {}
    }

    async fn deliver_with_broken_store(fail_increment: bool) -> (Result<Completion, DispatchError>, u32) {
        let store = Arc::new(UncountableStore {
            inner: MemoryStore::new(AccountDefaults::new(5, [])),
            fail_increment,
        });
        let scratch = tempfile::tempdir().unwrap();
        let quota = QuotaEngine::new(
            Arc::clone(&store) as Arc<dyn UserStore>,
            Arc::new(ManualClock::new(Utc::now())) as Arc<dyn Clock>,
        );
        let dispatcher = ActionDispatcher::new(
            quota,
            FakeProcessor::new(Script::Succeed) as Arc<dyn FileProcessor>,
            scratch.path(),
        );

        let result = dispatcher.handle(&rename(5, "kept")).await;
        let used = store.get(AccountId(5)).await.unwrap().unwrap().daily_count;
        (result, used)
    }

    #[tokio::test]
    async fn test_delivered_file_survives_store_failures() {
        let (result, used) = deliver_with_broken_store(false).await;
        let done = result.unwrap();
        assert_eq!(done.log.details.new_name.as_deref(), Some("kept.mp4"));
        assert_eq!(used, 1);

        let (result, used) = deliver_with_broken_store(true).await;
        assert!(result.is_ok());
        assert_eq!(used, 0);
    }
}
