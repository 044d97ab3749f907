use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::binding::{Binding, InboundPost, OutcomeRecord, Style};
use crate::transform;

pub const CHANNEL_NOT_CONFIGURED: &str = "Channel not configured";
pub const TARGET_NOT_FOUND: &str = "Target text not found";

/// Extra wait on top of the edit timeout when draining at shutdown, covering
/// the outcome log write.
pub const DRAIN_MARGIN: Duration = Duration::from_secs(5);

/// Read access to channel bindings
#[async_trait]
pub trait BindingResolver: Send + Sync {
    /// Return the active binding for `chat_id`, if any
    async fn resolve_binding(&self, chat_id: &str) -> Result<Option<Binding>>;
}

/// Why a remote edit failed. `Display` carries the remote description verbatim.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Network(String),
    /// The remote API refused the edit (permissions, bad markup, ...)
    #[error("{0}")]
    Rejected(String),
    /// The message is gone or already has this content
    #[error("{0}")]
    Conflict(String),
    #[error("edit timed out after {}s", .0.as_secs())]
    Timeout(Duration),
    #[error("{0}")]
    Other(String),
}

/// Performs the actual in-place edit of a channel post
#[async_trait]
pub trait EditGateway: Send + Sync {
    /// `style` is informational; the markup is already embedded in `text`
    async fn edit_message(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        style: Style,
    ) -> std::result::Result<(), GatewayError>;
}

/// Durable, append-only sink for outcome records
#[async_trait]
pub trait OutcomeLog: Send + Sync {
    async fn append(&self, record: &OutcomeRecord) -> Result<()>;
}

/// Takes one inbound post through resolve → rewrite → edit → log.
///
/// Share it as `Arc<PostProcessor>` across tasks. Posts handed to
/// [`PostProcessor::spawn`] are tracked until [`PostProcessor::drain`].
pub struct PostProcessor {
    resolver: Arc<dyn BindingResolver>,
    gateway: Arc<dyn EditGateway>,
    log: Arc<dyn OutcomeLog>,
    edit_timeout: Duration,
    in_flight: Mutex<JoinSet<Option<OutcomeRecord>>>,
}

impl PostProcessor {
    pub fn new(
        resolver: Arc<dyn BindingResolver>,
        gateway: Arc<dyn EditGateway>,
        log: Arc<dyn OutcomeLog>,
        edit_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            gateway,
            log,
            edit_timeout,
            in_flight: Mutex::new(JoinSet::new()),
        }
    }

    /// Process a post to a terminal state.
    ///
    /// Returns `None` for posts without text (nothing is logged), otherwise the
    /// single outcome record that was written. Never fails.
    pub async fn process(&self, post: InboundPost) -> Option<OutcomeRecord> {
        let text = match post.text.as_deref() {
            Some(t) if !t.is_empty() => t,
            _ => {
                debug!(
                    chat_id = post.chat_id,
                    message_id = post.message_id,
                    "ignoring post without text"
                );
                return None;
            }
        };

        let record = self.decide(post.chat_id, post.message_id, text).await;
        self.write(record).await
    }

    /// Run `process` on a task owned by the processor, so the edit and its log
    /// entry complete even if the caller goes away.
    pub fn spawn(self: &Arc<Self>, post: InboundPost) {
        let processor = Arc::clone(self);
        let mut in_flight = self.lock_in_flight();
        // reap finished tasks so the set only holds pending posts
        while in_flight.try_join_next().is_some() {}
        in_flight.spawn(async move { processor.process(post).await });
    }

    /// Wait for every spawned post to reach its outcome record.
    ///
    /// Waits at most `edit_timeout + DRAIN_MARGIN`; posts still pending after
    /// that are aborted. Returns how many posts finished.
    pub async fn drain(&self) -> usize {
        let mut pending = std::mem::take(&mut *self.lock_in_flight());
        if pending.is_empty() {
            return 0;
        }

        let grace = self.edit_timeout + DRAIN_MARGIN;
        info!(pending = pending.len(), "waiting for in-flight posts");

        let mut finished = 0;
        let waited = tokio::time::timeout(grace, async {
            while let Some(joined) = pending.join_next().await {
                if let Err(e) = joined {
                    warn!("post task failed: {}", e);
                }
                finished += 1;
            }
        })
        .await;

        if waited.is_err() {
            warn!(
                remaining = pending.len(),
                "gave up on in-flight posts after {}s",
                grace.as_secs()
            );
        }
        finished
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, JoinSet<Option<OutcomeRecord>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn decide(&self, numeric_chat_id: i64, message_id: i32, text: &str) -> OutcomeRecord {
        let channel_id = numeric_chat_id.to_string();
        let chat_id = channel_id.as_str();

        let binding = match self.resolver.resolve_binding(chat_id).await {
            Ok(Some(binding)) => binding,
            Ok(None) => {
                info!(chat_id, message_id, "channel not configured");
                return OutcomeRecord::skipped(chat_id, message_id, CHANNEL_NOT_CONFIGURED);
            }
            Err(e) => {
                error!(chat_id, message_id, "failed to resolve binding: {:#}", e);
                return OutcomeRecord::error(
                    chat_id,
                    message_id,
                    format!("Failed to resolve binding: {:#}", e),
                );
            }
        };

        let (rewritten, changed) = transform::transform(text, &binding);
        if !changed {
            debug!(chat_id, message_id, phrase = %binding.target_phrase, "target text not found");
            return OutcomeRecord::skipped(chat_id, message_id, TARGET_NOT_FOUND);
        }

        match self
            .edit(numeric_chat_id, message_id, &rewritten, binding.style)
            .await
        {
            Ok(()) => {
                info!(chat_id, message_id, style = %binding.style, "post edited");
                OutcomeRecord::success(chat_id, message_id)
            }
            Err(e) => {
                error!(chat_id, message_id, "failed to edit channel post: {}", e);
                OutcomeRecord::error(chat_id, message_id, e.to_string())
            }
        }
    }

    async fn edit(
        &self,
        chat_id: i64,
        message_id: i32,
        text: &str,
        style: Style,
    ) -> std::result::Result<(), GatewayError> {
        match tokio::time::timeout(
            self.edit_timeout,
            self.gateway.edit_message(chat_id, message_id, text, style),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(self.edit_timeout)),
        }
    }

    async fn write(&self, mut record: OutcomeRecord) -> Option<OutcomeRecord> {
        record.created_at = chrono::Utc::now();
        if let Err(e) = self.log.append(&record).await {
            warn!(
                chat_id = %record.channel_id,
                message_id = record.message_id,
                status = %record.status,
                "failed to write outcome record: {:#}",
                e
            );
        }
        Some(record)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::binding::OutcomeStatus;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    pub(crate) struct FakeResolver {
        pub bindings: HashMap<String, Binding>,
        pub fail: bool,
    }

    #[async_trait]
    impl BindingResolver for FakeResolver {
        async fn resolve_binding(&self, chat_id: &str) -> Result<Option<Binding>> {
            if self.fail {
                anyhow::bail!("database is locked");
            }
            Ok(self
                .bindings
                .get(chat_id)
                .filter(|b| b.is_active)
                .cloned())
        }
    }

    pub(crate) enum GatewayBehavior {
        Succeed,
        Fail(&'static str),
        /// Succeeds after a delay
        Slow(Duration),
        Hang,
    }

    pub(crate) struct FakeGateway {
        pub behavior: GatewayBehavior,
        pub calls: AtomicUsize,
        pub edits: Mutex<Vec<(i64, i32, String, Style)>>,
    }

    impl FakeGateway {
        pub fn new(behavior: GatewayBehavior) -> Self {
            Self {
                behavior,
                calls: AtomicUsize::new(0),
                edits: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EditGateway for FakeGateway {
        async fn edit_message(
            &self,
            chat_id: i64,
            message_id: i32,
            text: &str,
            style: Style,
        ) -> std::result::Result<(), GatewayError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.edits
                .lock()
                .unwrap()
                .push((chat_id, message_id, text.to_string(), style));
            match self.behavior {
                GatewayBehavior::Succeed => Ok(()),
                GatewayBehavior::Fail(reason) => Err(GatewayError::Rejected(reason.to_string())),
                GatewayBehavior::Slow(delay) => {
                    tokio::time::sleep(delay).await;
                    Ok(())
                }
                GatewayBehavior::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(())
                }
            }
        }
    }

    #[derive(Default)]
    pub(crate) struct FakeLog {
        pub records: Mutex<Vec<OutcomeRecord>>,
        pub fail: bool,
    }

    #[async_trait]
    impl OutcomeLog for FakeLog {
        async fn append(&self, record: &OutcomeRecord) -> Result<()> {
            if self.fail {
                anyhow::bail!("disk full");
            }
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }
    }

    fn bold_binding() -> Binding {
        Binding {
            channel_id: "-100".to_string(),
            link: "https://x.com".to_string(),
            style: Style::Bold,
            target_phrase: "BioStage".to_string(),
            is_active: true,
        }
    }

    struct Harness {
        processor: Arc<PostProcessor>,
        gateway: Arc<FakeGateway>,
        log: Arc<FakeLog>,
    }

    fn harness_with(bindings: Vec<Binding>, behavior: GatewayBehavior, log: FakeLog) -> Harness {
        let resolver = Arc::new(FakeResolver {
            bindings: bindings
                .into_iter()
                .map(|b| (b.channel_id.clone(), b))
                .collect(),
            fail: false,
        });
        let gateway = Arc::new(FakeGateway::new(behavior));
        let log = Arc::new(log);
        let processor = Arc::new(PostProcessor::new(
            resolver,
            gateway.clone(),
            log.clone(),
            Duration::from_secs(5),
        ));
        Harness {
            processor,
            gateway,
            log,
        }
    }

    fn harness(behavior: GatewayBehavior) -> Harness {
        harness_with(vec![bold_binding()], behavior, FakeLog::default())
    }

    pub(crate) fn post(chat_id: i64, text: Option<&str>) -> InboundPost {
        InboundPost {
            chat_id,
            message_id: 42,
            text: text.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_edits_post_with_styled_link() {
        let h = harness(GatewayBehavior::Succeed);
        let record = h
            .processor
            .process(post(-100, Some("Welcome to BioStage community")))
            .await
            .unwrap();

        assert_eq!(record.status, OutcomeStatus::Success);
        assert!(record.error_text.is_none());
        assert_eq!(record.channel_id, "-100");
        assert_eq!(record.message_id, 42);

        let edits = h.gateway.edits.lock().unwrap();
        assert_eq!(edits.len(), 1);
        assert_eq!(
            edits[0],
            (
                -100,
                42,
                r#"Welcome to <b><a href="https://x.com">BioStage</a></b> community"#.to_string(),
                Style::Bold
            )
        );
        assert_eq!(h.log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_when_phrase_missing() {
        let h = harness(GatewayBehavior::Succeed);
        let record = h.processor.process(post(-100, Some("Hello world"))).await.unwrap();

        assert_eq!(record.status, OutcomeStatus::Skipped);
        assert_eq!(record.error_text.as_deref(), Some(TARGET_NOT_FOUND));
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_unconfigured_channel() {
        let h = harness(GatewayBehavior::Succeed);
        let record = h
            .processor
            .process(post(-999, Some("Welcome to BioStage")))
            .await
            .unwrap();

        assert_eq!(record.status, OutcomeStatus::Skipped);
        assert_eq!(record.error_text.as_deref(), Some(CHANNEL_NOT_CONFIGURED));
        assert_eq!(record.channel_id, "-999");
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_inactive_binding_is_not_configured() {
        let mut binding = bold_binding();
        binding.is_active = false;
        let h = harness_with(vec![binding], GatewayBehavior::Succeed, FakeLog::default());
        let record = h
            .processor
            .process(post(-100, Some("BioStage")))
            .await
            .unwrap();
        assert_eq!(record.error_text.as_deref(), Some(CHANNEL_NOT_CONFIGURED));
    }

    #[tokio::test]
    async fn test_gateway_failure_is_logged_verbatim() {
        let h = harness(GatewayBehavior::Fail("forbidden"));
        let record = h
            .processor
            .process(post(-100, Some("Welcome to BioStage")))
            .await
            .unwrap();

        assert_eq!(record.status, OutcomeStatus::Error);
        assert_eq!(record.error_text.as_deref(), Some("forbidden"));
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.log.records.lock().unwrap()[0], record);
    }

    #[tokio::test]
    async fn test_ignores_posts_without_text() {
        let h = harness(GatewayBehavior::Succeed);
        assert!(h.processor.process(post(-100, None)).await.is_none());
        assert!(h.processor.process(post(-100, Some(""))).await.is_none());
        assert!(h.log.records.lock().unwrap().is_empty());
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_edit_timeout_is_an_error() {
        let h = harness(GatewayBehavior::Hang);
        let record = h
            .processor
            .process(post(-100, Some("BioStage")))
            .await
            .unwrap();

        assert_eq!(record.status, OutcomeStatus::Error);
        assert_eq!(record.error_text.as_deref(), Some("edit timed out after 5s"));
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_resolver_failure_becomes_error_record() {
        let resolver = Arc::new(FakeResolver {
            bindings: HashMap::new(),
            fail: true,
        });
        let gateway = Arc::new(FakeGateway::new(GatewayBehavior::Succeed));
        let log = Arc::new(FakeLog::default());
        let processor = PostProcessor::new(resolver, gateway.clone(), log.clone(), Duration::from_secs(5));

        let record = processor.process(post(-100, Some("BioStage"))).await.unwrap();
        assert_eq!(record.status, OutcomeStatus::Error);
        assert!(record
            .error_text
            .as_deref()
            .unwrap()
            .contains("database is locked"));
        assert_eq!(gateway.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_log_failure_does_not_retry_edit() {
        let h = harness_with(
            vec![bold_binding()],
            GatewayBehavior::Succeed,
            FakeLog {
                fail: true,
                ..Default::default()
            },
        );
        let record = h
            .processor
            .process(post(-100, Some("BioStage")))
            .await
            .unwrap();

        assert_eq!(record.status, OutcomeStatus::Success);
        assert_eq!(h.gateway.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_spawned_posts_each_log_once() {
        let other = Binding {
            channel_id: "-200".to_string(),
            ..bold_binding()
        };
        let h = harness_with(
            vec![bold_binding(), other],
            GatewayBehavior::Succeed,
            FakeLog::default(),
        );

        for i in 0..20 {
            let chat_id = if i % 2 == 0 { -100 } else { -200 };
            let text = if i % 3 == 0 { "nothing here" } else { "BioStage" };
            h.processor.spawn(post(chat_id, Some(text)));
        }
        assert_eq!(h.processor.drain().await, 20);

        let records = h.log.records.lock().unwrap();
        assert_eq!(records.len(), 20);
        let edited = records
            .iter()
            .filter(|r| r.status == OutcomeStatus::Success)
            .count();
        assert_eq!(edited, h.gateway.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_spawned_post_outlives_its_caller() {
        let h = harness(GatewayBehavior::Succeed);
        let processor = h.processor.clone();
        // the caller task ends right after handing the post over
        tokio::spawn(async move { processor.spawn(post(-100, Some("BioStage"))) })
            .await
            .unwrap();

        for _ in 0..100 {
            if !h.log.records.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(h.log.records.lock().unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_pending_edit() {
        let h = harness(GatewayBehavior::Slow(Duration::from_secs(3)));
        h.processor.spawn(post(-100, Some("BioStage")));

        assert_eq!(h.processor.drain().await, 1);
        let records = h.log.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].status, OutcomeStatus::Success);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_logs_hung_edit_as_timeout() {
        let h = harness(GatewayBehavior::Hang);
        h.processor.spawn(post(-100, Some("BioStage")));

        assert_eq!(h.processor.drain().await, 1);
        let records = h.log.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].error_text.as_deref(), Some("edit timed out after 5s"));
    }

    #[tokio::test]
    async fn test_drain_without_pending_posts() {
        let h = harness(GatewayBehavior::Succeed);
        assert_eq!(h.processor.drain().await, 0);
    }
}
