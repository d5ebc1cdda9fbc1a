//! # Notification Dispatcher
//! One poll cycle: FETCH → FILTER → fact-check branch → more-info branch → MARK_SEEN.
//!
//! Items are handled strictly one at a time with explicit pauses between
//! items and between posts of a reply chain. A failing item is logged and
//! answered with an apology; it never aborts the cycle.

pub mod processed;
pub mod scheduler;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use metrics::{counter, gauge};
use serde::Serialize;

use crate::analysis::{QueryClient, QueryMode};
use crate::config::DispatchConfig;
use crate::format::{render_thread, FACTCHECK_APOLOGY, MOREINFO_APOLOGY};
use crate::quota::{ActionKind, QuotaLedger};
use crate::social::{MentionRecord, NewPost, PostReference, SocialClient, SocialError};

pub use processed::ProcessedSet;
pub use scheduler::{spawn_poll_scheduler, CycleStatus};

pub const FACTCHECK_TAG: &str = "#factcheck";
pub const MOREINFO_TAG: &str = "#moreinfo";

/// Command carried by a mention's text. `#factcheck` wins when both tags appear.
pub fn command_of(text: &str) -> Option<QueryMode> {
    let lower = text.to_lowercase();
    if lower.contains(FACTCHECK_TAG) {
        Some(QueryMode::FactCheck)
    } else if lower.contains(MOREINFO_TAG) {
        Some(QueryMode::MoreInfo)
    } else {
        None
    }
}

/// A selected mention, ready for processing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MentionRequest {
    pub id: String,
    pub text: String,
    pub mode: QueryMode,
    /// The mention post itself; replies hang off it and its thread parent is
    /// the content under inspection.
    pub reply_target: PostReference,
}

/// Mentions worth dispatching, split per command, oldest first.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Selection {
    pub factcheck: Vec<MentionRequest>,
    pub moreinfo: Vec<MentionRequest>,
}

/// Keep unread mentions that reply to something, carry a command tag, and
/// were not handled before. The listing arrives newest first.
pub fn select_mentions(records: &[MentionRecord], processed: &ProcessedSet) -> Selection {
    let mut selection = Selection::default();
    for rec in records.iter().rev() {
        if !rec.is_mention() || rec.is_read || rec.record.reply.is_none() {
            continue;
        }
        if processed.contains(&rec.uri) {
            continue;
        }
        let Some(mode) = command_of(&rec.record.text) else {
            continue;
        };
        let req = MentionRequest {
            id: rec.uri.clone(),
            text: rec.record.text.clone(),
            mode,
            reply_target: rec.reference(),
        };
        match mode {
            QueryMode::FactCheck => selection.factcheck.push(req),
            QueryMode::MoreInfo => selection.moreinfo.push(req),
        }
    }
    selection
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("mention has no resolvable parent post")]
    NoParent,
    #[error("posting quota exhausted")]
    QuotaExhausted,
    #[error("still rate limited after {attempts} post attempts")]
    RateLimited { attempts: u32 },
    #[error(transparent)]
    Social(#[from] SocialError),
    #[error("quota store failure: {0:#}")]
    Store(anyhow::Error),
}

impl DispatchError {
    /// Whether an apology post is worth attempting after this failure.
    fn warrants_apology(&self) -> bool {
        !matches!(
            self,
            DispatchError::QuotaExhausted | DispatchError::RateLimited { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub fetched: usize,
    pub factcheck_selected: usize,
    pub moreinfo_selected: usize,
    pub completed: usize,
    pub failed: usize,
    pub deferred: usize,
    pub duplicates: usize,
    pub posts_created: usize,
    pub seen_marked: bool,
}

impl CycleReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            fetched: 0,
            factcheck_selected: 0,
            moreinfo_selected: 0,
            completed: 0,
            failed: 0,
            deferred: 0,
            duplicates: 0,
            posts_created: 0,
            seen_marked: false,
        }
    }
}

pub struct Dispatcher {
    social: Arc<dyn SocialClient>,
    analyst: QueryClient,
    ledger: QuotaLedger,
    processed: ProcessedSet,
    cfg: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        social: Arc<dyn SocialClient>,
        analyst: QueryClient,
        ledger: QuotaLedger,
        cfg: DispatchConfig,
    ) -> Self {
        crate::metrics::ensure_metrics_described();
        Self {
            social,
            analyst,
            ledger,
            processed: ProcessedSet::default(),
            cfg,
        }
    }

    pub fn processed(&self) -> &ProcessedSet {
        &self.processed
    }

    pub fn ledger(&self) -> &QuotaLedger {
        &self.ledger
    }

    /// One full poll cycle. Errors only when the session or the fetch fails;
    /// item-level problems are absorbed into the report.
    pub async fn run_cycle(&mut self) -> anyhow::Result<CycleReport> {
        self.social.ensure_session().await?;

        let fetched_at = Utc::now();
        let mut report = CycleReport::new(fetched_at);
        let records = self
            .social
            .list_mentions(self.cfg.mention_page_size)
            .await
            .map_err(|e| anyhow::anyhow!("listing notifications: {e}"))?;
        report.fetched = records.len();
        counter!("mentions_fetched_total").increment(records.len() as u64);

        let selection = select_mentions(&records, &self.processed);
        report.factcheck_selected = selection.factcheck.len();
        report.moreinfo_selected = selection.moreinfo.len();
        tracing::info!(
            target: "dispatch",
            fetched = report.fetched,
            factcheck = report.factcheck_selected,
            moreinfo = report.moreinfo_selected,
            "notifications filtered"
        );

        self.run_branch(selection.factcheck, &mut report).await;
        self.run_branch(selection.moreinfo, &mut report).await;

        // Deferred mentions must stay unread so the next tick sees them again.
        if report.deferred == 0 {
            match self.social.mark_seen(fetched_at).await {
                Ok(()) => report.seen_marked = true,
                Err(e) => {
                    tracing::warn!(target: "dispatch", error = %e, "failed to mark notifications seen");
                }
            }
        } else {
            tracing::info!(
                target: "dispatch",
                deferred = report.deferred,
                "leaving notifications unread for the next cycle"
            );
        }

        gauge!("poll_last_run_ts").set(Utc::now().timestamp() as f64);
        Ok(report)
    }

    async fn run_branch(&mut self, items: Vec<MentionRequest>, report: &mut CycleReport) {
        let total = items.len();
        for (idx, item) in items.into_iter().enumerate() {
            match self.ledger.can_perform(ActionKind::Create).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::info!(target: "dispatch", "quota reached, deferring to next cycle");
                    report.deferred += total - idx;
                    break;
                }
                Err(e) => {
                    tracing::warn!(target: "dispatch", error = %format!("{e:#}"), "quota check failed, deferring");
                    report.deferred += total - idx;
                    break;
                }
            }

            if !self.processed.insert(&item.id) {
                report.duplicates += 1;
                continue;
            }

            let mode = item.mode.as_str();
            counter!("mentions_selected_total", "command" => mode).increment(1);
            tracing::info!(target: "dispatch", uri = %item.id, command = mode, "processing mention");

            let mut posted = Vec::new();
            match self.handle_item(&item, &mut posted).await {
                Ok(()) => report.completed += 1,
                Err(e) => {
                    report.failed += 1;
                    counter!("mentions_failed_total", "command" => mode).increment(1);
                    tracing::error!(
                        target: "dispatch",
                        uri = %item.id,
                        command = mode,
                        posted = posted.len(),
                        error = %e,
                        "mention failed"
                    );
                    if posted.is_empty() && e.warrants_apology() && self.apologize(&item).await {
                        report.posts_created += 1;
                    }
                }
            }
            report.posts_created += posted.len();

            tokio::time::sleep(self.cfg.inter_item_delay()).await;
        }
    }

    /// Fetch the parent post, analyse it, and post the reply chain.
    async fn handle_item(
        &self,
        item: &MentionRequest,
        posted: &mut Vec<PostReference>,
    ) -> Result<(), DispatchError> {
        let thread = self.social.get_thread(&item.reply_target.uri).await?;
        let parent = thread.parent.ok_or(DispatchError::NoParent)?;
        tracing::debug!(
            target: "dispatch",
            parent = %parent.reference.uri,
            chars = parent.text.chars().count(),
            "found parent post"
        );

        let result = self.analyst.query(&parent.text, item.mode).await;
        let texts = render_thread(&result);
        self.post_chain(&item.reply_target, &texts, posted).await
    }

    /// Post `texts` as a chain: the first replies to `root`, each later one to
    /// the post before it. The root stays fixed.
    async fn post_chain(
        &self,
        root: &PostReference,
        texts: &[String],
        posted: &mut Vec<PostReference>,
    ) -> Result<(), DispatchError> {
        let mut parent = root.clone();
        for (i, text) in texts.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.cfg.inter_post_delay()).await;
            }
            let reference = self.create_post(&NewPost::reply(text, root, &parent)).await?;
            parent = reference.clone();
            posted.push(reference);
        }
        Ok(())
    }

    /// Quota-gated post with a bounded wait-and-retry on platform 429s.
    async fn create_post(&self, post: &NewPost) -> Result<PostReference, DispatchError> {
        let allowed = self
            .ledger
            .can_perform(ActionKind::Create)
            .await
            .map_err(DispatchError::Store)?;
        if !allowed {
            return Err(DispatchError::QuotaExhausted);
        }

        let max_attempts = self.cfg.max_post_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            match self.social.post(post).await {
                Ok(reference) => {
                    counter!("posts_created_total").increment(1);
                    if let Err(e) = self.ledger.track(ActionKind::Create).await {
                        tracing::warn!(target: "dispatch", error = %format!("{e:#}"), "failed to record post in quota ledger");
                    }
                    tracing::debug!(target: "dispatch", uri = %reference.uri, "posted");
                    return Ok(reference);
                }
                Err(SocialError::RateLimited { retry_after }) => {
                    counter!("posts_rate_limited_total").increment(1);
                    if attempt >= max_attempts {
                        return Err(DispatchError::RateLimited { attempts: attempt });
                    }
                    let wait = retry_after.unwrap_or_else(|| self.cfg.post_cooldown());
                    tracing::warn!(
                        target: "dispatch",
                        attempt,
                        wait_secs = wait.as_secs(),
                        "post rate limited, waiting before retry"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Best-effort apology reply to the mention. Returns true if it was posted.
    async fn apologize(&self, item: &MentionRequest) -> bool {
        let text = match item.mode {
            QueryMode::FactCheck => FACTCHECK_APOLOGY,
            QueryMode::MoreInfo => MOREINFO_APOLOGY,
        };
        let post = NewPost::reply(text, &item.reply_target, &item.reply_target);
        match self.create_post(&post).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(target: "dispatch", uri = %item.id, error = %e, "apology post failed");
                false
            }
        }
    }
}
