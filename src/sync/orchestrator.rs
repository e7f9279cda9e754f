use chrono::{DateTime, Utc};
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use rusqlite::Connection;
use std::sync::Arc;
use uuid::Uuid;

use crate::{
    domain::message::normalizer::preview, new_correlation_token, provider, Classifier,
    ContentFetcher, Direction, IdentityRecovery, MailboxConfig, Message, NoopIndex, Normalizer,
    PageRequest, PatternClassifier, Provider, RawHeader, RawMessage, RawRecipient, RetryPolicy,
    SearchIndex, Store,
};

/// Prefix of the remote ids given to outgoing messages recorded
/// before their provider copy is synchronized.
pub const LOCAL_REMOTE_ID_PREFIX: &str = "local:";

use super::{
    apply, with_mailbox_lock, Applied, CancelToken, Error, Interruption, Result, SyncConfig,
    SyncMode, SyncProgressEvent, SyncReport,
};

/// Drives the synchronization of mailboxes: paginated listing,
/// normalization, thread resolution and persistence of every item,
/// then hand off to the search index.
pub struct Orchestrator<'a> {
    store: Store,
    provider: Arc<dyn Provider>,
    config: &'a SyncConfig,
    classifier: Arc<dyn Classifier>,
    index: Arc<dyn SearchIndex>,
    cancel: CancelToken,
    on_progress: Box<dyn Fn(SyncProgressEvent) -> Result<()> + Sync + Send + 'a>,
}

impl<'a> Orchestrator<'a> {
    pub fn new(store: Store, provider: Arc<dyn Provider>, config: &'a SyncConfig) -> Self {
        Self {
            store,
            provider,
            config,
            classifier: Arc::new(PatternClassifier::default()),
            index: Arc::new(NoopIndex),
            cancel: CancelToken::default(),
            on_progress: Box::new(|_| Ok(())),
        }
    }

    pub fn classifier(mut self, classifier: Arc<dyn Classifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn index(mut self, index: Arc<dyn SearchIndex>) -> Self {
        self.index = index;
        self
    }

    pub fn cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn on_progress<F>(mut self, f: F) -> Self
    where
        F: Fn(SyncProgressEvent) -> Result<()> + Sync + Send + 'a,
    {
        self.on_progress = Box::new(f);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        self.config
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Builds the content fetcher sharing the store and provider of
    /// the orchestrator.
    pub fn fetcher(&self) -> ContentFetcher {
        ContentFetcher::new(IdentityRecovery::new(
            self.store.clone(),
            self.provider.clone(),
            self.config,
        ))
    }

    fn normalizer(&self, mailbox: &MailboxConfig) -> Normalizer {
        Normalizer::new(mailbox)
            .correlation_header(self.config.correlation_header())
            .reference_prefix(self.config.reference_prefix())
    }

    fn page_size(&self, mode: SyncMode, hint: Option<usize>) -> usize {
        match mode {
            SyncMode::Incremental => {
                let cap = self.config.page_cap();
                hint.unwrap_or(cap).min(cap).max(1)
            }
            SyncMode::Full => hint.unwrap_or_else(|| self.config.full_page_size()).max(1),
        }
    }

    /// Synchronizes one mailbox. An incremental sync fetches one page
    /// of at most the configured cap, a full sync follows the
    /// continuations until the listing is exhausted.
    ///
    /// Failing items are counted and skipped. Rate limiting, exhausted
    /// page retries and cancellation stop the batch and return the
    /// partial report. Rejected credentials, unknown mailboxes and
    /// busy mailboxes fail the whole run.
    pub fn run_sync(
        &self,
        mailbox: &MailboxConfig,
        mode: SyncMode,
        page_size_hint: Option<usize>,
    ) -> Result<SyncReport> {
        with_mailbox_lock(self.store.path(), &mailbox.id, || {
            self.run_sync_locked(mailbox, mode, page_size_hint)
        })
    }

    fn run_sync_locked(
        &self,
        mailbox: &MailboxConfig,
        mode: SyncMode,
        page_size_hint: Option<usize>,
    ) -> Result<SyncReport> {
        info!("starting {} sync of mailbox {}", mode, mailbox.id);

        let started_at = Utc::now();
        let progress = &self.on_progress;
        let retry = self.config.retry_policy();
        let timeout = self.config.request_timeout();
        let mut report = SyncReport::new(&mailbox.id, mode);

        progress(SyncProgressEvent::CheckMailbox(mailbox.id.clone()))?;

        match retry.run("check mailbox", || {
            self.provider.check_mailbox(&mailbox.id, timeout)
        }) {
            Ok(()) => (),
            Err(err) if err.is_rate_limited() => {
                warn!("mailbox {} rate limited, skipping batch", mailbox.id);
                report.failed += 1;
                report.interruption = Some(Interruption::RateLimited);
                return Ok(report);
            }
            Err(err) => return Err(Error::CheckMailboxError(err, mailbox.id.clone())),
        }

        let page_size = self.page_size(mode, page_size_hint);
        let normalizer = self.normalizer(mailbox);
        let fetcher = self.fetcher();
        let mut conn = self.store.connect()?;
        let mut persisted: Vec<Message> = Vec::new();
        let mut cursor = None;

        loop {
            if self.cancel.is_cancelled() {
                info!("sync of mailbox {} cancelled", mailbox.id);
                report.interruption = Some(Interruption::Cancelled);
                break;
            }

            progress(SyncProgressEvent::ListPage(report.pages + 1))?;

            let req = PageRequest {
                mailbox: mailbox.id.clone(),
                cursor: cursor.take(),
                page_size,
                timeout,
            };

            let page = match list_page(&retry, self.provider.as_ref(), &req) {
                Ok(page) => page,
                Err(err) if err.is_rate_limited() => {
                    warn!(
                        "mailbox {} rate limited after {} page(s), returning partial result",
                        mailbox.id, report.pages
                    );
                    report.failed += 1;
                    report.interruption = Some(Interruption::RateLimited);
                    break;
                }
                Err(err) if err.is_precondition() => {
                    return Err(Error::ListMessagesError(err, mailbox.id.clone()));
                }
                Err(err) => {
                    warn!("cannot list page of mailbox {}: {}", mailbox.id, err);
                    report.failed += 1;
                    report.interruption = Some(Interruption::PageFailed(err.to_string()));
                    break;
                }
            };

            report.pages += 1;
            report.fetched += page.items.len();
            debug!(
                "page {} of mailbox {}: {} item(s)",
                report.pages,
                mailbox.id,
                page.items.len()
            );

            progress(SyncProgressEvent::ApplyItems(page.items.len()))?;

            for raw in &page.items {
                match self.apply_item(&mut conn, &normalizer, &fetcher, raw, started_at) {
                    Ok(Applied::Created(message)) => {
                        report.created += 1;
                        persisted.push(message);
                    }
                    Ok(Applied::Updated(message)) => {
                        report.updated += 1;
                        persisted.push(message);
                    }
                    Err(err) => {
                        warn!("skipping item {} of mailbox {}: {}", raw.id, mailbox.id, err);
                        report.failed += 1;
                    }
                }
            }

            match (mode, page.next) {
                (SyncMode::Full, Some(next)) => cursor = Some(next),
                (_, next) => {
                    report.exhausted = next.is_none();
                    break;
                }
            }
        }

        if !persisted.is_empty() {
            progress(SyncProgressEvent::IndexMessages(persisted.len()))?;
            if let Err(err) = self.index.index(&persisted) {
                warn!("cannot index messages of mailbox {}: {}", mailbox.id, err);
            }
        }

        if report.is_complete() {
            progress(SyncProgressEvent::AdvanceWatermark(mailbox.id.clone()))?;
            self.store.advance_watermark(&mailbox.id, started_at)?;
        }

        info!("{}", report);
        Ok(report)
    }

    fn apply_item(
        &self,
        conn: &mut Connection,
        normalizer: &Normalizer,
        fetcher: &ContentFetcher,
        raw: &RawMessage,
        now: DateTime<Utc>,
    ) -> Result<Applied> {
        let mut message = normalizer.normalize(raw)?;

        if !raw.has_body() {
            trace!("listing of message {} has no body, fetching it", message.remote_id);
            let body = fetcher.fetch_body_or_cached(&message)?;
            if message.preview.is_empty() {
                message.preview = body.text.as_deref().map(preview).unwrap_or_default();
            }
            message.body_text = body.text;
            message.body_html = body.html;
        }

        apply(
            conn,
            &message,
            &self.config.resolver,
            self.classifier.as_ref(),
            now,
        )
    }

    /// Synchronizes several mailboxes in parallel. Every mailbox gets
    /// its own outcome.
    pub fn run_many(
        &self,
        mailboxes: &[MailboxConfig],
        mode: SyncMode,
    ) -> Vec<(String, Result<SyncReport>)> {
        mailboxes
            .par_iter()
            .map(|mailbox| (mailbox.id.clone(), self.run_sync(mailbox, mode, None)))
            .collect()
    }

    /// Runs a full sync of the mailboxes never synchronized or whose
    /// watermark is older than the reconcile interval.
    pub fn reconcile_due(
        &self,
        mailboxes: &[MailboxConfig],
    ) -> Result<Vec<(String, Result<SyncReport>)>> {
        let now = Utc::now();
        let interval = self.config.reconcile_interval();
        let watermarks = self.store.watermarks()?;

        let due: Vec<MailboxConfig> = mailboxes
            .iter()
            .filter(|mailbox| {
                match watermarks.iter().find(|mark| mark.mailbox == mailbox.id) {
                    Some(mark) => mark.is_due(interval, now),
                    None => true,
                }
            })
            .cloned()
            .collect();

        debug!("{}/{} mailbox(es) due for reconciliation", due.len(), mailboxes.len());

        Ok(self.run_many(&due, SyncMode::Full))
    }

    /// Records a message sent by the application from the given
    /// mailbox, then threads and persists it like a synchronized one.
    ///
    /// Unless it already carries one, the message gets a new
    /// correlation token in the configured header: the application
    /// must send it with the same header. A message without remote id
    /// gets a local one, until its sent copy is synchronized and
    /// matched back by its token.
    pub fn record_outgoing(&self, mailbox: &MailboxConfig, mut raw: RawMessage) -> Result<Applied> {
        let now = Utc::now();
        let header = self.config.correlation_header();

        if raw.header(header).map_or(true, |token| token.trim().is_empty()) {
            let token = new_correlation_token(&self.config.token_prefix(), &mailbox.id, now);
            raw.headers.retain(|h| !h.name.eq_ignore_ascii_case(header));
            raw.headers.push(RawHeader {
                name: header.to_owned(),
                value: token,
            });
        }

        if raw.id.is_empty() {
            raw.id = format!("{}{}", LOCAL_REMOTE_ID_PREFIX, Uuid::new_v4());
        }

        if raw.from.is_none() {
            raw.from = Some(RawRecipient::new(&mailbox.address));
        }

        if raw.sent_date_time.is_none() {
            raw.sent_date_time = Some(now.to_rfc3339());
        }

        let mut message = self.normalizer(mailbox).normalize(&raw)?;
        if message.direction != Direction::Outgoing {
            message.direction = Direction::Outgoing;
            message.correlation_id = message.correlation_ref.take();
        }

        let mut conn = self.store.connect()?;
        let applied = apply(
            &mut conn,
            &message,
            &self.config.resolver,
            self.classifier.as_ref(),
            now,
        )?;

        info!(
            "outgoing message {} recorded in thread {} with token {}",
            applied.message().id,
            applied.message().thread_id,
            message.correlation_id.as_deref().unwrap_or_default(),
        );

        Ok(applied)
    }
}

fn list_page(
    retry: &RetryPolicy,
    provider: &dyn Provider,
    req: &PageRequest,
) -> provider::Result<provider::Page> {
    retry.run("list messages", || provider.list_messages(req))
}
