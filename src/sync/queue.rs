//! Resync queue module.
//!
//! Change notifications only carry the mailbox to resynchronize.
//! They are queued in a bounded channel which rejects new requests
//! when full, then drained in batches: requests for the same mailbox
//! are coalesced, mailboxes run in parallel and failed runs are
//! queued again until they run out of attempts.

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use log::{debug, info, warn};
use rayon::prelude::*;
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Instant,
};

use crate::{MailboxConfig, RetryPolicy};

use super::{Error, Orchestrator, Result, SyncMode, SyncReport};

pub const DEFAULT_MAX_ATTEMPTS: usize = 3;

/// Represents a queued resynchronization of a mailbox.
#[derive(Debug, Clone)]
pub struct ResyncRequest {
    pub mailbox: MailboxConfig,
    pub mode: SyncMode,
    /// Represents the number of runs already attempted.
    pub attempts: usize,
    /// Represents the earliest time the request can run again.
    pub not_before: Option<Instant>,
}

impl ResyncRequest {
    pub fn new(mailbox: MailboxConfig, mode: SyncMode) -> Self {
        Self {
            mailbox,
            mode,
            attempts: 0,
            not_before: None,
        }
    }

    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map(|at| at <= now).unwrap_or(true)
    }

    /// Merges a request for the same mailbox. Full wins over
    /// incremental, the fewest attempts and the earliest time win.
    fn coalesce(&mut self, other: ResyncRequest) {
        if other.mode == SyncMode::Full {
            self.mode = SyncMode::Full;
        }
        self.attempts = self.attempts.min(other.attempts);
        self.not_before = match (self.not_before, other.not_before) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
    }
}

#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct QueueStats {
    pub enqueued: usize,
    pub rejected: usize,
    pub completed: usize,
    pub retried: usize,
    pub dropped: usize,
}

/// Bounded queue of mailbox resynchronizations.
pub struct ResyncQueue {
    sender: Sender<ResyncRequest>,
    receiver: Receiver<ResyncRequest>,
    max_attempts: usize,
    retry: RetryPolicy,
    stats: Mutex<QueueStats>,
}

impl ResyncQueue {
    pub fn bounded(capacity: usize, max_attempts: usize) -> Self {
        let (sender, receiver) = bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            max_attempts: max_attempts.max(1),
            retry: RetryPolicy::default(),
            stats: Mutex::default(),
        }
    }

    /// Sets the backoff applied between two attempts of a request.
    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn stats_mut(&self) -> MutexGuard<'_, QueueStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn stats(&self) -> QueueStats {
        *self.stats_mut()
    }

    pub fn len(&self) -> usize {
        self.receiver.len()
    }

    pub fn is_empty(&self) -> bool {
        self.receiver.is_empty()
    }

    /// Queues a resynchronization of the mailbox. Fails right away
    /// with [`Error::QueueFullError`] when the queue is full.
    pub fn enqueue(&self, mailbox: MailboxConfig, mode: SyncMode) -> Result<()> {
        let id = mailbox.id.clone();
        self.push(ResyncRequest::new(mailbox, mode)).map_err(|_| {
            self.stats_mut().rejected += 1;
            warn!("resync queue full, rejecting mailbox {}", id);
            Error::QueueFullError(id.clone())
        })?;

        self.stats_mut().enqueued += 1;
        debug!("resync of mailbox {} queued", id);
        Ok(())
    }

    fn push(&self, req: ResyncRequest) -> std::result::Result<(), ResyncRequest> {
        self.sender.try_send(req).map_err(|err| match err {
            TrySendError::Full(req) | TrySendError::Disconnected(req) => req,
        })
    }

    /// Runs every ready request currently queued, one run per
    /// mailbox. Returns the outcome of every run.
    pub fn drain(&self, orchestrator: &Orchestrator) -> Vec<(String, Result<SyncReport>)> {
        let now = Instant::now();
        let mut ready: Vec<ResyncRequest> = Vec::new();
        let mut later: Vec<ResyncRequest> = Vec::new();
        let mut by_mailbox: HashMap<String, usize> = HashMap::new();

        for req in self.receiver.try_iter() {
            if !req.is_ready(now) {
                later.push(req);
                continue;
            }

            match by_mailbox.get(&req.mailbox.id) {
                Some(&idx) => ready[idx].coalesce(req),
                None => {
                    by_mailbox.insert(req.mailbox.id.clone(), ready.len());
                    ready.push(req);
                }
            }
        }

        for req in later {
            self.requeue(req);
        }

        info!("draining {} resync request(s)", ready.len());

        let outcomes: Vec<(ResyncRequest, Result<SyncReport>)> = ready
            .into_par_iter()
            .map(|req| {
                let res = orchestrator.run_sync(&req.mailbox, req.mode, None);
                (req, res)
            })
            .collect();

        outcomes
            .into_iter()
            .map(|(req, res)| {
                self.settle(&req, &res);
                (req.mailbox.id, res)
            })
            .collect()
    }

    fn settle(&self, req: &ResyncRequest, res: &Result<SyncReport>) {
        match res {
            Ok(report) if report.is_complete() => {
                self.stats_mut().completed += 1;
            }
            Err(err) if err.is_precondition() => {
                warn!("dropping resync of mailbox {}: {}", req.mailbox.id, err);
                self.stats_mut().dropped += 1;
            }
            _ => {
                let attempts = req.attempts + 1;

                if attempts >= self.max_attempts {
                    warn!(
                        "dropping resync of mailbox {} after {} attempt(s)",
                        req.mailbox.id, attempts
                    );
                    self.stats_mut().dropped += 1;
                    return;
                }

                let backoff = self.retry.backoff(attempts);
                debug!("retrying resync of mailbox {} in {:?}", req.mailbox.id, backoff);

                self.stats_mut().retried += 1;
                self.requeue(ResyncRequest {
                    mailbox: req.mailbox.clone(),
                    mode: req.mode,
                    attempts,
                    not_before: Some(Instant::now() + backoff),
                });
            }
        }
    }

    fn requeue(&self, req: ResyncRequest) {
        if let Err(req) = self.push(req) {
            warn!("resync queue full, dropping mailbox {}", req.mailbox.id);
            self.stats_mut().dropped += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn mailbox(id: &str) -> MailboxConfig {
        MailboxConfig::new(id, format!("{id}@firm.com"))
    }

    #[test]
    fn full_queue_rejects() {
        let queue = ResyncQueue::bounded(2, DEFAULT_MAX_ATTEMPTS);

        queue.enqueue(mailbox("a"), SyncMode::Incremental).unwrap();
        queue.enqueue(mailbox("b"), SyncMode::Incremental).unwrap();
        let res = queue.enqueue(mailbox("c"), SyncMode::Incremental);

        assert!(matches!(res, Err(Error::QueueFullError(id)) if id == "c"));
        assert_eq!(queue.len(), 2);
        assert_eq!(
            queue.stats(),
            QueueStats {
                enqueued: 2,
                rejected: 1,
                ..QueueStats::default()
            }
        );
    }

    #[test]
    fn coalesce_prefers_full_mode() {
        let mut req = ResyncRequest::new(mailbox("a"), SyncMode::Incremental);
        req.attempts = 2;
        req.not_before = Some(Instant::now() + Duration::from_secs(5));

        req.coalesce(ResyncRequest::new(mailbox("a"), SyncMode::Full));

        assert_eq!(req.mode, SyncMode::Full);
        assert_eq!(req.attempts, 0);
        assert_eq!(req.not_before, None);
    }
}
