use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use shelf_core::{AsinStatus, Database};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::amazon::{AmazonEnrichment, AmazonRun};
use crate::error::{EnrichError, Result};

/// Hands a book id to whatever runs enrichment in the background.
#[async_trait]
pub trait EnrichmentDispatcher: Send + Sync {
    async fn dispatch(&self, book_id: i64) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchDecision {
    /// The book already has an ASIN and was marked completed.
    AlreadyLinked,
    /// No ISBN and no title; marked failed.
    NothingToSearch,
    /// Already `processing`; not dispatched twice.
    InFlight,
    Queued,
}

/// Checks the entry guard, marks the book `processing`, saves it, then
/// dispatches. A failed dispatch puts the book back to `pending`.
///
/// A book already `processing` is left alone unless `force` is set, which
/// re-queues books stranded by a worker that exited mid-run.
pub async fn request_amazon_enrichment(
    db: &Database,
    dispatcher: &dyn EnrichmentDispatcher,
    book_id: i64,
    force: bool,
) -> Result<DispatchDecision> {
    let mut book = db.get_book(book_id)?;

    if book.has_asin() {
        book.mark_asin(AsinStatus::Completed);
        db.save_book(&book)?;
        return Ok(DispatchDecision::AlreadyLinked);
    }
    if !book.has_isbn() && !book.has_title() {
        book.mark_asin(AsinStatus::Failed);
        db.save_book(&book)?;
        return Ok(DispatchDecision::NothingToSearch);
    }
    if book.asin_status == AsinStatus::Processing {
        if !force {
            return Ok(DispatchDecision::InFlight);
        }
        info!(book_id, "re-queueing book stuck in processing");
    }

    book.mark_asin(AsinStatus::Processing);
    db.save_book(&book)?;
    if let Err(e) = dispatcher.dispatch(book_id).await {
        warn!(book_id, error = %e, "dispatch failed, book back to pending");
        book.mark_asin(AsinStatus::Pending);
        db.save_book(&book)?;
        return Err(e);
    }
    info!(book_id, "amazon enrichment queued");
    Ok(DispatchDecision::Queued)
}

/// In-process queue backed by a tokio channel.
#[derive(Clone)]
pub struct ChannelDispatcher {
    tx: mpsc::Sender<i64>,
}

impl ChannelDispatcher {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<i64>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EnrichmentDispatcher for ChannelDispatcher {
    async fn dispatch(&self, book_id: i64) -> Result<()> {
        self.tx
            .send(book_id)
            .await
            .map_err(|_| EnrichError::Dispatch(format!("worker gone, book {book_id} not queued")))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerSummary {
    pub processed: usize,
    pub matched: usize,
    pub failed: usize,
    pub missing: usize,
}

/// Drains queued ids one at a time, persisting each book after its run.
pub struct EnrichmentWorker {
    db: Arc<Database>,
    workflow: AmazonEnrichment,
    rx: mpsc::Receiver<i64>,
}

impl EnrichmentWorker {
    pub fn new(db: Arc<Database>, workflow: AmazonEnrichment, rx: mpsc::Receiver<i64>) -> Self {
        Self { db, workflow, rx }
    }

    /// Runs until every sender is dropped.
    pub async fn run(mut self) -> WorkerSummary {
        let mut summary = WorkerSummary::default();
        while let Some(book_id) = self.rx.recv().await {
            match self.process(book_id).await {
                Ok(Some(run)) => {
                    summary.processed += 1;
                    if run.is_match() {
                        summary.matched += 1;
                    } else {
                        summary.failed += 1;
                    }
                }
                Ok(None) => summary.missing += 1,
                Err(e) => {
                    warn!(book_id, error = %e, "enrichment job failed");
                    summary.failed += 1;
                }
            }
        }
        info!(?summary, "enrichment worker finished");
        summary
    }

    pub async fn process(&self, book_id: i64) -> Result<Option<AmazonRun>> {
        let Some(mut book) = self.db.find_book(book_id)? else {
            warn!(book_id, "queued book no longer exists");
            return Ok(None);
        };
        let run = self.workflow.enrich(&mut book).await;
        self.db.save_book(&book)?;
        Ok(Some(run))
    }
}
