//! Bounded worker pool over the queue of claimed document batches.

use std::sync::Arc;

use anyhow::Result;
use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::models::document::{DocumentUpdate, StarterDocumentRow};
use crate::state::AppState;
use crate::watcher::process_document;
use crate::watcher::store::DocumentStore;

/// Batches waiting for a worker before the watcher blocks.
pub const QUEUE_CAPACITY: usize = 16;

/// Commit tries per batch before its documents are handed back to the store.
pub const COMMIT_ATTEMPTS: u32 = 3;

#[derive(Clone)]
pub struct DocumentWorkerPool {
    state: AppState,
    store: Arc<dyn DocumentStore>,
    permits: Arc<Semaphore>,
    concurrency: usize,
}

impl DocumentWorkerPool {
    pub fn new(state: AppState, store: Arc<dyn DocumentStore>, concurrency: usize) -> Self {
        let concurrency = concurrency.max(1);
        Self {
            state,
            store,
            permits: Arc::new(Semaphore::new(concurrency)),
            concurrency,
        }
    }

    /// Starts consuming on a background task and returns the queue's sending half.
    /// The task ends once every sender is dropped and the queue is drained.
    pub fn spawn(self) -> (mpsc::Sender<Vec<StarterDocumentRow>>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_CAPACITY);
        let handle = tokio::spawn(self.run(rx));
        (tx, handle)
    }

    /// Processes batches until every sender is dropped.
    pub async fn run(self, mut queue: mpsc::Receiver<Vec<StarterDocumentRow>>) {
        info!("Document worker pool started (concurrency={})", self.concurrency);
        while let Some(batch) = queue.recv().await {
            if let Err(e) = self.process_batch(batch).await {
                error!("Document batch failed: {e:?}");
            }
        }
        info!("Document queue closed, worker pool stopping");
    }

    /// Generates for every document of the batch (at most `concurrency` at a time),
    /// then commits all outcomes together. If the commit keeps failing the documents
    /// are released so a later sweep claims them again.
    pub async fn process_batch(&self, batch: Vec<StarterDocumentRow>) -> Result<Vec<DocumentUpdate>> {
        let size = batch.len();
        let updates: Vec<DocumentUpdate> = join_all(batch.into_iter().map(|doc| async move {
            // `permits` is never closed.
            let _permit = self.permits.acquire().await.ok();
            process_document(&self.state, doc).await
        }))
        .await;

        match self.commit_with_retry(&updates).await {
            Ok(()) => {
                info!("Processed batch of {size} documents");
                Ok(updates)
            }
            Err(e) => {
                let ids: Vec<_> = updates.iter().map(|u| u.id).collect();
                if let Err(release) = self.store.release(&ids).await {
                    error!("Failed to release {size} documents, they wait for the claim lease: {release:?}");
                }
                Err(e)
            }
        }
    }

    async fn commit_with_retry(&self, updates: &[DocumentUpdate]) -> Result<()> {
        let mut attempt = 1;
        loop {
            match self.store.commit(updates).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < COMMIT_ATTEMPTS => {
                    warn!("Commit attempt {attempt}/{COMMIT_ATTEMPTS} failed: {e:?}");
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
