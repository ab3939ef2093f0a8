//! Document adapter — turns `conversation_starter_requests` rows into generation
//! requests and their outcomes back into document updates.
//!
//! Flow: NOTIFY → claim pending rows → queue → worker pool → generate → batch commit.

pub mod store;
pub mod worker;

use std::time::Duration;

use anyhow::{anyhow, Result};
use sqlx::postgres::PgListener;
use sqlx::PgPool;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::errors::RATE_LIMIT_DEVELOPER_MESSAGE;
use crate::generation::completion::BackendKind;
use crate::generation::error::GenerationError;
use crate::generation::generator::{GenerationRequest, GenerationResult};
use crate::generation::profanity::ProfanityThreshold;
use crate::models::document::{DocumentState, DocumentUpdate, StarterDocumentRow};
use crate::state::AppState;
use store::DocumentStore;

/// Channel raised by the insert trigger; the payload is the new document id.
pub const NOTIFY_CHANNEL: &str = "conversation_starter_requests";

/// Maximum documents claimed per round.
pub const CLAIM_BATCH_SIZE: i64 = 32;

/// Sweep cadence when no notification arrives. Picks up released and expired claims.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

/// Pause before listening again after the notification connection fails.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Builds the generation request described by a document, falling back to the
/// service defaults for every field the client left out.
pub fn request_from_document(
    state: &AppState,
    doc: &StarterDocumentRow,
) -> Result<GenerationRequest, GenerationError> {
    let backend = match doc.completion_type.as_deref() {
        Some(kind) => kind.parse::<BackendKind>().map_err(GenerationError::InvalidArgument)?,
        None => BackendKind::default(),
    };

    let completion_model = match (&doc.api_completion_model, backend) {
        (Some(model), _) => model.clone(),
        (None, BackendKind::HostedFineTuned) => state.config.fine_tuned_model.clone().ok_or_else(|| {
            GenerationError::InvalidArgument(
                "No fine-tuned model given and none configured".to_string(),
            )
        })?,
        (None, _) => state.config.completion_model.clone(),
    };

    let threshold = match doc.profanity_threshold.as_deref() {
        Some(t) => t
            .parse::<ProfanityThreshold>()
            .map_err(GenerationError::InvalidArgument)?,
        None => state.config.profanity_threshold,
    };

    if let Some(personas) = &doc.personas {
        debug!("Document {} requested for personas {:?}", doc.id, personas);
    }

    Ok(GenerationRequest::new(
        doc.topics.clone(),
        completion_model,
        doc.api_classification_model
            .clone()
            .unwrap_or_else(|| state.config.classification_model.clone()),
    )?
    .with_backend(backend)
    .with_profanity_threshold(threshold)
    .with_fix_grammar(doc.fix_grammar.unwrap_or(state.config.fix_grammar))
    .with_parallel_completions(parallel_completions(state, doc)))
}

/// Requested fan-out, clamped to `1..=max_parallel_completions`.
fn parallel_completions(state: &AppState, doc: &StarterDocumentRow) -> usize {
    let requested = doc.parallel_completions.unwrap_or(1).max(1) as usize;
    let max = state.config.max_parallel_completions;
    if requested > max {
        debug!(
            "Document {} asked for {requested} parallel completions, capped at {max}",
            doc.id
        );
    }
    requested.min(max)
}

/// Runs one document through the generator. Never fails: errors become error updates.
pub async fn process_document(state: &AppState, doc: StarterDocumentRow) -> DocumentUpdate {
    let outcome = match request_from_document(state, &doc) {
        Ok(request) => state.generator.generate(&request).await,
        Err(err) => Err(err),
    };

    match outcome.and_then(|result| processed_update(doc.id, result)) {
        Ok(update) => update,
        Err(err) => error_update(doc.id, &err),
    }
}

fn processed_update(id: uuid::Uuid, result: GenerationResult) -> Result<DocumentUpdate, GenerationError> {
    let conversation_starters = serde_json::to_value(&result.all_candidates).map_err(|e| {
        error!("Failed to encode candidates for document {id}: {e}");
        GenerationError::Backend(format!("Failed to encode candidates: {e}"))
    })?;

    Ok(DocumentUpdate {
        id,
        state: DocumentState::Processed,
        content: Some(result.selected.conversation_starter),
        conversation_starters: Some(conversation_starters),
        error: None,
        developer_message: None,
    })
}

fn error_update(id: uuid::Uuid, err: &GenerationError) -> DocumentUpdate {
    let developer_message = match err {
        GenerationError::RateLimited(_) => RATE_LIMIT_DEVELOPER_MESSAGE.to_string(),
        GenerationError::AllProfane => {
            "Every candidate exceeded the profanity threshold; try other topics or a looser threshold"
                .to_string()
        }
        GenerationError::InvalidArgument(msg) => msg.clone(),
        _ => "No suitable conversation starter could be generated; try again".to_string(),
    };

    DocumentUpdate {
        id,
        state: DocumentState::Error,
        content: None,
        conversation_starters: None,
        error: Some(err.to_string()),
        developer_message: Some(developer_message),
    }
}

/// Claims every pending document and queues it, one batch per round.
pub async fn sweep(store: &dyn DocumentStore, queue: &mpsc::Sender<Vec<StarterDocumentRow>>) -> Result<usize> {
    let mut total = 0;
    loop {
        let batch = store.claim_pending(CLAIM_BATCH_SIZE).await?;
        let claimed = batch.len();
        if claimed == 0 {
            return Ok(total);
        }
        total += claimed;
        queue
            .send(batch)
            .await
            .map_err(|_| anyhow!("Document queue closed"))?;
        if (claimed as i64) < CLAIM_BATCH_SIZE {
            return Ok(total);
        }
    }
}

/// One sweep after a wakeup. A failed claim is logged and left to the next wakeup;
/// only a closed queue is an error.
pub async fn resweep(store: &dyn DocumentStore, queue: &mpsc::Sender<Vec<StarterDocumentRow>>) -> Result<()> {
    match sweep(store, queue).await {
        Ok(0) => Ok(()),
        Ok(queued) => {
            info!("Queued {queued} pending documents");
            Ok(())
        }
        Err(e) if queue.is_closed() => Err(e),
        Err(e) => {
            warn!("Document sweep failed, retrying on next wakeup: {e:?}");
            Ok(())
        }
    }
}

/// Watches the request table: sweeps at startup, after every notification and every
/// `SWEEP_INTERVAL`. Runs until the worker queue closes.
pub async fn watch_documents(
    pool: PgPool,
    store: &dyn DocumentStore,
    queue: mpsc::Sender<Vec<StarterDocumentRow>>,
) -> Result<()> {
    let mut listener = PgListener::connect_with(&pool).await?;
    listener.listen(NOTIFY_CHANNEL).await?;
    info!("Listening for documents on channel '{NOTIFY_CHANNEL}'");

    resweep(store, &queue).await?;

    loop {
        // `recv` reconnects on its own after a lost connection.
        match tokio::time::timeout(SWEEP_INTERVAL, listener.recv()).await {
            Ok(Ok(notification)) => {
                debug!("Change notification for document {}", notification.payload());
            }
            Ok(Err(e)) => {
                warn!("Notification listener failed: {e}; sweeping and listening again");
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
            Err(_) => debug!("No notification for {SWEEP_INTERVAL:?}, sweeping"),
        }
        resweep(store, &queue).await?;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use uuid::Uuid;

    use super::*;
    use crate::config::Config;
    use crate::generation::testing::{generator, MockLlm};

    /// Keeps documents in memory. Claiming moves a document from `pending` to
    /// `claimed`; committing drops it, releasing moves it back. The next N claims or
    /// commits can be made to fail.
    #[derive(Default)]
    pub struct InMemoryStore {
        pub pending: Mutex<Vec<StarterDocumentRow>>,
        pub claimed: Mutex<Vec<StarterDocumentRow>>,
        pub commits: Mutex<Vec<Vec<DocumentUpdate>>>,
        failing_claims: AtomicUsize,
        failing_commits: AtomicUsize,
    }

    impl InMemoryStore {
        pub fn fail_claims(&self, n: usize) {
            self.failing_claims.store(n, Ordering::SeqCst);
        }

        pub fn fail_commits(&self, n: usize) {
            self.failing_commits.store(n, Ordering::SeqCst);
        }

        fn take_failure(counter: &AtomicUsize) -> bool {
            counter
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    #[async_trait]
    impl DocumentStore for InMemoryStore {
        async fn claim_pending(&self, limit: i64) -> Result<Vec<StarterDocumentRow>> {
            if Self::take_failure(&self.failing_claims) {
                return Err(anyhow!("connection reset"));
            }
            let mut pending = self.pending.lock().unwrap();
            let n = pending.len().min(limit as usize);
            let batch: Vec<_> = pending.drain(..n).collect();
            self.claimed.lock().unwrap().extend(batch.iter().cloned());
            Ok(batch)
        }

        async fn commit(&self, updates: &[DocumentUpdate]) -> Result<()> {
            if Self::take_failure(&self.failing_commits) {
                return Err(anyhow!("connection reset"));
            }
            self.claimed
                .lock()
                .unwrap()
                .retain(|d| !updates.iter().any(|u| u.id == d.id));
            self.commits.lock().unwrap().push(updates.to_vec());
            Ok(())
        }

        async fn release(&self, ids: &[Uuid]) -> Result<()> {
            let mut claimed = self.claimed.lock().unwrap();
            let (released, kept): (Vec<_>, Vec<_>) =
                claimed.drain(..).partition(|d| ids.contains(&d.id));
            *claimed = kept;
            self.pending.lock().unwrap().extend(released);
            Ok(())
        }
    }

    pub fn config() -> Config {
        Config {
            database_url: "postgres://localhost/ava".to_string(),
            openai_key: "key".to_string(),
            openai_org: "org".to_string(),
            openai_base_url: "http://localhost".to_string(),
            local_completion_url: None,
            grammar_model_url: None,
            completion_model: "davinci-codex".to_string(),
            fine_tuned_model: Some("ft-starters".to_string()),
            classification_model: "content-filter-alpha".to_string(),
            profanity_threshold: ProfanityThreshold::Tolerant,
            fix_grammar: false,
            corpus_confirmed_only: false,
            watch_documents: true,
            worker_concurrency: 2,
            max_parallel_completions: 4,
            generation_seed: Some(3),
            port: 0,
            rust_log: "info".to_string(),
        }
    }

    pub fn state(llm: MockLlm) -> AppState {
        AppState {
            config: config(),
            generator: generator(Arc::new(llm)),
        }
    }

    pub fn doc(topics: &[&str]) -> StarterDocumentRow {
        StarterDocumentRow {
            id: Uuid::new_v4(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_document_defaults() {
        let state = state(MockLlm::answering("x"));
        let request = request_from_document(&state, &doc(&["philosophy"])).unwrap();

        assert_eq!(request.completion_backend, BackendKind::HostedBase);
        assert_eq!(request.completion_model_id, "davinci-codex");
        assert_eq!(request.classification_model_id, "content-filter-alpha");
        assert_eq!(request.profanity_threshold, ProfanityThreshold::Tolerant);
        assert_eq!(request.prompt_rows, 60);
    }

    #[test]
    fn test_document_overrides() {
        let state = state(MockLlm::answering("x"));
        let mut document = doc(&["philosophy"]);
        document.completion_type = Some("hosted_fine_tuned".to_string());
        document.profanity_threshold = Some("strict".to_string());
        document.parallel_completions = Some(-4);
        document.api_classification_model = Some("my-filter".to_string());
        document.fix_grammar = Some(true);

        let request = request_from_document(&state, &document).unwrap();

        assert_eq!(request.completion_backend, BackendKind::HostedFineTuned);
        assert_eq!(request.completion_model_id, "ft-starters");
        assert_eq!(request.prompt_rows, 1);
        assert_eq!(request.profanity_threshold, ProfanityThreshold::Strict);
        assert_eq!(request.parallel_completions, 1);
        assert_eq!(request.classification_model_id, "my-filter");
        assert!(request.fix_grammar);
    }

    #[test]
    fn test_parallel_completions_are_capped() {
        let state = state(MockLlm::answering("x"));
        let mut document = doc(&["philosophy"]);
        document.parallel_completions = Some(100_000);

        let request = request_from_document(&state, &document).unwrap();
        assert_eq!(request.parallel_completions, 4);

        document.parallel_completions = Some(3);
        let request = request_from_document(&state, &document).unwrap();
        assert_eq!(request.parallel_completions, 3);
    }

    #[test]
    fn test_unknown_threshold_is_invalid() {
        let state = state(MockLlm::answering("x"));
        let mut document = doc(&["philosophy"]);
        document.profanity_threshold = Some("lenient".to_string());

        let err = request_from_document(&state, &document).unwrap_err();
        assert!(matches!(err, GenerationError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_processed_document_update() {
        let state = state(MockLlm::answering("philosophy ### What do you believe without proof?"));
        let document = doc(&["philosophy"]);
        let id = document.id;

        let update = process_document(&state, document).await;

        assert_eq!(update.id, id);
        assert_eq!(update.state, DocumentState::Processed);
        assert_eq!(update.content.as_deref(), Some("What do you believe without proof?"));
        let starters = update.conversation_starters.unwrap();
        assert_eq!(starters[0]["conversationStarter"], "What do you believe without proof?");
        assert!(update.error.is_none());
    }

    #[tokio::test]
    async fn test_empty_topics_document_errors_without_backend_call() {
        let llm = Arc::new(MockLlm::answering("philosophy ### x"));
        let state = AppState {
            config: config(),
            generator: generator(llm.clone()),
        };

        let update = process_document(&state, doc(&[])).await;

        assert_eq!(update.state, DocumentState::Error);
        assert_eq!(update.developer_message.as_deref(), Some("No topics in request"));
        assert_eq!(llm.completions(), 0);
    }

    #[tokio::test]
    async fn test_rate_limited_document_carries_developer_message() {
        let llm = MockLlm::answering("x").then(Err(crate::llm_client::LlmError::RateLimited {
            message: "quota".to_string(),
        }));
        let update = process_document(&state(llm), doc(&["philosophy"])).await;

        assert_eq!(update.state, DocumentState::Error);
        assert_eq!(
            update.developer_message.as_deref(),
            Some(RATE_LIMIT_DEVELOPER_MESSAGE)
        );
    }

    #[tokio::test]
    async fn test_sweep_queues_batches_until_drained() {
        let store = InMemoryStore::default();
        store
            .pending
            .lock()
            .unwrap()
            .extend((0..40).map(|_| doc(&["philosophy"])));
        let (tx, mut rx) = mpsc::channel(4);

        let queued = sweep(&store, &tx).await.unwrap();

        assert_eq!(queued, 40);
        assert_eq!(rx.recv().await.unwrap().len(), CLAIM_BATCH_SIZE as usize);
        assert_eq!(rx.recv().await.unwrap().len(), 8);
        assert!(store.pending.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_claim_does_not_stop_sweeping() {
        let store = InMemoryStore::default();
        store.pending.lock().unwrap().push(doc(&["philosophy"]));
        store.fail_claims(1);
        let (tx, mut rx) = mpsc::channel(4);

        resweep(&store, &tx).await.unwrap();
        assert!(rx.try_recv().is_err());

        resweep(&store, &tx).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_queue_ends_sweeping() {
        let store = InMemoryStore::default();
        store.pending.lock().unwrap().push(doc(&["philosophy"]));
        let (tx, rx) = mpsc::channel(4);
        drop(rx);

        assert!(resweep(&store, &tx).await.is_err());
    }
}
