mod config;
mod corpus;
mod db;
mod errors;
mod generation;
mod llm_client;
mod models;
mod routes;
mod state;
mod watcher;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::corpus::load_corpus;
use crate::db::create_pool;
use crate::generation::generator::Generator;
use crate::generation::grammar::GrammarFixer;
use crate::llm_client::inference::InferenceClient;
use crate::llm_client::LlmClient;
use crate::routes::build_router;
use crate::state::AppState;
use crate::watcher::store::PgDocumentStore;
use crate::watcher::watch_documents;
use crate::watcher::worker::DocumentWorkerPool;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_PKG_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ava v{}", env!("CARGO_PKG_VERSION"));

    // Initialize PostgreSQL
    let db = create_pool(&config.database_url, config.worker_concurrency).await?;

    // Load the example corpus once; read-only from here on
    let corpus = Arc::new(load_corpus(&db, config.corpus_confirmed_only).await?);

    // Initialize model clients
    let llm = LlmClient::new(
        &config.openai_base_url,
        config.openai_key.clone(),
        config.openai_org.clone(),
    )?;
    info!(
        "Completion client initialized (model: {}, classifier: {})",
        config.completion_model, config.classification_model
    );

    let mut generator = Generator::new(corpus, Arc::new(llm));
    if let Some(url) = &config.local_completion_url {
        generator = generator.with_local(Arc::new(InferenceClient::new(url.clone())?));
        info!("Local completion backend at {url}");
    }
    if let Some(url) = &config.grammar_model_url {
        let corrector = InferenceClient::new(url.clone())?;
        generator = generator.with_grammar(GrammarFixer::new(Arc::new(corrector)));
        info!("Grammar corrector at {url}");
    }
    if let Some(seed) = config.generation_seed {
        generator = generator.with_seed(seed);
    }

    // Build app state
    let state = AppState {
        config: config.clone(),
        generator,
    };

    // Start the document watcher and its worker pool
    let watcher = if config.watch_documents {
        let store = Arc::new(PgDocumentStore::new(db.clone()));
        let pool = DocumentWorkerPool::new(state.clone(), store.clone(), config.worker_concurrency);
        let (queue, workers) = pool.spawn();
        let listener_pool = db.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = watch_documents(listener_pool, store.as_ref(), queue).await {
                error!("Document watcher stopped: {e:?}");
            }
        });
        Some((task, workers))
    } else {
        None
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop claiming, then let the workers finish and commit what they already hold
    if let Some((task, workers)) = watcher {
        task.abort();
        let _ = task.await;
        if let Err(e) = workers.await {
            error!("Document worker pool ended abnormally: {e:?}");
        }
    }

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("Starting graceful shutdown...");
}
