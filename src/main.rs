use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use digest_dispatch::api::digest_routes;
use digest_dispatch::config::{DigestConfig, ServerConfig};
use digest_dispatch::content::{CachedContentProvider, ContentApiConfig, HttpContentProvider};
use digest_dispatch::delivery::{SmtpConfig, SmtpDelivery};
use digest_dispatch::llm::{LlmConfig, LlmSummarizer, create_client};
use digest_dispatch::pipeline::runner::{DigestDeps, DigestRunner};
use digest_dispatch::pipeline::types::ContinuationTrigger;
use digest_dispatch::schedule::{parse_schedule, spawn_digest_schedule};
use digest_dispatch::store::LibSqlBackend;
use digest_dispatch::trigger::{DisabledTrigger, HttpTrigger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let server = ServerConfig::from_env().context("server configuration")?;
    let digest = DigestConfig::from_env().context("digest configuration")?;

    // Keep the guard alive for the life of the process so buffered file
    // logs are flushed on exit.
    let (file_layer, _log_guard) = match &server.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "digest-dispatch.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        batch_size = digest.batch_size,
        send_interval_ms = digest.send_interval.as_millis() as u64,
        "Digest Dispatch starting"
    );

    // ── Storage ─────────────────────────────────────────────────────────
    let db = Arc::new(
        LibSqlBackend::new_local(Path::new(&server.db_path))
            .await
            .context("opening database")?,
    );

    // ── Content ─────────────────────────────────────────────────────────
    let http_content = HttpContentProvider::new(ContentApiConfig::from_env()?)?;
    let content = Arc::new(CachedContentProvider::new(
        Arc::new(http_content),
        server.content_cache_ttl,
    ));
    if !server.content_cache_ttl.is_zero() {
        let content = Arc::clone(&content);
        let ttl = server.content_cache_ttl;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let purged = content.purge_expired().await;
                tracing::debug!(purged, "Content cache purged");
            }
        });
    }

    // ── Summaries & delivery ────────────────────────────────────────────
    let llm = create_client(&LlmConfig::from_env()?)?;
    let summarizer = Arc::new(LlmSummarizer::new(llm));
    let delivery = Arc::new(SmtpDelivery::new(&SmtpConfig::from_env()?)?);

    // ── Continuation ────────────────────────────────────────────────────
    let trigger: Arc<dyn ContinuationTrigger> = match &server.public_url {
        Some(url) => {
            let trigger = HttpTrigger::new(url, server.cron_secret.clone())?;
            tracing::info!(endpoint = %trigger.endpoint(), "Continuation trigger enabled");
            Arc::new(trigger)
        }
        None => {
            tracing::warn!("DIGEST_PUBLIC_URL not set; runs will not chain past the first slice");
            Arc::new(DisabledTrigger)
        }
    };

    let runner = Arc::new(DigestRunner::new(
        digest,
        DigestDeps {
            recipients: db.clone(),
            content,
            summarizer,
            delivery,
            archive: db.clone(),
            audit: db,
            trigger,
        },
    ));

    // ── Schedule ────────────────────────────────────────────────────────
    let _schedule_handle = match &server.schedule {
        Some(expr) => {
            let schedule = parse_schedule(expr)?;
            tracing::info!(schedule = %expr, "Digest schedule enabled");
            Some(spawn_digest_schedule(Arc::clone(&runner), schedule))
        }
        None => None,
    };

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = digest_routes(runner, server.cron_secret.clone());
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", server.port))
        .await
        .with_context(|| format!("binding port {}", server.port))?;
    tracing::info!(port = server.port, "Digest API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutting down");
        })
        .await?;

    Ok(())
}
