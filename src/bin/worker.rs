//! Worker pool CLI entrypoint (§6). Run without `--worker-child` to start
//! the supervisor; the supervisor re-execs this same binary with
//! `--worker-child` for each worker process.

use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use scriptorium::config::{Config, LogFormat};
use scriptorium::domain_store::postgres::PostgresDomainStore;
use scriptorium::handlers::extract_elements::FixtureExtractor;
use scriptorium::handlers::parse_paper::FixtureParser;
use scriptorium::handlers::HandlerContext;
use scriptorium::job::postgres::PostgresJobStore;
use scriptorium::llm::openai::OpenAiLlmClient;
use scriptorium::worker::supervisor::{Supervisor, SupervisorConfig};
use scriptorium::worker::{default_worker_id, run_loop, run_stale_claim_sweeper};

#[derive(Parser, Debug)]
#[command(name = "scriptorium-worker", about = "Durable job queue worker pool")]
struct Args {
    #[arg(long, default_value_t = 4)]
    workers: usize,

    #[arg(long, default_value_t = 5.0)]
    poll_interval: f64,

    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    log_format: String,

    /// Spawned internally by the supervisor; not user-facing.
    #[arg(long, hide = true)]
    worker_child: bool,
}

fn init_tracing(format: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match format.parse::<LogFormat>().map_err(anyhow::Error::from)? {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

async fn run_worker_child(args: &Args) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    let worker_id = default_worker_id();

    let job_store = PostgresJobStore::connect(&args.database_url, config.job_store.clone()).await?;
    job_store.migrate().await?;
    let domain_store = PostgresDomainStore::new(sqlx::PgPool::connect(&args.database_url).await?);
    let llm = OpenAiLlmClient::new(
        &config.llm_base_url,
        &config.llm_api_key,
        config.linking.max_concurrent_llm_calls,
    )?;
    let parser = FixtureParser;
    let extractor = FixtureExtractor;

    let ctx = HandlerContext {
        job_store: &job_store,
        domain_store: &domain_store,
        llm: &llm,
        parser: &parser,
        extractor: &extractor,
        coordination: &config.coordination,
        linking: &config.linking,
        job_store_config: &config.job_store,
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let sweeper_config = config.job_store.clone();

    // Pinned rather than spawned: `ctx` borrows the store/LLM handles above,
    // so these futures can't be made `'static`. Pinning them lets shutdown
    // signal the flag and then keep polling them to completion instead of
    // dropping them mid-handler (§4.2's "let the current handler finish
    // naturally").
    let mut run_loop_fut = std::pin::pin!(run_loop(
        &ctx,
        &worker_id,
        Duration::from_secs_f64(args.poll_interval),
        shutdown_rx.clone(),
    ));
    let mut sweeper_fut = std::pin::pin!(run_stale_claim_sweeper(
        ctx.job_store,
        &sweeper_config,
        Duration::from_secs(60),
        shutdown_rx.clone(),
    ));

    tokio::select! {
        _ = &mut run_loop_fut => {}
        _ = &mut sweeper_fut => {}
        _ = shutdown_signal() => {
            let _ = shutdown_tx.send(true);
        }
    }

    tokio::join!(run_loop_fut, sweeper_fut);

    Ok(())
}

async fn run_supervisor(args: &Args) -> anyhow::Result<()> {
    let binary = std::env::current_exe().unwrap_or_else(|_| PathBuf::from("scriptorium-worker"));
    let extra_args = vec![
        "--database-url".to_string(),
        args.database_url.clone(),
        "--poll-interval".to_string(),
        args.poll_interval.to_string(),
        "--log-format".to_string(),
        args.log_format.clone(),
    ];

    let supervisor_config = SupervisorConfig {
        workers: args.workers,
        poll_interval: Duration::from_secs_f64(args.poll_interval),
        shutdown_grace_period: Duration::from_secs(10),
        liveness_check_interval: Duration::from_secs(2),
    };

    Supervisor::new(supervisor_config, binary, extra_args).run(shutdown_signal()).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_format)?;

    if args.worker_child {
        run_worker_child(&args).await
    } else {
        tracing::info!(workers = args.workers, "starting worker pool supervisor");
        run_supervisor(&args).await
    }
}
