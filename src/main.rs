use balance_mailer::*;
use config::{Config, ConfigBuilder};
use email::{Mailer, SmtpMailer};
use fetch::BalanceFetcher;
use job::{JobOutcome, MailJob};
use scheduler::MailScheduler;
use server::Server;
use templates::EmailTemplates;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use tracing_appender::non_blocking::WorkerGuard;


#[tokio::main]
async fn main() {

    let _logging_guard = setup_tracing();

    let args = Args::build();

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    info!("Current configuration:\n{}", config);

    let result = match args.command {
        Some(Command::Send { dry_run }) => send_once(config, dry_run).await,
        None => run(config).await,
    };

    if let Err(e) = result {
        tracing::error!("{:#}", e);
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn load_config(args: &Args) -> Result<Config, anyhow::Error> {
    let mut builder = ConfigBuilder::from_file(&args.config)?;

    if let Some(port) = args.port {
        builder = builder.with_port(port);
    }

    builder.build()
}

fn build_job(state: &AppState, config: &Config, mailer: Arc<dyn Mailer>) -> Result<MailJob, anyhow::Error> {
    let templates = EmailTemplates::load(&config.templates)?;

    let fetcher = BalanceFetcher::new(state.config.clone(), templates.normal)
        .context("Failed to build HTTP client")?;

    Ok(MailJob::new(fetcher, templates.fallback, mailer, config.mail.subject.clone()))
}

async fn run(config: Config) -> Result<(), anyhow::Error> {
    let state = AppState::new();

    // The listener comes up first; until the wiring below is done the
    // refresh endpoint answers with a not-ready error.
    let server = Server::new(state.clone(), config.http_addr());
    tokio::spawn(async move {
        if let Err(e) = server.run().await {
            tracing::error!("Server error: {:#}", e);
            std::process::exit(1);
        }
    });

    state.config.initialize(config.clone())?;

    let mailer: Arc<dyn Mailer> = Arc::new(SmtpMailer::new(&config).context("Invalid mail settings")?);
    let job = Arc::new(build_job(&state, &config, mailer)?);

    let scheduler = MailScheduler::new(&config.cron, job.clone()).await?;
    scheduler.start().await?;

    state.job.install(job.clone());
    info!("Mail scheduler started");

    if config.mail.send_on_startup {
        if let Err(e) = job.send(true).await {
            tracing::error!(error = %e, "Startup mail job failed");
        }
    }

    tokio::signal::ctrl_c().await.context("Failed to listen for shutdown signal")?;

    info!("Shutting down...");
    scheduler.shutdown().await?;

    Ok(())
}

async fn send_once(config: Config, dry_run: bool) -> Result<(), anyhow::Error> {
    let state = AppState::new();
    state.config.initialize(config.clone())?;

    let mailer: Arc<dyn Mailer> = if dry_run {
        Arc::new(PrintMailer)
    } else {
        Arc::new(SmtpMailer::new(&config).context("Invalid mail settings")?)
    };

    match build_job(&state, &config, mailer)?.send(true).await? {
        JobOutcome::Delivered => info!("Balance email sent"),
        JobOutcome::FallbackDelivered(e) => info!(error = %e, "Fallback email sent"),
    }

    Ok(())
}

struct PrintMailer;

#[async_trait::async_trait]
impl Mailer for PrintMailer {
    async fn send(&self, subject: &str, html: &str) -> Result<(), email::MailError> {
        println!("Subject: {}\n\n{}", subject, html);
        Ok(())
    }
}

pub fn setup_tracing() -> WorkerGuard {
    let env_filter = if cfg!(debug_assertions) {
        "debug,hyper=off,hyper_util=off,tower_http=info,reqwest=off,lettre=info,tokio_cron_scheduler=info"
    } else {
        "info"
    };

    let file_appender = tracing_appender::rolling::daily("./logs", "balance-mailer.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let console_layer = tracing_subscriber::fmt::layer().pretty();

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(env_filter)))
        .with(console_layer)
        .with(file_layer)
        .init();

    tracing::info!("Tracing initialized with file logging");

    guard
}
