use std::{process::ExitCode, sync::Arc, time::Duration};

use tracing::Instrument;
use tracing_subscriber::EnvFilter;

use crate::templates::registry::default_registry;
use crate::webhook::{tick_once, WebhookNotifier};

use super::{
    api::start_server,
    args::{self, ServerOpts},
    config::get_config,
    pool::init_db_and_get_pool,
    scheduler::Scheduler,
};

fn spawn_tick_loop(scheduler: Scheduler, webhooks: WebhookNotifier, tick_period: Duration) {
    tracing::info!("starting tick loop");

    tokio::spawn(async move {
        loop {
            tokio::time::sleep(tick_period).await;

            // Drain all eligible work before sleeping again.
            while tick_once(&scheduler, &webhooks).await {}
        }
    });
}

#[tracing::instrument(skip(server_opts))]
async fn run_server(server_opts: ServerOpts) -> ExitCode {
    let Some(config) = get_config() else {
        return ExitCode::FAILURE;
    };

    let root_span = tracing::info_span!(
        "orch",
        environment = %config.environment,
        application = %config.application
    );

    run_server_in_span(server_opts, config)
        .instrument(root_span)
        .await
}

async fn run_server_in_span(server_opts: ServerOpts, config: super::config::Config) -> ExitCode {
    let Some(pool) = init_db_and_get_pool(&config.async_database_url).await else {
        tracing::error!("unable to initialize database");
        return ExitCode::FAILURE;
    };

    let registry = Arc::new(default_registry());
    let scheduler = Scheduler::new(pool, registry);

    let webhooks = WebhookNotifier::new(
        Duration::from_millis(config.webhook_timeout),
        config.webhook_num_of_retries,
        Duration::from_millis(config.webhook_pause_between_retries),
    );

    spawn_tick_loop(
        scheduler.clone(),
        webhooks,
        Duration::from_millis(config.tick_period),
    );

    if let Err(error) = start_server(server_opts, &scheduler).await {
        tracing::error!(%error, "unable to start server");
        return ExitCode::FAILURE;
    }

    ExitCode::SUCCESS
}

fn init_logging(log_level: &str) -> Result<(), String> {
    let filter = EnvFilter::try_new(log_level).map_err(|error| error.to_string())?;

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_line_number(true)
        .try_init()
        .map_err(|error| error.to_string())
}

pub async fn run() -> ExitCode {
    let log_level = std::env::var("log_level").unwrap_or_else(|_| "info".to_owned());

    if let Err(error) = init_logging(&log_level) {
        eprintln!("cannot initialize logger: {error}");
        return ExitCode::FAILURE;
    }

    let options: args::OrchOptions = argh::from_env();

    match options.command {
        args::Command::Server(server_opts) => run_server(server_opts).await,
    }
}

