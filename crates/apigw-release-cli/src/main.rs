//! API Gateway Release CLI - command-line publishing.
//!
//! This is the entry point for the `apigw-release` binary. It runs the
//! release orchestration core in synchronous mode against a local store and
//! reports one line per target.

mod render;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use apigw_release_control::{
    AttemptId, DispatchRequest, DispatchResult, Dispatcher, ExecutionMode, PublisherConfig,
};
use apigw_release_core::{GatewayId, StageId};
use apigw_release_store::{RocksStore, Store};
use clap::{Parser, Subcommand};

use render::{format_attempt, format_line, history_label, target_line};

/// API Gateway Release CLI - publish gateway stages to their data planes.
#[derive(Parser, Debug)]
#[command(name = "apigw-release")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// `RocksDB` data directory.
    #[arg(long, env = "DATA_DIR", default_value = "/data")]
    data_dir: String,

    /// Base URL of the shared registry push service.
    #[arg(long, env = "REGISTRY_PUSH_URL")]
    registry_push_url: Option<String>,

    /// Base URL of the chart rollout service.
    #[arg(long, env = "CHART_ROLLOUT_URL")]
    chart_rollout_url: Option<String>,

    /// Base URL of the PaaS de-provisioning service.
    #[arg(long, env = "PAAS_DEPROVISION_URL")]
    paas_deprovision_url: Option<String>,

    /// Timeout of one backend call, in seconds.
    #[arg(long, env = "BACKEND_TIMEOUT_SECS", default_value_t = 30)]
    backend_timeout_secs: u64,

    /// Schema version resource versions must use.
    #[arg(long, env = "CURRENT_SCHEMA_VERSION", default_value = "2.0")]
    schema_version: String,

    /// Enable debug logging.
    #[arg(long, default_value = "false")]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a publish trigger and wait for every backend call.
    Publish {
        /// Trigger source, e.g. `cli-sync` or `gateway-delete`.
        #[arg(long, default_value = "cli-sync")]
        source: String,

        /// Gateway ID.
        #[arg(long)]
        gateway: u64,

        /// Narrow the publish to one stage.
        #[arg(long)]
        stage: Option<u64>,

        /// Operator recorded on the history rows.
        #[arg(long, env = "USER", default_value = "cli")]
        author: String,

        /// Stable key making a retried publish idempotent.
        #[arg(long)]
        attempt_key: Option<String>,

        /// Print the result as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Show the aggregate status of an attempt.
    Attempt {
        /// Attempt ID (hex).
        id: String,
    },
    /// List the history rows of a stage.
    History {
        /// Gateway ID.
        #[arg(long)]
        gateway: u64,

        /// Stage ID.
        #[arg(long)]
        stage: u64,
    },
}

impl Args {
    fn publisher_config(&self) -> PublisherConfig {
        PublisherConfig {
            data_dir: self.data_dir.clone(),
            registry_push_url: self.registry_push_url.clone(),
            chart_rollout_url: self.chart_rollout_url.clone(),
            paas_deprovision_url: self.paas_deprovision_url.clone(),
            backend_timeout_secs: self.backend_timeout_secs,
            current_schema_version: self.schema_version.clone(),
            ..PublisherConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.debug {
        "apigw_release=debug,info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = args.publisher_config();
    let store = Arc::new(
        RocksStore::open(&config.data_dir)
            .with_context(|| format!("failed to open store at {}", config.data_dir))?,
    );

    match args.command {
        Command::Publish {
            source,
            gateway,
            stage,
            author,
            attempt_key,
            json,
        } => {
            let mut request = DispatchRequest::new(source, GatewayId::new(gateway), author)
                .with_mode(ExecutionMode::Sync);
            if let Some(stage) = stage {
                request = request.with_stage(StageId::new(stage));
            }
            if let Some(key) = attempt_key {
                request = request.with_attempt_key(key);
            }
            publish(store, &config, request, json).await
        }
        Command::Attempt { id } => {
            let attempt_id: AttemptId = id.parse().context("invalid attempt id")?;
            let attempt = store
                .get_attempt(&attempt_id)?
                .with_context(|| format!("attempt {attempt_id} not found"))?;
            println!("{}", format_attempt(&attempt));
            Ok(ExitCode::SUCCESS)
        }
        Command::History { gateway, stage } => {
            let rows = store.list_histories_by_stage(GatewayId::new(gateway), StageId::new(stage))?;
            for row in &rows {
                println!(
                    "{} attempt={} data_plane={} rv={} {} {}",
                    row.created_time.to_rfc3339(),
                    row.attempt_id,
                    row.data_plane_id,
                    row.resource_version_id,
                    history_label(row.status),
                    row.message,
                );
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn publish(
    store: Arc<RocksStore>,
    config: &PublisherConfig,
    request: DispatchRequest,
    json: bool,
) -> anyhow::Result<ExitCode> {
    let dispatcher = Dispatcher::from_config(Arc::clone(&store), config)?;
    let result = dispatcher.trigger(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result.summary())?);
    }

    if let DispatchResult::NothingToDo = result {
        if !json {
            println!("nothing to do: no release in scope");
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut failed = false;
    for outcome in result.outcomes() {
        let history = outcome
            .history_id
            .map(|id| store.get_history(&id))
            .transpose()?
            .flatten();
        let task = outcome
            .task_id
            .map(|id| store.get_task(&id))
            .transpose()?
            .flatten();

        let line = target_line(outcome, history.as_ref(), task.as_ref());
        failed |= line.is_failure();
        if !json {
            println!("{}", format_line(&line));
        }
    }

    if let Some(attempt_id) = result.attempt_id() {
        if let Some(attempt) = store.get_attempt(&attempt_id)? {
            if !json {
                println!("{}", format_attempt(&attempt));
            }
        }
    }

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}
