use anyhow::{Context, Result};
use clap::Parser;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use edgebeat::cli::{Cli, Commands, VERSION_WITH_BUILD};
use edgebeat::core::{
    host_providers, AgentConfig, Aggregator, FanoutSink, LogFormat, MqttSink, PublishSink, Scheduler,
    Snapshot, SnapshotStore, StoreHandle, WebhookSink,
};
use edgebeat::utils::{format_bytes, format_duration, format_interval, init_tracing};

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let (config, config_path) = AgentConfig::load(cli.config.as_deref(), &cli.overrides())?;

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => run(config, config_path.as_deref()).await?,
        Commands::Collect { pretty, summary } => collect(&config, pretty, summary).await?,
        Commands::CheckConfig => check_config(&config, config_path.as_deref())?,
    }

    Ok(())
}

async fn run(config: AgentConfig, config_path: Option<&Path>) -> Result<()> {
    init_tracing(&config.log.level, config.log.format == LogFormat::Json)?;
    info!(
        version = VERSION_WITH_BUILD,
        config = %config_path.map(|p| p.display().to_string()).unwrap_or_else(|| "defaults".to_string()),
        interval = %format_interval(&config.interval()),
        "starting edgebeat"
    );

    let store = StoreHandle::new(Arc::new(SnapshotStore::new()));
    let aggregator = Aggregator::new(host_providers()).with_timeout(config.provider_timeout());

    let mut scheduler = Scheduler::new(aggregator, store.clone(), config.interval())
        .with_publish_timeout(config.publish_timeout());

    let cancel = CancellationToken::new();

    let mut sinks: Vec<Arc<dyn PublishSink>> = Vec::new();
    if config.publish.enabled {
        let sink = WebhookSink::new(&config.publish.url, config.publish_timeout(), &config.publish.headers)
            .context("Failed to create webhook sink")?;
        info!(url = sink.url(), "publishing snapshots to webhook");
        sinks.push(Arc::new(sink));
    }
    if config.mqtt.enabled {
        let sink = MqttSink::connect(&config.mqtt, &cancel).context("Failed to create MQTT sink")?;
        info!(broker = %config.mqtt.broker, topic = sink.topic(), "publishing snapshots over MQTT");
        sinks.push(Arc::new(sink));
    }
    match sinks.len() {
        0 => {}
        1 => scheduler = scheduler.with_sink(sinks.remove(0)),
        _ => scheduler = scheduler.with_sink(Arc::new(FanoutSink::new(sinks))),
    }

    let scheduler_task = {
        let cancel = cancel.clone();
        tokio::spawn(async move { scheduler.run(cancel).await })
    };

    #[cfg(feature = "server")]
    let server_task = if config.rest.enabled {
        let addr = config.rest_address()?;
        let cancel = cancel.clone();
        let cors = config.rest.cors;
        Some(tokio::spawn(async move {
            edgebeat::server::run(addr, store, cors, cancel).await
        }))
    } else {
        None
    };

    #[cfg(not(feature = "server"))]
    let server_task: Option<tokio::task::JoinHandle<Result<()>>> = {
        if config.rest.enabled {
            warn!("built without the server feature, HTTP read path disabled");
        }
        None
    };

    shutdown_signal().await;
    info!("shutdown requested");
    cancel.cancel();

    match scheduler_task.await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => error!(error = %err, "scheduler failed"),
        Err(err) => error!(error = %err, "scheduler task panicked"),
    }

    if let Some(task) = server_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => error!(error = %err, "HTTP server failed"),
            Err(err) => error!(error = %err, "HTTP server task panicked"),
        }
    }

    info!("edgebeat stopped");
    Ok(())
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

async fn collect(config: &AgentConfig, pretty: bool, summary: bool) -> Result<()> {
    init_tracing(&config.log.level, config.log.format == LogFormat::Json)?;

    let snapshot = Aggregator::new(host_providers())
        .with_timeout(config.provider_timeout())
        .collect()
        .await;

    if summary {
        println!("{}", summary_line(&snapshot));
    } else if pretty {
        snapshot.encode()?;
        println!("{}", serde_json::to_string_pretty(&snapshot)?);
    } else {
        println!("{}", String::from_utf8_lossy(&snapshot.encode()?));
    }

    for err in &snapshot.errors {
        warn!(error = %err, "provider failed");
    }

    Ok(())
}

fn summary_line(snapshot: &Snapshot) -> String {
    let memory = &snapshot.memory.virtual_memory;
    format!(
        "{} | cpu {:.1}% | load {:.2} | mem {} / {} ({:.1}%) | up {} | {} errors",
        snapshot.host.hostname,
        snapshot.cpu.total_percent,
        snapshot.load.load1,
        format_bytes(memory.used),
        format_bytes(memory.total),
        memory.used_percent,
        format_duration(snapshot.host.uptime_seconds),
        snapshot.errors.len(),
    )
}

fn check_config(config: &AgentConfig, config_path: Option<&Path>) -> Result<()> {
    match config_path {
        Some(path) => println!("✓ Configuration valid: {}", path.display()),
        None => println!("✓ No config file found, using defaults"),
    }
    println!();
    print!(
        "{}",
        serde_yaml::to_string(&config.redacted()).context("Failed to render configuration")?
    );
    Ok(())
}
