//! dockpanel - container telemetry and image update-check backend.
//!
//! Serves cached per-container resource stats and image update status to a
//! dashboard, and exports the same data for Prometheus.

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use clap::{Parser, ValueEnum};
use dockpanel::config::{
    load_config, validate_effective_config, DEFAULT_BIND_ADDR, DEFAULT_PORT,
};
use dockpanel::runtime::DockerRuntime;
use dockpanel::{
    Config, ContainerRuntime, HealthStats, StatsCache, StatsCollector, UpdateCache, UpdateChecker,
};
use prometheus::{Gauge, Registry};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::{net::TcpListener, signal};
use tracing::{debug, error, info, level_filters::LevelFilter};

mod cli;
mod commands;
mod handlers;
mod metrics;
mod state;

use cli::{Args, Commands, ConfigFormat, LogLevel};
use handlers::{
    check_updates_handler, containers_handler, health_handler, metrics_handler,
    update_status_handler,
};
use metrics::ContainerMetrics;
use state::AppState;

/// Resolves the effective configuration (CLI > config file > defaults).
fn resolve_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = if args.no_config {
        Config::default()
    } else {
        load_config(args.config.as_deref())?
    };

    // Override with CLI args
    if let Some(bind_ip) = args.bind {
        config.bind = Some(bind_ip.to_string());
    }
    if let Some(port) = args.port {
        config.port = Some(port);
    }
    if let Some(level) = args.log_level {
        config.log_level = level
            .to_possible_value()
            .map(|v| v.get_name().to_string());
    }
    if let Some(socket) = &args.docker_socket {
        config.docker_socket = Some(socket.clone());
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval_ms = Some(ms);
    }
    if let Some(n) = args.stats_concurrency {
        config.stats_concurrency = Some(n);
    }
    if let Some(secs) = args.update_check_interval {
        config.update_check_interval_secs = Some(secs);
    }

    // Feature flags
    if args.disable_health {
        config.enable_health = Some(false);
    }
    if args.disable_metrics {
        config.enable_metrics = Some(false);
    }

    Ok(config)
}

/// Shows configuration in requested format
fn show_config(config: &Config, format: ConfigFormat) -> anyhow::Result<()> {
    let output = match format {
        ConfigFormat::Json => serde_json::to_string_pretty(config)?,
        ConfigFormat::Toml => toml::to_string_pretty(config)?,
        ConfigFormat::Yaml => serde_yaml::to_string(config)?,
    };
    println!("{output}");
    Ok(())
}

fn setup_logging(config: &Config) {
    let level = config
        .log_level
        .as_deref()
        .and_then(|s| LogLevel::from_str(s, true).ok())
        .unwrap_or(LogLevel::Info);

    let max_level = match level {
        LogLevel::Off => LevelFilter::OFF,
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    };

    let subscriber = tracing_subscriber::fmt()
        .with_max_level(max_level)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");

    info!("Logging initialized with level: {:?}", level);
}

/// -------------------------------------------------------------------
/// MAIN APPLICATION ENTRY POINT
/// -------------------------------------------------------------------
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Early config resolution for show/check modes
    if args.show_config || args.check_config {
        let config = resolve_config(&args)?;

        if args.check_config {
            if let Err(e) = validate_effective_config(&config) {
                eprintln!("Configuration invalid: {}", e);
                std::process::exit(1);
            }
            println!("Configuration is valid");
            return Ok(());
        }

        return show_config(&config, args.config_format.clone());
    }

    let config = resolve_config(&args)?;
    if let Err(e) = validate_effective_config(&config) {
        eprintln!("Configuration invalid: {}", e);
        std::process::exit(1);
    }

    // Handle subcommands
    if let Some(command) = &args.command {
        if !matches!(command, Commands::Config { .. }) {
            setup_logging(&config);
        }
        return match command {
            Commands::Check { containers } => commands::command_check(*containers, &config).await,
            Commands::Config {
                output,
                format,
                commented,
            } => commands::command_config(output.clone(), format.clone(), *commented),
            Commands::Test { iterations, format } => {
                commands::command_test(*iterations, format.clone(), &config).await
            }
            Commands::CheckUpdates { format } => {
                commands::command_check_updates(format.clone(), &config).await
            }
        };
    }

    setup_logging(&config);
    info!("Starting dockpanel");

    let bind_ip_str = config.bind.as_deref().unwrap_or(DEFAULT_BIND_ADDR);
    let port = config.port.unwrap_or(DEFAULT_PORT);

    let runtime: Arc<dyn ContainerRuntime> = Arc::new(
        DockerRuntime::connect(config.docker_socket.as_deref())
            .context("Failed to connect to Docker daemon")?,
    );

    // Initialize Prometheus metrics registry
    let registry = Registry::new();
    let metrics = ContainerMetrics::new(&registry)?;
    let scrape_duration = Gauge::new(
        "dockpanel_scrape_duration_seconds",
        "Time spent serving /metrics request (reading from cache)",
    )?;
    registry.register(Box::new(scrape_duration.clone()))?;
    debug!("All metrics registered successfully");

    let health_stats = Arc::new(HealthStats::new());
    let collector = StatsCollector::new(
        runtime.clone(),
        Arc::new(StatsCache::new()),
        health_stats.clone(),
        config.collector_settings(),
    );
    let checker = UpdateChecker::new(
        runtime.clone(),
        Arc::new(UpdateCache::new()),
        config.update_settings(),
    );

    let state = Arc::new(AppState {
        registry,
        metrics,
        scrape_duration,
        runtime,
        collector,
        checker: checker.clone(),
        health_stats,
    });

    // Scheduled update checks; the collector starts on first demand
    let periodic_task = match config.update_check_interval() {
        Some(every) => {
            info!("Scheduled update checks every {}s", every.as_secs());
            Some(checker.spawn_periodic(every))
        }
        None => {
            info!("Scheduled update checks disabled");
            None
        }
    };

    // Setup graceful shutdown signal handlers
    let shutdown_signal = async {
        let ctrl_c = async {
            signal::ctrl_c()
                .await
                .expect("Failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            signal::unix::signal(signal::unix::SignalKind::terminate())
                .expect("Failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                info!("Received SIGINT (Ctrl+C), shutting down gracefully...");
            }
            _ = terminate => {
                info!("Received SIGTERM, shutting down gracefully...");
            }
        }
    };

    // Configure HTTP server routes and start listening
    let addr: SocketAddr = format!("{}:{}", bind_ip_str, port).parse()?;

    let mut app = Router::new()
        .route("/api/docker/containers", get(containers_handler))
        .route("/api/docker/update-status", get(update_status_handler))
        .route("/api/docker/check-updates", post(check_updates_handler));

    if config.enable_metrics.unwrap_or(true) {
        app = app.route("/metrics", get(metrics_handler));
    }
    if config.enable_health.unwrap_or(true) {
        app = app.route("/health", get(health_handler));
    }

    let app = app.with_state(state.clone());

    let listener = TcpListener::bind(addr).await?;
    info!("dockpanel listening on http://{}:{}", bind_ip_str, port);

    let server = axum::serve(listener, app);

    tokio::select! {
        result = server => {
            if let Err(e) = result {
                error!("Server error: {}", e);
                return Err(e.into());
            }
        }
        _ = shutdown_signal => {
            info!("Shutdown signal received, exiting...");
        }
    }

    // Cleanup: cancel background task before exit
    if let Some(task) = periodic_task {
        task.abort();
        let _ = task.await;
    }

    info!("dockpanel stopped gracefully");
    Ok(())
}
