//! proxy-loadgen: 代理厂商合成流量生成器
//!
//! Usage:
//!   proxy-loadgen run [--config <path>] [--patterns a,b] [--duration <secs>] [--rps <n>] [--seed <n>]
//!   proxy-loadgen check [--config <path>]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use proxy_loadgen::config::validator;
use proxy_loadgen::metrics::{CompositeSink, LoggingSink, MetricsSink};
use proxy_loadgen::scheduler::{pattern_sources, BoxedSource};
use proxy_loadgen::server::{self, AppState};
use proxy_loadgen::{
    BufferedSink, Dispatcher, HttpTransport, LoadgenConfig, PrometheusMetrics, RequestScheduler,
    SchedulingPolicy, VendorRegistry,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "proxy-loadgen", version, about = "Synthetic traffic through proxy vendors")]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate traffic and serve metrics until the run ends or Ctrl-C
    Run(RunArgs),
    /// Validate a configuration file and print the vendor layout
    Check {
        #[arg(short, long, env = "LOADGEN_CONFIG", default_value = "config/loadgen.yaml")]
        config: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    #[arg(short, long, env = "LOADGEN_CONFIG", default_value = "config/loadgen.yaml")]
    config: PathBuf,

    /// Named traffic patterns to run side by side, e.g. `steady,burst`
    #[arg(long, value_delimiter = ',')]
    patterns: Vec<String>,

    /// Stop accepting new intents after this many seconds (every pattern)
    #[arg(long)]
    duration: Option<u64>,

    /// Intents per second without patterns; 0 disables pacing
    #[arg(long)]
    rps: Option<f64>,

    /// Intents to generate, per pattern when patterns are selected
    #[arg(long)]
    count: Option<usize>,

    #[arg(long)]
    seed: Option<u64>,

    #[arg(long, value_parser = parse_policy)]
    policy: Option<SchedulingPolicy>,

    #[arg(long)]
    metrics_addr: Option<String>,
}

/// What feeds the dispatcher: the `traffic` defaults, or named patterns side by side.
enum Traffic {
    Single(RequestScheduler),
    Patterns(Vec<BoxedSource>),
}

fn parse_policy(s: &str) -> Result<SchedulingPolicy, String> {
    serde_yaml::from_str(s).map_err(|_| {
        format!(
            "unknown policy '{}', expected fixed_weights, round_robin or weighted_random",
            s
        )
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Check { config } => check(config),
    }
}

async fn run(args: RunArgs) -> anyhow::Result<()> {
    let mut cfg = LoadgenConfig::load_or_default(&args.config)?.with_env_overrides()?;
    if let Some(secs) = args.duration {
        cfg.traffic.duration_secs = Some(secs);
        for pattern in cfg.traffic_patterns.values_mut() {
            pattern.duration_secs = Some(secs);
        }
    }
    if let Some(rps) = args.rps {
        cfg.traffic.requests_per_second = (rps > 0.0).then_some(rps);
    }
    if let Some(seed) = args.seed {
        cfg.scheduling.seed = Some(seed);
    }
    if let Some(policy) = args.policy {
        cfg.scheduling.policy = policy;
    }
    if let Some(addr) = args.metrics_addr {
        cfg.metrics.listen_addr = addr;
    }
    validator::validate(&cfg)?;

    let addr: SocketAddr = cfg
        .metrics
        .listen_addr
        .parse()
        .with_context(|| format!("invalid metrics address '{}'", cfg.metrics.listen_addr))?;

    let registry = Arc::new(VendorRegistry::from_config(&cfg));
    let transport = Arc::new(HttpTransport::from_registry(&registry, &cfg)?);
    let prometheus = Arc::new(PrometheusMetrics::new()?);
    let buffered = BufferedSink::spawn(cfg.metrics.sink_queue_capacity, prometheus.clone());

    let mut sink = CompositeSink::new().add(buffered.clone());
    if cfg.metrics.log_outcomes {
        sink = sink.add(Arc::new(LoggingSink));
    }
    let sink: Arc<dyn MetricsSink> = Arc::new(sink);

    let dispatcher = Dispatcher::builder(registry.clone(), transport)
        .with_config(&cfg)
        .with_sink(sink.clone())
        .build();
    let traffic = if args.patterns.is_empty() {
        Traffic::Single(RequestScheduler::from_config(registry.clone(), &cfg)?)
    } else {
        Traffic::Patterns(pattern_sources(&registry, &cfg, &args.patterns, args.count)?)
    };

    let server_stop = tokio_util::sync::CancellationToken::new();
    let server = tokio::spawn(server::serve(
        addr,
        AppState::new(registry.clone(), dispatcher.stats_handle(), prometheus, sink),
        server_stop.clone(),
    ));

    let shutdown = dispatcher.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    info!(
        vendors = cfg.vendors.len(),
        pools = registry.pools().count(),
        policy = ?cfg.scheduling.policy,
        patterns = ?args.patterns,
        rps = ?cfg.traffic.requests_per_second,
        duration_secs = ?cfg.traffic.duration_secs,
        "starting traffic"
    );
    let limit = cfg.traffic.duration_secs.map(Duration::from_secs);
    let report = match traffic {
        Traffic::Patterns(sources) => dispatcher.run_sources(sources).await,
        Traffic::Single(scheduler) => match args.count {
            Some(n) => dispatcher.run_for(scheduler.take(n), limit).await,
            None => dispatcher.run_for(scheduler, limit).await,
        },
    };

    buffered.close().await;
    server_stop.cancel();
    match server.await {
        Ok(Err(e)) => warn!(error = %e, "status server exited with error"),
        Err(e) => warn!(error = %e, "status server task failed"),
        Ok(Ok(())) => {}
    }

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn check(path: PathBuf) -> anyhow::Result<()> {
    let cfg = LoadgenConfig::from_file(&path)
        .with_context(|| format!("configuration {} is invalid", path.display()))?;

    println!("{} is valid", path.display());
    println!(
        "policy: {:?}, destinations: {}, workers: {}",
        cfg.scheduling.policy,
        cfg.destinations.len(),
        cfg.dispatch.workers.unwrap_or_else(|| cfg.total_capacity())
    );
    for vendor in &cfg.vendors {
        println!(
            "{} attempt_timeout_ms={} max_retries={} rate_limit={}",
            vendor.id,
            vendor.attempt_timeout_ms.unwrap_or(cfg.dispatch.attempt_timeout_ms),
            vendor.max_retries.unwrap_or(cfg.dispatch.max_retries),
            vendor
                .rate_limit
                .map(|r| r.to_string())
                .unwrap_or_else(|| "none".to_string())
        );
        for pool in &vendor.pools {
            println!(
                "  {:<24} max_concurrency={:<5} weight={}",
                pool.id, pool.max_concurrency, pool.weight
            );
        }
    }
    for (name, pattern) in &cfg.traffic_patterns {
        println!(
            "pattern {:<10} rps={:?} duration_secs={:?} methods={:?}",
            name, pattern.requests_per_second, pattern.duration_secs, pattern.methods
        );
    }
    Ok(())
}
