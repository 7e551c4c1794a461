//! Real-time dispatch simulation over a seeded city.
//!
//! Seeds units and incidents, runs the engine for a bounded duration while
//! injecting new incidents, then drains and prints a telemetry summary.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use serde::Serialize;
use tracing::{info, warn};

use dispatch_core::config::DispatchConfig;
use dispatch_core::context::DispatchContext;
use dispatch_core::engine::DispatchEngine;
use dispatch_core::model::IncidentStatus;
use dispatch_core::scenario::{generate_incidents, seed_scenario, ScenarioParams};
use dispatch_core::store::{DispatchStore, InMemoryStore};
use dispatch_core::telemetry::TelemetrySnapshot;

#[derive(Parser, Debug)]
#[command(
    name = "dispatch_sim",
    about = "Run the emergency dispatch engine against a generated city"
)]
struct Args {
    /// Units seeded at startup
    #[arg(long, default_value_t = 30)]
    units: usize,
    /// Incidents seeded at startup
    #[arg(long, default_value_t = 20)]
    incidents: usize,
    /// Wall-clock run time in seconds
    #[arg(long, default_value_t = 60)]
    duration_secs: u64,
    /// Incidents added on every injection
    #[arg(long, default_value_t = 3)]
    inject_batch: usize,
    /// Seconds between injections (0 disables injection)
    #[arg(long, default_value_t = 10)]
    inject_every_secs: u64,
    /// YAML or TOML engine configuration
    #[arg(long, env = "DISPATCH_CONFIG")]
    config: Option<PathBuf>,
    /// Seed for scenario generation and simulated work
    #[arg(long)]
    seed: Option<u64>,
    /// Override the unit speed factor (waypoints per tick)
    #[arg(long)]
    speed_factor: Option<usize>,
    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
    /// Route with an OSRM server instead of straight lines
    #[cfg(feature = "osrm")]
    #[arg(long)]
    osrm_endpoint: Option<String>,
}

#[derive(Debug, Default, Serialize)]
struct IncidentCounts {
    pending: usize,
    dispatched: usize,
    completed: usize,
}

#[derive(Debug, Serialize)]
struct RunSummary {
    units: usize,
    incidents: IncidentCounts,
    telemetry: TelemetrySnapshot,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.compact().init();
    }
}

fn load_config(args: &Args) -> Result<DispatchConfig> {
    let mut config = match &args.config {
        Some(path) => DispatchConfig::from_path(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => DispatchConfig::default(),
    };
    if let Some(seed) = args.seed {
        config = config.with_seed(seed);
    }
    if let Some(speed) = args.speed_factor {
        config = config.with_speed_factor(speed);
    }
    #[cfg(feature = "osrm")]
    if let Some(endpoint) = &args.osrm_endpoint {
        config = config.with_route_provider(dispatch_core::routing::RouteProviderKind::Osrm {
            endpoint: endpoint.clone(),
        });
    }
    Ok(config)
}

fn count_incidents(store: &dyn DispatchStore) -> Result<IncidentCounts> {
    let mut counts = IncidentCounts::default();
    for incident in store.all_incidents()? {
        match incident.status {
            IncidentStatus::Pending => counts.pending += 1,
            IncidentStatus::Dispatched => counts.dispatched += 1,
            IncidentStatus::Completed => counts.completed += 1,
        }
    }
    Ok(counts)
}

async fn inject(
    ctx: &Arc<DispatchContext>,
    params: &ScenarioParams,
    batch: usize,
    rng: StdRng,
) -> Result<StdRng> {
    let bounds = params.bounds;
    let (created, rng) = ctx
        .blocking(move |ctx| {
            let mut rng = rng;
            let created =
                generate_incidents(ctx.store.as_ref(), batch, &bounds, ctx.now_ms(), &mut rng)?;
            Ok((created, rng))
        })
        .await?;
    info!(count = created.len(), "injected incidents");
    Ok(rng)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = load_config(&args)?;
    let mut params = ScenarioParams::default()
        .with_units(args.units)
        .with_incidents(args.incidents);
    if let Some(seed) = config.seed {
        params = params.with_seed(seed);
    }

    let store = Arc::new(InMemoryStore::new());
    let ctx = DispatchContext::builder(store.clone())
        .config(config)
        .build()
        .context("building dispatch context")?;
    let seeded = seed_scenario(store.as_ref(), &params, ctx.now_ms())?;
    info!(
        units = seeded.units.len(),
        incidents = seeded.incidents.len(),
        dispatcher = %seeded.dispatcher.id,
        "scenario seeded"
    );

    let engine = DispatchEngine::new(ctx.clone());
    engine.start_dispatch();
    engine.start_escalation_monitor();
    engine.start_location_broadcast();

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration_secs));
    tokio::pin!(deadline);
    let inject_period = Duration::from_secs(args.inject_every_secs.max(1));
    let mut injector = tokio::time::interval(inject_period);
    // the first tick completes immediately
    injector.tick().await;
    let mut rng = params.rng();

    loop {
        tokio::select! {
            _ = &mut deadline => break,
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    warn!(error = %err, "failed to listen for ctrl-c");
                }
                info!("interrupted");
                break;
            }
            _ = injector.tick(), if args.inject_every_secs > 0 && args.inject_batch > 0 => {
                rng = inject(&ctx, &params, args.inject_batch, rng).await?;
            }
        }
    }

    engine.shutdown().await;

    let summary = RunSummary {
        units: store.all_units()?.len(),
        incidents: count_incidents(store.as_ref())?,
        telemetry: engine.telemetry(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}
