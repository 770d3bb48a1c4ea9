use axum::Router;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fili_druid::{DruidServiceConfig, DruidWebService, HttpDruidWebService};

mod api;
mod availability;
mod builder;
mod cache;
mod config;
mod context;
mod error;
mod format;
mod loader;
mod mappers;
mod processor;
#[cfg(test)]
mod testing;
mod volatility;
mod weight;
mod workflow;

use availability::{PhysicalTable, PhysicalTableDictionary};
use cache::{ResponseCache, SegmentIntervalsSigningService};
use config::{CacheMode, Config};
use loader::SegmentMetadataLoader;
use volatility::{DefaultingVolatileIntervalsService, SystemClock};
use workflow::{DruidWorkflow, WorkflowDeps};

// =============================================================================
// CLI
// =============================================================================

#[derive(Parser)]
#[command(name = "fili-server", version, about = "Fili Druid data service")]
struct Args {
    /// Path to config file
    #[arg(long, default_value = "fili.toml")]
    config: PathBuf,

    /// Server bind address, overrides the config file
    #[arg(long)]
    bind: Option<String>,
}

// =============================================================================
// Shared state
// =============================================================================

pub struct AppState {
    config: Config,
    workflow: DruidWorkflow,
    dictionary: Arc<PhysicalTableDictionary>,
    cache: Arc<ResponseCache>,
    cache_mode: CacheMode,
    loader: Option<Arc<SegmentMetadataLoader>>,
    start_time: Instant,
}

fn web_service(config: &DruidServiceConfig) -> Arc<dyn DruidWebService> {
    match HttpDruidWebService::new(config.clone()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!("Failed to build druid client '{}': {}", config.name, e);
            std::process::exit(1);
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "fili_server=info,tower_http=info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();

    let mut config = match Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("Invalid configuration {:?}: {}", args.config, e);
            std::process::exit(1);
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }

    let dictionary = Arc::new(PhysicalTableDictionary::new());
    for table in config.tables.iter().filter(|t| t.is_seeded()) {
        match PhysicalTable::from_config(table) {
            Ok(physical) => dictionary.insert(physical),
            Err(e) => {
                tracing::error!("Table '{}' has unusable availability: {}", table.name, e);
                std::process::exit(1);
            }
        }
    }

    let cache_mode = config.cache.mode().unwrap_or(CacheMode::None);
    let cache = Arc::new(ResponseCache::new(config.cache.max_entries));
    let deps = WorkflowDeps {
        ui_service: web_service(&config.druid.ui),
        non_ui_service: web_service(&config.druid.non_ui),
        dictionary: dictionary.clone(),
        volatility: Arc::new(DefaultingVolatileIntervalsService::from_config(
            &config.volatility,
            Arc::new(SystemClock),
        )),
        cache: cache.clone(),
        signer: Arc::new(SegmentIntervalsSigningService::new(dictionary.clone())),
    };
    let workflow = match DruidWorkflow::build(&config, deps) {
        Ok(workflow) => workflow,
        Err(e) => {
            tracing::error!("Cannot assemble the request workflow: {}", e);
            std::process::exit(1);
        }
    };
    let topology = workflow.topology();
    tracing::info!(outer = ?topology.outer, ui = ?topology.ui, non_ui = ?topology.non_ui, "workflow ready");

    let loader = config.druid.coordinator.as_ref().map(|coordinator| {
        let polled = config
            .tables
            .iter()
            .filter(|t| t.poll)
            .map(|t| (t.name.clone(), t.column_names.clone()))
            .collect();
        Arc::new(SegmentMetadataLoader::new(
            web_service(coordinator),
            dictionary.clone(),
            polled,
        ))
    });
    if let Some(loader) = &loader {
        let period = Duration::from_secs(config.server.metadata_refresh_secs.max(1));
        tokio::spawn(loader.clone().run(period));
    } else {
        tracing::info!("No coordinator configured, serving static availability only");
    }

    let bind = config.server.bind.clone();
    let state = Arc::new(AppState {
        config,
        workflow,
        dictionary,
        cache,
        cache_mode,
        loader,
        start_time: Instant::now(),
    });

    let app: Router = api::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = match bind.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!("Invalid bind address '{}': {}", bind, e);
            std::process::exit(1);
        }
    };
    tracing::info!("Fili listening on http://{}", addr);
    tracing::info!("  Data:    POST http://{}{}", addr, api::DATA_PATH);
    tracing::info!("  Health:  GET  http://{}/healthcheck", addr);

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!("Cannot bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };
    if let Err(e) = axum::serve(listener, app).await {
        tracing::error!("Server error: {}", e);
    }
}
