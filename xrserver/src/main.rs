use std::sync::Arc;

use clap::Parser;
use log::info;

use xrserver::cache::ResponseCache;
use xrserver::util::setup_logs;
use xrserver::{build_router, Ctx};

/// Backend loading precedence (spec.md 4.7): compiled-in defaults -> `--backends-file` if given
/// -> full replacement by `XREGISTRY_BACKENDS` (a JSON array) if set. Each stage fully replaces
/// the previous one; they don't merge.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Listen on a TCP address, e.g. "0.0.0.0:8080". Mutually exclusive with --uds.
    #[arg(long)]
    tcp: Option<String>,

    /// Listen on a Unix domain socket path. Mutually exclusive with --tcp.
    #[arg(long)]
    uds: Option<String>,

    /// JSON file containing a list of `{name, registryUrl, username?, password?, catalogPath?}`.
    #[arg(long)]
    backends_file: Option<std::path::PathBuf>,

    /// Root directory for the response cache (C2). Created on demand.
    #[arg(long, default_value = "./cache")]
    cache_dir: std::path::PathBuf,

    /// When set, every request must carry `Authorization: Bearer <key>` matching this value.
    #[arg(long)]
    bearer_key: Option<String>,

    /// Cap on attribute-filter enrichment fetches per collection request (spec.md 4.4/5).
    #[arg(long, default_value_t = 20)]
    max_enrich_fetches: usize,

    /// Include full error detail in Problem-Details responses instead of a redacted title.
    #[arg(long)]
    dev: bool,
}

fn load_backends(args: &Args) -> Vec<xrmodel::Backend> {
    let mut backends = xrmodel::default_backends();

    if let Some(path) = &args.backends_file {
        match std::fs::read_to_string(path) {
            Ok(data) => match xrmodel::load_backends_from_json(&data) {
                Ok(loaded) => backends = loaded,
                Err(e) => panic!("failed to parse --backends-file {path:?}: {e}"),
            },
            Err(e) => panic!("failed to read --backends-file {path:?}: {e}"),
        }
    }

    if let Ok(data) = std::env::var("XREGISTRY_BACKENDS") {
        match xrmodel::load_backends_from_json(&data) {
            Ok(loaded) => backends = loaded,
            Err(e) => panic!("failed to parse XREGISTRY_BACKENDS: {e}"),
        }
    }

    backends
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    setup_logs();

    let args = Args::parse();
    let backends = load_backends(&args);
    info!("loaded {} backend(s)", backends.len());

    let ctx = Arc::new(Ctx {
        backends: xrmodel::BackendTable::new(backends),
        client: ocidist::Client::new().expect("failed to build upstream client"),
        cache: ResponseCache::new(args.cache_dir.clone()),
        started_at: xrmodel::time::to_rfc3339(xrmodel::time::now()),
        dev: args.dev,
        max_enrich_fetches: args.max_enrich_fetches,
        bearer_key: args.bearer_key,
    });

    let app = build_router(ctx);

    match (args.tcp, args.uds) {
        (Some(addr), None) => {
            let listener = tokio::net::TcpListener::bind(&addr).await.unwrap();
            info!("listening on tcp://{addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .unwrap();
        }
        (None, Some(addr)) => {
            let _ = std::fs::remove_file(&addr);
            let listener = tokio::net::UnixListener::bind(&addr).unwrap();
            info!("listening on unix://{addr}");
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .unwrap();
        }
        (Some(_), Some(_)) => panic!("cannot use --tcp and --uds together"),
        (None, None) => panic!("must use --tcp or --uds"),
    };
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.unwrap();
    info!("received ctrl-c, shutting down");
}
