use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use parking_lot::Mutex;
use quickserve::{AppState, Dispatcher, ExecutionStore, JobQueue, app, loader};
use quickserve_common::HandlerRegistry;
use rusqlite::Connection;
use tracing::info;
use tracing_subscriber::EnvFilter;

const EXAMPLES: &str = "\u{001b}[1;4mExamples:\u{001b}[0m
  Start the server and register a route at runtime:
    $ quickserve --listen 127.0.0.1:8080 &
    $ curl -X POST --data-binary 'registerHandler(\"GET\", \"/hello\", () => ({ hello: \"world\" }));' \\
        http://127.0.0.1:8080/v1/execute
    JavaScript executed
    $ curl http://127.0.0.1:8080/hello
    {\"hello\":\"world\"}

  Load handler scripts from a directory at startup:
    $ quickserve --scripts ./scripts --database ./quickserve.db
";

/// A live-programmable HTTP server: POST JavaScript to /v1/execute and the
/// registered routes become reachable immediately.
#[derive(Parser)]
#[command(version, about)]
#[clap(after_help = EXAMPLES)]
struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "127.0.0.1:8080")]
    listen: SocketAddr,

    /// SQLite database file, shared by execution records and `db.query`.
    #[arg(long, default_value = "quickserve.db")]
    database: PathBuf,

    /// Directory of `*.js` scripts to run at startup.
    #[arg(long)]
    scripts: Option<PathBuf>,

    /// Capacity of the job queue between HTTP tasks and the dispatcher.
    #[arg(long, default_value_t = quickserve::DEFAULT_QUEUE_CAPACITY)]
    queue_capacity: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();

    let connection = Connection::open(&cli.database)
        .with_context(|| format!("opening database {}", cli.database.display()))?;
    let connection = Arc::new(Mutex::new(connection));

    let store = ExecutionStore::new(connection.clone());
    store.init_schema().context("initializing the execution store")?;

    let registry = Arc::new(HandlerRegistry::new());
    let (queue, receiver) = JobQueue::bounded(cli.queue_capacity);
    let dispatcher = Dispatcher::spawn(receiver, registry.clone(), connection, store.clone());

    if let Some(dir) = &cli.scripts {
        let loaded = loader::load_scripts(dir, &queue).await?;
        info!(count = loaded, dir = %dir.display(), "startup scripts submitted");
    }

    let state = AppState {
        queue: queue.clone(),
        registry,
        store,
    };
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("binding {}", cli.listen))?;
    info!(listen = %cli.listen, "quickserve listening");

    axum::serve(
        listener,
        app(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received");
    })
    .await
    .context("serving HTTP")?;

    // Cancel anything still queued, then let the dispatcher thread exit
    // once the last producer handle is gone.
    dispatcher.shutdown();
    drop(queue);
    dispatcher.join();

    Ok(())
}
