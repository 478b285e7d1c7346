//! Startup script loading.
//!
//! Feeds `*.js` files from a directory through the normal submission path,
//! one at a time, with a per-script timeout. A timed-out script keeps
//! running on the dispatcher; its result lands in an abandoned channel,
//! which is harmless because oneshot sends never block.

use std::path::Path;
use std::time::Duration;

use anyhow::Context as _;
use quickserve_common::{EvalJob, ExecSource, Job};
use tokio::sync::oneshot;
use tracing::{info, warn};

use crate::queue::JobQueue;

/// How long to wait for each startup script before moving on.
pub const SCRIPT_LOAD_TIMEOUT: Duration = Duration::from_secs(10);

/// Submit every `*.js` file in `dir` (sorted by file name) and wait for
/// each result. Script errors and timeouts are logged, not fatal. Returns
/// the number of scripts submitted.
pub async fn load_scripts(dir: &Path, queue: &JobQueue) -> anyhow::Result<usize> {
    let mut paths = Vec::new();
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("reading script directory {}", dir.display()))?
    {
        let path = entry?.path();
        if path.extension().is_some_and(|ext| ext == "js") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut loaded = 0;
    for path in paths {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let code = std::fs::read_to_string(&path)
            .with_context(|| format!("reading script {}", path.display()))?;

        let (result_tx, result_rx) = oneshot::channel();
        let job = Job::Eval(EvalJob {
            code,
            session_id: name.clone(),
            source: ExecSource::File,
            result: Some(result_tx),
            done: None,
        });

        if queue.submit(job).await.is_err() {
            warn!(script = %name, "dispatcher unavailable, stopping script loading");
            break;
        }
        loaded += 1;

        match tokio::time::timeout(SCRIPT_LOAD_TIMEOUT, result_rx).await {
            Ok(Ok(result)) => match &result.error {
                Some(error) => warn!(script = %name, %error, "startup script failed"),
                None => info!(script = %name, "startup script loaded"),
            },
            Ok(Err(_)) => warn!(script = %name, "startup script was canceled"),
            Err(_) => warn!(
                script = %name,
                timeout = ?SCRIPT_LOAD_TIMEOUT,
                "startup script still running, not waiting for it"
            ),
        }
    }

    Ok(loaded)
}
