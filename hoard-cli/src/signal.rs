use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `token` on Ctrl-C or, on Unix, SIGTERM.
///
/// The listener ends when the token is cancelled by anyone else.
pub fn cancel_on_shutdown(token: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => return,
            signal = shutdown_signal() => {
                warn!(signal, "Shutdown requested, cancelling in-flight items");
            }
        }
        token.cancel();
        info!("Waiting for workers to stop");
    })
}

#[cfg(unix)]
async fn shutdown_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(e) => {
            warn!(error = %e, "Cannot listen for SIGTERM");
            return ctrl_c().await;
        }
    };
    tokio::select! {
        name = ctrl_c() => name,
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Cannot listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    "ctrl-c"
}
