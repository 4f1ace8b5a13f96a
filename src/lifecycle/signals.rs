//! OS signal handling.
//!
//! The first SIGINT or SIGTERM cancels the lifetime token. Later signals have
//! no further effect.

use tokio_util::sync::CancellationToken;

/// Waits for a termination signal, or for the token to be cancelled elsewhere.
pub async fn listen_for_shutdown(token: CancellationToken) {
    let received = tokio::select! {
        signal = termination_signal() => signal,
        _ = token.cancelled() => return,
    };
    log::info!("Received {received}, shutting down");
    token.cancel();
}

#[cfg(unix)]
async fn termination_signal() -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            log::error!("Cannot listen for SIGTERM: {err}");
            return interrupt().await;
        }
    };
    tokio::select! {
        received = interrupt() => received,
        _ = terminate.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn termination_signal() -> &'static str {
    interrupt().await
}

async fn interrupt() -> &'static str {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!("Cannot listen for interrupt: {err}");
        // Without a signal source only the token can end the process.
        std::future::pending::<()>().await;
    }
    "SIGINT"
}
