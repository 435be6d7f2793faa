//! Shutdown signalling.

use tokio::sync::watch;

/// Broadcast side of the stop signal; the supervisor holds it.
pub type StopSignalTx = watch::Sender<()>;

/// Receive side handed to every long-running task.
pub type StopSignalRx = watch::Receiver<()>;

pub fn stop_channel() -> (StopSignalTx, StopSignalRx) {
    watch::channel(())
}

/// Resolves on `ctrl_c` or the `terminate` signal.
///
/// # Panics
///
/// Will panic if installing either signal handler fails.
pub async fn global_shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {}
    }
}
