use owo_colors::OwoColorize;
use tokio::signal;

/// Resolves once SIGINT or SIGTERM is received. Callers wire this into a
/// [`tokio_util::sync::CancellationToken`] so every long-running loop
/// observes the same shutdown signal.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    println!("{}", "🛑 Shutdown signal received".red());
}
