//! OS termination signals that start a graceful shutdown

/// Waits for SIGINT, SIGTERM or SIGQUIT.
///
/// Each call creates independent signal listeners. Returns `Err` if signal
/// registration fails.
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv()  => {},
        _ = sigterm.recv() => {},
        _ = sigquit.recv() => {},
    }
    Ok(())
}

/// Waits for Ctrl-C or Ctrl-Break.
#[cfg(windows)]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    let mut ctrl_break = tokio::signal::windows::ctrl_break()?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = ctrl_break.recv() => {},
    }
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

/// Like [`wait_for_shutdown_signal`], but a registration failure is logged and
/// the future never resolves, leaving only explicit cancellation.
pub async fn shutdown_signal_or_pending() {
    if let Err(e) = wait_for_shutdown_signal().await {
        tracing::warn!("Unable to listen for shutdown signals: {}", e);
        std::future::pending::<()>().await;
    }
}
