//! Readiness detection on Envoy's stderr

use crate::output::SharedSink;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Notify;

/// Line Envoy logs once its listeners are accepting connections
pub const READY_MARKER: &str = "starting main dispatch loop";

/// Hand-off between the scanner task, which discovers the admin address once,
/// and any number of hook tasks that read it later.
#[derive(Debug, Default)]
pub struct ReadinessCell {
    ready: AtomicBool,
    admin_address: OnceLock<String>,
    notify: Notify,
}

impl ReadinessCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Publish the admin address. Only the first call has any effect.
    pub fn publish(&self, address: String) -> bool {
        let published = self.admin_address.set(address).is_ok();
        if published {
            self.notify.notify_waiters();
        }
        published
    }

    pub fn admin_address(&self) -> Option<&str> {
        self.admin_address.get().map(String::as_str)
    }

    /// Wait until the admin address is published
    pub async fn wait_admin_address(&self) -> String {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if let Some(address) = self.admin_address() {
                return address.to_string();
            }
            notified.await;
        }
    }
}

/// Mirrors every stderr line to the stderr sink and, on the first readiness
/// line, publishes the admin address and calls `on_ready` once.
pub struct ReadinessScanner {
    sink: SharedSink,
    admin_address_path: PathBuf,
    cell: std::sync::Arc<ReadinessCell>,
    on_ready: Option<Box<dyn FnOnce(String) + Send>>,
}

impl ReadinessScanner {
    pub fn new(
        sink: SharedSink,
        admin_address_path: PathBuf,
        cell: std::sync::Arc<ReadinessCell>,
        on_ready: Box<dyn FnOnce(String) + Send>,
    ) -> Self {
        Self {
            sink,
            admin_address_path,
            cell,
            on_ready: Some(on_ready),
        }
    }

    /// Consume `reader` until EOF. Read errors end the scan and are logged.
    pub async fn scan<R>(mut self, reader: R)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(reader);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("Error reading Envoy stderr: {}", e);
                    break;
                }
            }

            if let Ok(mut sink) = self.sink.lock() {
                let _ = sink.write_all(&line);
            }

            if self.on_ready.is_some() && contains_marker(&line) {
                self.handle_ready().await;
            }
        }
        if let Ok(mut sink) = self.sink.lock() {
            let _ = sink.flush();
        }
        tracing::debug!("Envoy stderr closed");
    }

    async fn handle_ready(&mut self) {
        self.cell.mark_ready();
        let Some(on_ready) = self.on_ready.take() else {
            return;
        };

        let address = match tokio::fs::read_to_string(&self.admin_address_path).await {
            Ok(data) => data.trim().to_string(),
            Err(e) => {
                tracing::warn!(
                    "Envoy is ready but {} could not be read: {}",
                    self.admin_address_path.display(),
                    e
                );
                return;
            }
        };
        if address.is_empty() {
            tracing::warn!(
                "Envoy is ready but {} is empty",
                self.admin_address_path.display()
            );
            return;
        }

        tracing::info!("Envoy ready, admin address {}", address);
        self.cell.publish(address.clone());
        on_ready(address);
    }
}

fn contains_marker(line: &[u8]) -> bool {
    line.windows(READY_MARKER.len())
        .any(|window| window == READY_MARKER.as_bytes())
}
