//! Output sinks for the supervised process's stdout and stderr

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncRead, AsyncReadExt};

/// A sink shared between the pump task and the runtime's own lifecycle lines
pub type SharedSink = Arc<Mutex<OutputSink>>;

/// Fans every write out to each destination.
///
/// A destination that fails is logged and dropped. The remaining destinations
/// keep receiving output, so a full disk never blocks the pipe from Envoy.
#[derive(Default)]
pub struct OutputSink {
    destinations: Vec<(String, Box<dyn Write + Send>)>,
}

impl OutputSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedSink {
        Arc::new(Mutex::new(self))
    }

    /// Add a named destination
    pub fn add(&mut self, name: impl Into<String>, destination: Box<dyn Write + Send>) {
        self.destinations.push((name.into(), destination));
    }

    pub fn len(&self) -> usize {
        self.destinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.destinations.is_empty()
    }

    /// Flush and drop every destination, closing any files
    pub fn close(&mut self) {
        let _ = self.flush();
        self.destinations.clear();
    }
}

impl Write for OutputSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.destinations.retain_mut(|(name, destination)| {
            match destination.write_all(buf) {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!("Dropping output destination {}: {}", name, e);
                    false
                }
            }
        });
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        for (name, destination) in self.destinations.iter_mut() {
            if let Err(e) = destination.flush() {
                tracing::warn!("Unable to flush output destination {}: {}", name, e);
            }
        }
        Ok(())
    }
}

/// Write one line to a shared sink, ignoring a poisoned lock
pub fn write_line(sink: &SharedSink, line: &str) {
    if let Ok(mut sink) = sink.lock() {
        let _ = writeln!(sink, "{}", line);
    }
}

/// Copy everything from `reader` into `sink` until EOF.
///
/// Read errors end the copy and are logged, never propagated.
pub async fn pump<R>(name: &str, mut reader: R, sink: SharedSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; 8192];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if let Ok(mut sink) = sink.lock() {
                    let _ = sink.write_all(&buf[..n]);
                }
            }
            Err(e) => {
                tracing::warn!("Error reading {}: {}", name, e);
                break;
            }
        }
    }
    if let Ok(mut sink) = sink.lock() {
        let _ = sink.flush();
    }
    tracing::debug!("{} closed", name);
}
