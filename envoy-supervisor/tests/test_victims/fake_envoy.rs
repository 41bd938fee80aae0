//! Stand-in for Envoy used by the integration tests
//!
//! Usage: fake_envoy (-c <file> | --config-yaml <yaml>)... [--admin-address-path <file>]
//!        [--fake-ready-delay-ms <ms>] [--fake-ignore-interrupt] [-- ignored...]
//!
//! Like Envoy, the fake:
//! 1. Fails when no configuration is given
//! 2. Binds the admin address declared by the configuration (port 0 picks one)
//! 3. Writes the bound address to the admin address file
//! 4. Logs "starting main dispatch loop" to stderr
//! 5. Answers admin requests, with /ready returning LIVE
//! 6. Exits 0 on interrupt once ready, 1 if interrupted before that

use envoy_supervisor::{ConfigInspector, YamlConfigInspector};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[tokio::main]
async fn main() {
    let mut interrupts = match Interrupts::register() {
        Ok(interrupts) => interrupts,
        Err(e) => {
            eprintln!("[critical] cannot register signal handlers: {}", e);
            std::process::exit(1);
        }
    };
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().skip(1).collect();
    let mut admin_address_path: Option<PathBuf> = None;
    let mut ready_delay = Duration::ZERO;
    let mut ignore_interrupt = false;
    let mut has_config = false;

    let mut iter = args.iter().take_while(|a| a.as_str() != "--");
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-c" | "--config-path" | "--config-yaml" => {
                has_config |= iter.next().is_some_and(|v| !v.is_empty());
            }
            "--admin-address-path" => admin_address_path = iter.next().map(PathBuf::from),
            "--fake-ready-delay-ms" => {
                let ms = iter.next().and_then(|v| v.parse().ok()).unwrap_or(0);
                ready_delay = Duration::from_millis(ms);
            }
            "--fake-ignore-interrupt" => ignore_interrupt = true,
            _ => {}
        }
    }

    if !has_config {
        eprintln!("At least one of --config-path or --config-yaml or Options::configProto() should be non-empty");
        std::process::exit(1);
    }

    eprintln!("[info] initializing epoch 0");
    println!("fake envoy pid {}", std::process::id());

    let declared = match YamlConfigInspector::new().find_admin_address(&args) {
        Ok(declared) => declared,
        Err(e) => {
            eprintln!("[critical] error initializing configuration: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(address) = declared {
        let listener = match TcpListener::bind(&address).await {
            Ok(listener) => listener,
            Err(e) => {
                eprintln!("[critical] cannot bind admin address {}: {}", address, e);
                std::process::exit(1);
            }
        };
        let bound = listener.local_addr().map(|a| a.to_string()).unwrap_or(address);
        eprintln!("[info] admin address: {}", bound);
        if let Some(path) = &admin_address_path {
            if let Err(e) = std::fs::write(path, &bound) {
                eprintln!("[critical] cannot write {}: {}", path.display(), e);
                std::process::exit(1);
            }
        }
        tokio::spawn(serve_admin(listener));
    }

    tokio::select! {
        _ = tokio::time::sleep(ready_delay) => {}
        _ = interrupts.recv() => {
            eprintln!("[warning] caught interrupt before ready");
            std::process::exit(1);
        }
    }
    eprintln!("[info] starting main dispatch loop");

    loop {
        interrupts.recv().await;
        if !ignore_interrupt {
            break;
        }
        eprintln!("[warning] ignoring interrupt");
    }
    eprintln!("[warning] caught SIGINT");
    eprintln!("[info] exiting");
}

/// Interrupt listeners, registered before anything else so an early
/// interrupt is never handled by the default disposition
struct Interrupts {
    #[cfg(unix)]
    sigint: tokio::signal::unix::Signal,
    #[cfg(unix)]
    sigterm: tokio::signal::unix::Signal,
    #[cfg(windows)]
    ctrl_c: tokio::signal::windows::CtrlC,
    #[cfg(windows)]
    ctrl_break: tokio::signal::windows::CtrlBreak,
}

impl Interrupts {
    #[cfg(unix)]
    fn register() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};
        Ok(Self {
            sigint: signal(SignalKind::interrupt())?,
            sigterm: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(windows)]
    fn register() -> std::io::Result<Self> {
        Ok(Self {
            ctrl_c: tokio::signal::windows::ctrl_c()?,
            ctrl_break: tokio::signal::windows::ctrl_break()?,
        })
    }

    #[cfg(unix)]
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.sigint.recv() => {}
            _ = self.sigterm.recv() => {}
        }
    }

    #[cfg(windows)]
    async fn recv(&mut self) {
        tokio::select! {
            _ = self.ctrl_c.recv() => {}
            _ = self.ctrl_break.recv() => {}
        }
    }
}

async fn serve_admin(listener: TcpListener) {
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                tokio::spawn(answer(stream));
            }
            Err(e) => {
                eprintln!("[warning] admin accept failed: {}", e);
                return;
            }
        }
    }
}

async fn answer(mut stream: TcpStream) {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => request.extend_from_slice(&buf[..n]),
        }
    }

    let request = String::from_utf8_lossy(&request);
    let path = request.split_whitespace().nth(1).unwrap_or("/");
    let (status, body) = match path.split('?').next().unwrap_or("/") {
        "/ready" => ("200 OK", "LIVE\n".to_string()),
        "/clusters" | "/contention" | "/listeners" => ("200 OK", format!("{}\n", path)),
        "/certs" | "/config_dump" | "/memory" | "/server_info" | "/stats" | "/runtime" => {
            ("200 OK", format!("{{\"path\":\"{}\"}}\n", path))
        }
        _ => ("404 Not Found", "invalid path\n".to_string()),
    };

    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: text/plain\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}
