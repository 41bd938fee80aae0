//! Runs Envoy under supervision until it exits or a termination signal arrives
//!
//! Envoy's output is copied to this process's stdout/stderr as well as to the
//! run directory, and admin and node diagnostics are captured on shutdown.

use envoy_supervisor::{
    enable_admin_data_collection, enable_node_collection, CancellationToken, RunOptions, Runtime,
};
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing, keeping stdout for Envoy's own output
    tracing_subscriber::fmt().with_writer(std::io::stderr).init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage:");
        eprintln!(
            "  {} <envoy-path> <run-dir> [--no-archive] [-- envoy args...]",
            args.first().map(String::as_str).unwrap_or("envoy-supervise")
        );
        std::process::exit(1);
    }

    let mut dont_archive = false;
    let mut envoy_args = Vec::new();
    let mut rest = args[3..].iter();
    while let Some(arg) = rest.next() {
        match arg.as_str() {
            "--no-archive" => dont_archive = true,
            "--" => {
                envoy_args.extend(rest.by_ref().cloned());
            }
            other => {
                eprintln!("Unknown argument: {}", other);
                std::process::exit(1);
            }
        }
    }

    let options = RunOptions::new(&args[1], &args[2])
        .dont_archive(dont_archive)
        .stdout(std::io::stdout())
        .stderr(std::io::stderr());

    let mut runtime = Runtime::new(options)?;
    enable_admin_data_collection(&mut runtime);
    if let Err(e) = enable_node_collection(&mut runtime) {
        tracing::warn!("{}", e);
    }

    if let Err(e) = runtime.run(CancellationToken::new(), envoy_args).await {
        tracing::error!("{}", e);
        return Err(e.into());
    }
    Ok(())
}
