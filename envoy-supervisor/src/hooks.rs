//! Startup and shutdown hooks.
//!
//! Hooks are arbitrary callbacks that must never take the supervisor down. Both
//! kinds run through [`isolated`], which turns a panic into a
//! [`HookError::Panicked`] result.

use crate::admin::fetch_to_file;
use crate::error::HookError;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Boxed result of a hook invocation
pub type HookFuture = BoxFuture<'static, Result<(), HookError>>;

type ShutdownHookFn = dyn Fn(CancellationToken) -> HookFuture + Send + Sync;
type StartupHookFn = dyn Fn(CancellationToken, PathBuf, String) -> HookFuture + Send + Sync;

/// Run `fut`, converting a panic into [`HookError::Panicked`] attributed to `name`.
pub async fn isolated<F>(name: &str, fut: F) -> Result<(), HookError>
where
    F: Future<Output = Result<(), HookError>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(panic_err) => Err(HookError::Panicked {
            hook: name.to_string(),
            message: panic_message(&*panic_err),
        }),
    }
}

/// Best-effort text of a panic payload
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// A named function run concurrently with other hooks when the supervisor
/// shuts down.
///
/// The token is cancelled at the shared shutdown deadline. Each hook should
/// write its own files so that hooks never contend with each other.
#[derive(Clone)]
pub struct ShutdownHook {
    name: String,
    func: Arc<ShutdownHookFn>,
}

impl ShutdownHook {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |token| func(token).boxed()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Invoke the hook inside a panic boundary
    pub fn invoke(&self, token: CancellationToken) -> HookFuture {
        let name = self.name.clone();
        let func = Arc::clone(&self.func);
        async move { isolated(&name, async move { func(token).await }).await }.boxed()
    }
}

impl std::fmt::Debug for ShutdownHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownHook").field("name", &self.name).finish()
    }
}

/// A function run once, as soon as Envoy is ready, with the run directory and
/// the discovered admin address.
#[derive(Clone)]
pub struct StartupHook {
    name: String,
    func: Arc<StartupHookFn>,
}

impl StartupHook {
    pub fn new<F, Fut>(name: impl Into<String>, func: F) -> Self
    where
        F: Fn(CancellationToken, PathBuf, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HookError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            func: Arc::new(move |token, run_dir, admin_address| {
                func(token, run_dir, admin_address).boxed()
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The default startup hook: saves the configuration Envoy started with,
    /// including endpoints, to `config_dump.json`.
    pub fn config_dump() -> Self {
        Self::new("config_dump", |token, run_dir: PathBuf, admin_address: String| async move {
            let client = reqwest::Client::new();
            let url = format!("http://{}/config_dump?include_eds", admin_address);
            let target = run_dir.join("config_dump.json");
            tokio::select! {
                result = fetch_to_file(&client, &url, &target) => {
                    result.map_err(|e| HookError::failed("config_dump", e))
                }
                _ = token.cancelled() => Err(HookError::Cancelled {
                    hook: "config_dump".to_string(),
                }),
            }
        })
    }
}

impl std::fmt::Debug for StartupHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartupHook").field("name", &self.name).finish()
    }
}

/// Runs a [`StartupHook`] so that it can never fail: errors, timeouts and
/// panics are logged instead.
#[derive(Clone, Debug)]
pub struct SafeStartupHook {
    delegate: StartupHook,
    timeout: Option<Duration>,
}

impl SafeStartupHook {
    pub fn new(delegate: StartupHook, timeout: Option<Duration>) -> Self {
        Self { delegate, timeout }
    }

    pub fn name(&self) -> &str {
        self.delegate.name()
    }

    /// Run the delegate. The delegate's token is a child of `token` and is also
    /// cancelled when the timeout elapses.
    pub async fn run(&self, token: CancellationToken, run_dir: PathBuf, admin_address: String) {
        let name = self.delegate.name().to_string();
        let child = token.child_token();
        let func = Arc::clone(&self.delegate.func);
        let fut = isolated(&name, {
            let child = child.clone();
            async move { func(child, run_dir, admin_address).await }
        });

        let result = match self.timeout {
            Some(timeout) => match tokio::time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => {
                    child.cancel();
                    Err(HookError::TimedOut {
                        hook: name.clone(),
                        timeout,
                    })
                }
            },
            None => fut.await,
        };

        match result {
            Ok(()) => tracing::debug!("Startup hook {} completed", name),
            Err(e) => tracing::warn!("Startup hook failed: {}", e),
        }
    }
}
