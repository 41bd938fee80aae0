//! Shutdown orchestration: hooks under one deadline, then guaranteed termination

use crate::hooks::ShutdownHook;
use crate::platform::ProcessGroupControl;
use std::process::ExitStatus;
use std::time::Duration;
use tokio::process::Child;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// What happened to each shutdown hook
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub completed: Vec<String>,
    pub failed: Vec<String>,
    pub abandoned: Vec<String>,
}

/// Run every hook concurrently under one deadline.
///
/// Hooks share a token cancelled at `deadline`. Hooks that ignore it are
/// aborted once `abandon_grace` past the deadline has also elapsed. A failing
/// or panicking hook never affects the others.
pub async fn run_shutdown_hooks(
    hooks: &[ShutdownHook],
    deadline: Instant,
    abandon_grace: Option<Duration>,
) -> ShutdownReport {
    let mut report = ShutdownReport::default();
    if hooks.is_empty() {
        return report;
    }

    let token = CancellationToken::new();
    let deadline_timer = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            token.cancel();
        })
    };

    let handles: Vec<_> = hooks
        .iter()
        .map(|hook| {
            let name = hook.name().to_string();
            (name, tokio::spawn(hook.invoke(token.clone())))
        })
        .collect();

    let hard_deadline = deadline + abandon_grace.unwrap_or(Duration::ZERO);
    for (name, mut handle) in handles {
        match tokio::time::timeout_at(hard_deadline, &mut handle).await {
            Ok(Ok(Ok(()))) => {
                tracing::debug!("Shutdown hook {} completed", name);
                report.completed.push(name);
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!("Shutdown hook failed: {}", e);
                report.failed.push(name);
            }
            Ok(Err(join_err)) => {
                tracing::warn!("Shutdown hook {} did not finish: {}", name, join_err);
                report.failed.push(name);
            }
            Err(_) => {
                handle.abort();
                tracing::warn!("Abandoning shutdown hook {} past the deadline", name);
                report.abandoned.push(name);
            }
        }
    }

    deadline_timer.abort();
    report
}

/// Make sure the child is dead and reaped.
///
/// The child is interrupted first and given `grace` to exit; if it is still
/// running after that it is force killed. A child that already exited is
/// neither interrupted nor killed, so a recycled pid is never signalled.
pub async fn terminate(
    child: &mut Child,
    control: &dyn ProcessGroupControl,
    grace: Duration,
) -> std::io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }
    let Some(pid) = child.id() else {
        return child.wait().await;
    };

    tracing::debug!("Interrupting Envoy ({})", pid);
    if let Err(e) = control.interrupt(pid) {
        tracing::warn!("Unable to interrupt Envoy ({}): {}", pid, e);
    }

    if let Ok(status) = tokio::time::timeout(grace, child.wait()).await {
        return status;
    }

    if child.try_wait()?.is_none() {
        tracing::warn!(
            "Envoy ({}) did not exit within {:?} of interrupt, killing it",
            pid,
            grace
        );
        if let Err(e) = control.force_kill(pid) {
            tracing::warn!("Unable to kill Envoy ({}): {}", pid, e);
            child.start_kill()?;
        }
    }
    child.wait().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HookError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_panicking_hooks_do_not_affect_others() {
        let ran = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ran);
        let hooks = vec![
            ShutdownHook::new("panics", |_token| async {
                if true {
                    panic!("hook panic");
                }
                Ok(())
            }),
            ShutdownHook::new("works", move |_token| {
                let counter = Arc::clone(&counter);
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
            }),
            ShutdownHook::new("fails", |_token| async {
                Err(HookError::failed("fails", "no admin address"))
            }),
        ];

        let deadline = Instant::now() + Duration::from_secs(5);
        let report = run_shutdown_hooks(&hooks, deadline, None).await;

        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert_eq!(report.completed, vec!["works".to_string()]);
        assert_eq!(report.failed, vec!["panics".to_string(), "fails".to_string()]);
        assert!(report.abandoned.is_empty());
    }

    #[tokio::test]
    async fn test_cooperative_hook_sees_deadline() {
        let hooks = vec![ShutdownHook::new("waits", |token: CancellationToken| async move {
            token.cancelled().await;
            Err(HookError::Cancelled {
                hook: "waits".to_string(),
            })
        })];

        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(100);
        let report = run_shutdown_hooks(&hooks, deadline, Some(Duration::from_secs(5))).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.failed, vec!["waits".to_string()]);
    }

    #[tokio::test]
    async fn test_uncooperative_hook_is_abandoned() {
        let hooks = vec![ShutdownHook::new("ignores", |_token| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })];

        let started = std::time::Instant::now();
        let deadline = Instant::now() + Duration::from_millis(100);
        let report = run_shutdown_hooks(&hooks, deadline, Some(Duration::from_millis(100))).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.abandoned, vec!["ignores".to_string()]);
    }
}
