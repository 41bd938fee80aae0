//! Supervisor timing configuration.
//!
//! Zero durations act as "disabled" sentinels. The `*_opt` helpers turn them
//! into `Option`s so call sites don't compare against zero themselves.

use std::time::Duration;

/// Timeouts and intervals applied to one supervised run.
#[derive(Clone, Debug)]
pub struct SupervisorConfig {
    /// Shared deadline for all shutdown hooks.
    pub shutdown_timeout: Duration,
    /// Bound on the startup hook. Zero means unbounded.
    pub startup_hook_timeout: Duration,
    /// How long the worker gets to exit after an interrupt before it is killed.
    pub interrupt_grace: Duration,
    /// Extra time granted after the shutdown deadline before hooks are abandoned.
    pub abandon_grace: Duration,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            startup_hook_timeout: Duration::from_secs(3),
            interrupt_grace: Duration::from_secs(5),
            abandon_grace: Duration::from_secs(1),
        }
    }
}

impl SupervisorConfig {
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn startup_hook_timeout(mut self, timeout: Duration) -> Self {
        self.startup_hook_timeout = timeout;
        self
    }

    pub fn interrupt_grace(mut self, grace: Duration) -> Self {
        self.interrupt_grace = grace;
        self
    }

    pub fn abandon_grace(mut self, grace: Duration) -> Self {
        self.abandon_grace = grace;
        self
    }

    /// Startup hook bound, `None` when unbounded.
    pub fn startup_hook_timeout_opt(&self) -> Option<Duration> {
        if self.startup_hook_timeout.is_zero() {
            None
        } else {
            Some(self.startup_hook_timeout)
        }
    }

    /// Abandon grace, `None` when hooks are abandoned exactly at the deadline.
    pub fn abandon_grace_opt(&self) -> Option<Duration> {
        if self.abandon_grace.is_zero() {
            None
        } else {
            Some(self.abandon_grace)
        }
    }
}
