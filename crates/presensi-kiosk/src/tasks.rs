//! Submit-and-forget background work.
//!
//! Durable writes, speech synthesis, audio playback and display toggles never
//! run on the interactive loop. Each job gets its own failure domain: an error
//! or panic is logged and goes no further.

use std::panic::{self, AssertUnwindSafe};

pub type Job = Box<dyn FnOnce() -> anyhow::Result<()> + Send + 'static>;

/// Executes named jobs without reporting back to the caller.
pub trait Spawn: Send + Sync {
    fn spawn(&self, name: &'static str, job: Job);
}

/// Runs a job, converting errors and panics into log events.
fn run_isolated(name: &'static str, job: Job) {
    match panic::catch_unwind(AssertUnwindSafe(job)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => tracing::warn!(task = name, error = %format!("{err:#}"), "background task failed"),
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            tracing::error!(task = name, %reason, "background task panicked");
        }
    }
}

/// One short-lived OS thread per job. Threads are detached: jobs still
/// running at process exit are abandoned.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadSpawner;

impl Spawn for ThreadSpawner {
    fn spawn(&self, name: &'static str, job: Job) {
        let spawned = std::thread::Builder::new()
            .name(format!("presensi-{name}"))
            .spawn(move || run_isolated(name, job));
        if let Err(err) = spawned {
            tracing::error!(task = name, error = %err, "failed to spawn background thread");
        }
    }
}

/// Runs each job to completion on the caller's thread.
///
/// Used by the CLI, where the process should wait for the work, and by tests
/// that need effects to be visible as soon as the call returns.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineSpawner;

impl Spawn for InlineSpawner {
    fn spawn(&self, name: &'static str, job: Job) {
        run_isolated(name, job);
    }
}
