//! Periodic task with explicit pause / resume.
//!
//! The task knows nothing about windows or visibility. Hosts translate
//! whatever "the user is looking" signal they have into [`ScheduledTask::pause`]
//! and [`ScheduledTask::resume`].
//!
//! Timing:
//! - first run `first_run_delay` after spawn;
//! - then every `interval`, measured from the end of the previous run;
//! - every resume schedules a catch-up run `first_run_delay` later.
//!
//! A run always completes before the task reacts to pause or stop.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Running,
    Paused,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
struct Control {
    state: RunState,
    // Bumped on each Paused -> Running edge.
    resumes: u64,
}

pub struct ScheduledTask {
    control: watch::Sender<Control>,
    handle: JoinHandle<()>,
}

impl ScheduledTask {
    /// Spawn the schedule on the current tokio runtime.
    pub fn spawn<F, Fut>(interval: Duration, first_run_delay: Duration, job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (control, rx) = watch::channel(Control {
            state: RunState::Running,
            resumes: 0,
        });
        let handle = tokio::spawn(run_schedule(interval, first_run_delay, rx, job));
        Self { control, handle }
    }

    pub fn state(&self) -> RunState {
        self.control.borrow().state
    }

    pub fn pause(&self) {
        self.control.send_if_modified(|c| {
            if c.state == RunState::Running {
                c.state = RunState::Paused;
                true
            } else {
                false
            }
        });
    }

    /// Resume a paused schedule. No-op unless currently paused.
    pub fn resume(&self) {
        self.control.send_if_modified(|c| {
            if c.state == RunState::Paused {
                c.state = RunState::Running;
                c.resumes += 1;
                true
            } else {
                false
            }
        });
    }

    /// Stop the schedule and wait for an in-progress run to finish.
    pub async fn stop(self) {
        self.control.send_modify(|c| c.state = RunState::Stopped);
        if let Err(err) = self.handle.await {
            tracing::warn!(error = %err, "scheduled task ended abnormally");
        }
    }
}

async fn run_schedule<F, Fut>(
    interval: Duration,
    first_run_delay: Duration,
    mut control: watch::Receiver<Control>,
    mut job: F,
) where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let mut next = Instant::now() + first_run_delay;
    let mut seen_resumes = 0u64;

    loop {
        let current = *control.borrow_and_update();
        if current.resumes != seen_resumes {
            seen_resumes = current.resumes;
            next = Instant::now() + first_run_delay;
            tracing::debug!("schedule resumed; catch-up run queued");
        }

        match current.state {
            RunState::Stopped => break,
            RunState::Paused => {
                if control.changed().await.is_err() {
                    break;
                }
                continue;
            }
            RunState::Running => {}
        }

        tokio::select! {
            _ = tokio::time::sleep_until(next) => {
                job().await;
                next = Instant::now() + interval;
            }
            changed = control.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
}
