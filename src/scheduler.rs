// Copyright 2022 Jeff Kim <hiking90@gmail.com>
// SPDX-License-Identifier: Apache-2.0

//! Periodic background tasks (meter ticks, reservoir rescales).
//!
//! A metrics tree owns one [`Scheduler`]. The scheduler lazily starts a
//! dedicated single-worker tokio runtime the first time a periodic task is
//! requested, so producers never need a runtime of their own and trees that
//! only use counters never start a thread.
//!
//! Each task is represented by a [`TaskHandle`]. Cancelling a handle aborts
//! the task and blocks until the runtime has dropped it, so after
//! [`TaskHandle::cancel`] returns the task's closure will never run again.

use std::ops::ControlFlow;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{Error, Result};

#[derive(Debug)]
pub(crate) struct Scheduler {
    thread_name: String,
    state: Mutex<SchedulerState>,
}

#[derive(Debug)]
enum SchedulerState {
    Idle,
    Running(Runtime),
    Stopped,
}

impl Scheduler {
    pub(crate) fn new(thread_name: impl Into<String>) -> Self {
        Self {
            thread_name: thread_name.into(),
            state: Mutex::new(SchedulerState::Idle),
        }
    }

    fn handle(&self) -> Result<Handle> {
        let mut state = self.state.lock();
        match &*state {
            SchedulerState::Running(runtime) => Ok(runtime.handle().clone()),
            SchedulerState::Stopped => Err(Error::invalid_argument(
                "scheduler has been shut down",
            )),
            SchedulerState::Idle => {
                let runtime = Builder::new_multi_thread()
                    .worker_threads(1)
                    .thread_name(self.thread_name.clone())
                    .enable_time()
                    .build()?;
                debug!("Started metrics scheduler thread '{}'", self.thread_name);
                let handle = runtime.handle().clone();
                *state = SchedulerState::Running(runtime);
                Ok(handle)
            }
        }
    }

    /// Runs `tick` every `period`, first after one period has elapsed, until it
    /// returns [`ControlFlow::Break`] or the returned handle is cancelled.
    pub(crate) fn spawn_periodic<F>(
        &self,
        name: &'static str,
        period: Duration,
        mut tick: F,
    ) -> Result<TaskHandle>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(Error::invalid_argument(format!(
                "period of task '{name}' must be greater than zero"
            )));
        }

        let handle = self.handle()?;
        let join = handle.spawn(async move {
            let start = tokio::time::Instant::now() + period;
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if tick().is_break() {
                    break;
                }
            }
            debug!("Periodic task '{name}' finished");
        });
        debug!("Spawned periodic task '{name}' every {period:?}");

        Ok(TaskHandle {
            name,
            join: Some(join),
        })
    }

    /// Stops the runtime. Outstanding tasks are dropped; new tasks are refused.
    ///
    /// The runtime is released in the background, which is legal from both
    /// synchronous code and async contexts.
    pub(crate) fn shutdown(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), SchedulerState::Stopped);
        if let SchedulerState::Running(runtime) = previous {
            runtime.shutdown_background();
            debug!("Stopped metrics scheduler thread '{}'", self.thread_name);
        }
    }

    #[cfg(test)]
    pub(crate) fn is_running(&self) -> bool {
        matches!(&*self.state.lock(), SchedulerState::Running(_))
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owner of one periodic task.
///
/// Dropping the handle aborts the task without waiting for it.
#[derive(Debug)]
pub(crate) struct TaskHandle {
    name: &'static str,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Aborts the task and blocks until it has stopped running.
    pub(crate) fn cancel(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        join.abort();
        match futures::executor::block_on(join) {
            Ok(()) => {}
            Err(err) if err.is_cancelled() => {}
            Err(err) => warn!("Periodic task '{}' ended abnormally: {err}", self.name),
        }
        debug!("Cancelled periodic task '{}'", self.name);
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            join.abort();
        }
    }
}
