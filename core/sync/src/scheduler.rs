//! When passes run: on request, on a timer, and once at startup.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use gitvault_common::{Error, Result};

use crate::engine::SyncOutcome;

/// How often passes run without being asked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncMode {
    /// Only on request.
    Manual,
    /// Every `interval`, plus on request.
    Interval {
        #[serde(rename = "seconds", with = "duration_secs")]
        interval: Duration,
    },
}

impl SyncMode {
    fn period(&self) -> Option<Duration> {
        match self {
            SyncMode::Manual => None,
            SyncMode::Interval { interval } if interval.is_zero() => None,
            SyncMode::Interval { interval } => Some(*interval),
        }
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

/// Why a pass is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Startup,
    Interval,
    Requested,
}

enum Command {
    Sync(oneshot::Sender<Result<SyncOutcome>>),
    Shutdown,
}

/// Control side of the scheduler. Cheap to clone.
#[derive(Clone)]
pub struct SyncScheduler {
    commands: mpsc::Sender<Command>,
    mode: Arc<watch::Sender<SyncMode>>,
}

impl SyncScheduler {
    /// Build a scheduler and the handle that drives it.
    ///
    /// With `sync_on_startup`, the handle runs one pass before anything else.
    pub fn new(mode: SyncMode, sync_on_startup: bool) -> (Self, SyncSchedulerHandle) {
        let (commands, command_rx) = mpsc::channel(16);
        let (mode, mode_rx) = watch::channel(mode);

        let scheduler = Self {
            commands,
            mode: Arc::new(mode),
        };
        let handle = SyncSchedulerHandle {
            commands: command_rx,
            mode: mode_rx,
            sync_on_startup,
        };
        (scheduler, handle)
    }

    /// Run a pass now and wait for its outcome.
    pub async fn request_sync(&self) -> Result<SyncOutcome> {
        let (reply, outcome) = oneshot::channel();
        self.commands
            .send(Command::Sync(reply))
            .await
            .map_err(|_| Error::Storage("Scheduler is not running".to_string()))?;

        outcome
            .await
            .map_err(|_| Error::Storage("Scheduler stopped before the pass finished".to_string()))?
    }

    /// Switch modes. A new interval starts counting from now.
    pub fn set_mode(&self, mode: SyncMode) {
        self.mode.send_replace(mode);
    }

    pub fn get_mode(&self) -> SyncMode {
        self.mode.borrow().clone()
    }

    /// Stop the handle after any pass in progress.
    pub async fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown).await;
    }
}

/// Drives passes; spawn [`SyncSchedulerHandle::run`] on the runtime.
pub struct SyncSchedulerHandle {
    commands: mpsc::Receiver<Command>,
    mode: watch::Receiver<SyncMode>,
    sync_on_startup: bool,
}

impl SyncSchedulerHandle {
    /// Call `sync_fn` whenever a pass is due.
    ///
    /// Passes never overlap here: requests and ticks that arrive during a
    /// pass wait for it to finish. Returns on shutdown or once every
    /// [`SyncScheduler`] is dropped.
    pub async fn run<F, Fut>(mut self, sync_fn: F)
    where
        F: Fn(Trigger) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<SyncOutcome>> + Send,
    {
        let mut timer = arm(self.mode.borrow_and_update().period());
        info!("Scheduler running");

        if self.sync_on_startup {
            report(Trigger::Startup, sync_fn(Trigger::Startup).await);
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Sync(reply)) => {
                        let _ = reply.send(sync_fn(Trigger::Requested).await);
                    }
                    Some(Command::Shutdown) => {
                        debug!("Scheduler shutdown requested");
                        break;
                    }
                    None => {
                        debug!("Every scheduler handle dropped");
                        break;
                    }
                },

                Ok(()) = self.mode.changed() => {
                    let mode = self.mode.borrow_and_update().clone();
                    info!("Sync mode is now {:?}", mode);
                    timer = arm(mode.period());
                }

                _ = tick(&mut timer) => {
                    report(Trigger::Interval, sync_fn(Trigger::Interval).await);
                }
            }
        }

        info!("Scheduler stopped");
    }
}

/// First tick comes one full period from now.
fn arm(period: Option<Duration>) -> Option<Interval> {
    period.map(|period| {
        let mut timer = interval_at(Instant::now() + period, period);
        timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
        timer
    })
}

async fn tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

fn report(trigger: Trigger, result: Result<SyncOutcome>) {
    match result {
        Ok(SyncOutcome::Completed(report)) if report.failed.is_empty() => info!(
            "{:?} sync done: {} up, {} down, {} conflicts",
            trigger, report.uploaded, report.downloaded, report.conflicts
        ),
        Ok(SyncOutcome::Completed(report)) => error!(
            "{:?} sync done with {} failed files: {} up, {} down",
            trigger,
            report.failed.len(),
            report.uploaded,
            report.downloaded
        ),
        Ok(SyncOutcome::Skipped) => debug!("{:?} sync skipped, a pass is already running", trigger),
        Err(e) => error!("{:?} sync failed: {}", trigger, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<Trigger>>>;

    fn recording(log: Log) -> impl Fn(Trigger) -> futures::future::Ready<Result<SyncOutcome>> {
        move |trigger| {
            log.lock().unwrap().push(trigger);
            futures::future::ready(Ok(SyncOutcome::Skipped))
        }
    }

    fn every(secs: u64) -> SyncMode {
        SyncMode::Interval {
            interval: Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_mode_json_shape() {
        let json = serde_json::to_string(&every(300)).unwrap();
        assert_eq!(json, r#"{"interval":{"seconds":300}}"#);
        assert_eq!(serde_json::from_str::<SyncMode>(&json).unwrap(), every(300));
        assert_eq!(serde_json::from_str::<SyncMode>(r#""manual""#).unwrap(), SyncMode::Manual);
    }

    #[test]
    fn test_zero_interval_never_ticks() {
        assert_eq!(every(0).period(), None);
        assert_eq!(every(5).period(), Some(Duration::from_secs(5)));
    }

    #[tokio::test]
    async fn test_set_mode_is_visible() {
        let (scheduler, _handle) = SyncScheduler::new(SyncMode::Manual, false);
        scheduler.set_mode(every(60));
        assert_eq!(scheduler.clone().get_mode(), every(60));
    }

    #[tokio::test]
    async fn test_request_runs_a_pass() {
        let log = Log::default();
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual, false);
        let task = tokio::spawn(handle.run(recording(log.clone())));

        let outcome = scheduler.request_sync().await.unwrap();
        assert!(matches!(outcome, SyncOutcome::Skipped));
        assert_eq!(*log.lock().unwrap(), vec![Trigger::Requested]);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_pass_runs_first() {
        let log = Log::default();
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual, true);
        let task = tokio::spawn(handle.run(recording(log.clone())));

        scheduler.request_sync().await.unwrap();
        scheduler.shutdown().await;
        task.await.unwrap();

        assert_eq!(*log.lock().unwrap(), vec![Trigger::Startup, Trigger::Requested]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interval_ticks_after_full_period() {
        let log = Log::default();
        let (scheduler, handle) = SyncScheduler::new(every(10), false);
        let task = tokio::spawn(handle.run(recording(log.clone())));

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(log.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_secs(16)).await;
        assert_eq!(*log.lock().unwrap(), vec![Trigger::Interval, Trigger::Interval]);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_switching_to_manual_stops_ticks() {
        let log = Log::default();
        let (scheduler, handle) = SyncScheduler::new(every(10), false);
        let task = tokio::spawn(handle.run(recording(log.clone())));

        tokio::time::sleep(Duration::from_secs(15)).await;
        scheduler.set_mode(SyncMode::Manual);
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(log.lock().unwrap().len(), 1);

        scheduler.shutdown().await;
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_scheduler_stops_handle() {
        let (scheduler, handle) = SyncScheduler::new(every(3600), false);
        let task = tokio::spawn(handle.run(recording(Log::default())));

        drop(scheduler);
        task.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_after_stop_fails() {
        let (scheduler, handle) = SyncScheduler::new(SyncMode::Manual, false);
        let task = tokio::spawn(handle.run(recording(Log::default())));

        scheduler.shutdown().await;
        task.await.unwrap();

        assert!(matches!(scheduler.request_sync().await, Err(Error::Storage(_))));
    }
}
