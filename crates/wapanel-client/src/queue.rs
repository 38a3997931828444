//! Bulk send queue control.
//!
//! Tracks the server-pushed progress snapshot and the user's pause/resume/
//! cancel intent, and derives one status from both. Commands update local
//! state whether or not the backend call succeeds; the backend's answer is
//! still returned to the caller.

use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use wapanel_core::{
    error::PanelError,
    events::{BulkProgress, BulkStatus, RealtimeEvent},
    traits::BulkCommands,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Idle,
    Running,
    Waiting,
    Paused,
    Cancelled,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

/// Status implied by a snapshot and the pause flag alone.
pub fn derive_status(snapshot: Option<&BulkProgress>, paused: bool) -> QueueStatus {
    if paused {
        return QueueStatus::Paused;
    }
    match snapshot.map(|s| s.status) {
        None => QueueStatus::Idle,
        Some(BulkStatus::Waiting) => QueueStatus::Waiting,
        Some(BulkStatus::Completed) => QueueStatus::Completed,
        Some(_) => QueueStatus::Running,
    }
}

/// Position of the run at the moment it was cancelled.
#[derive(Debug, Clone, Copy)]
struct CancelMark {
    total: Option<u64>,
    current: Option<u64>,
}

impl CancelMark {
    /// A processing snapshot that cannot belong to the cancelled run.
    fn is_fresh_run(&self, snapshot: &BulkProgress) -> bool {
        if snapshot.status != BulkStatus::Processing {
            return false;
        }
        match (self.total, self.current) {
            (Some(total), Some(current)) => {
                snapshot.total != total || snapshot.current < current
            }
            _ => true,
        }
    }
}

#[derive(Debug)]
struct QueueState {
    snapshot: Option<BulkProgress>,
    paused: bool,
    cancelled: Option<CancelMark>,
    status: QueueStatus,
    countdown: Option<u64>,
}

impl QueueState {
    fn rederive(&mut self) {
        self.status = if self.cancelled.is_some() {
            QueueStatus::Cancelled
        } else {
            derive_status(self.snapshot.as_ref(), self.paused)
        };
    }
}

/// Local view and controls for the bulk send running on the backend.
pub struct BulkQueueControl {
    commands: Arc<dyn BulkCommands>,
    state: Mutex<QueueState>,
    status_tx: watch::Sender<QueueStatus>,
}

impl BulkQueueControl {
    pub fn new(commands: Arc<dyn BulkCommands>) -> Self {
        let (status_tx, _) = watch::channel(QueueStatus::Idle);
        Self {
            commands,
            state: Mutex::new(QueueState {
                snapshot: None,
                paused: false,
                cancelled: None,
                status: QueueStatus::Idle,
                countdown: None,
            }),
            status_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish(&self, status: QueueStatus) {
        self.status_tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }

    pub fn status(&self) -> QueueStatus {
        self.lock().status
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn snapshot(&self) -> Option<BulkProgress> {
        self.lock().snapshot.clone()
    }

    /// Seconds left before the next batch, while waiting.
    pub fn countdown_secs(&self) -> Option<u64> {
        self.lock().countdown
    }

    pub fn subscribe(&self) -> watch::Receiver<QueueStatus> {
        self.status_tx.subscribe()
    }

    /// Feed a progress snapshot from the backend.
    ///
    /// After a cancel, snapshots from the cancelled run are ignored until one
    /// clearly belongs to a new run.
    pub fn apply_snapshot(&self, snapshot: BulkProgress) {
        let status = {
            let mut state = self.lock();
            if let Some(mark) = state.cancelled {
                if !mark.is_fresh_run(&snapshot) {
                    debug!(
                        "queue: ignoring snapshot {}/{} after cancel",
                        snapshot.current, snapshot.total
                    );
                    return;
                }
                info!("queue: new bulk run detected, clearing cancel");
                state.cancelled = None;
            }

            state.countdown = next_countdown(
                state.snapshot.as_ref(),
                &snapshot,
                state.countdown,
            );
            state.snapshot = Some(snapshot);
            state.rederive();
            state.status
        };
        self.publish(status);
    }

    /// Drop the snapshot and any user intent, back to idle.
    pub fn clear(&self) {
        {
            let mut state = self.lock();
            state.snapshot = None;
            state.paused = false;
            state.cancelled = None;
            state.countdown = None;
            state.rederive();
        }
        self.publish(QueueStatus::Idle);
    }

    /// Clear only if the run is still showing as completed.
    pub fn clear_if_completed(&self) -> bool {
        if self.status() != QueueStatus::Completed {
            return false;
        }
        self.clear();
        true
    }

    /// Advance the between-batch countdown by one second.
    ///
    /// Frozen while paused or when not waiting.
    pub fn tick(&self) -> Option<u64> {
        let mut state = self.lock();
        if state.status == QueueStatus::Waiting {
            if let Some(left) = state.countdown.as_mut() {
                *left = left.saturating_sub(1);
            }
        }
        state.countdown
    }

    pub async fn pause(&self) -> Result<(), PanelError> {
        let result = self.commands.pause_bulk().await;
        let status = {
            let mut state = self.lock();
            state.paused = true;
            state.rederive();
            state.status
        };
        self.publish(status);
        if let Err(e) = &result {
            warn!("queue: pause request failed, staying paused locally: {e}");
        }
        result
    }

    pub async fn resume(&self) -> Result<(), PanelError> {
        let result = self.commands.resume_bulk().await;
        let status = {
            let mut state = self.lock();
            state.paused = false;
            state.status = if state.cancelled.is_some() {
                QueueStatus::Cancelled
            } else if state.snapshot.is_none() {
                // Nothing reported yet, but the user expects motion.
                QueueStatus::Running
            } else {
                derive_status(state.snapshot.as_ref(), false)
            };
            state.status
        };
        self.publish(status);
        if let Err(e) = &result {
            warn!("queue: resume request failed, resumed locally anyway: {e}");
        }
        result
    }

    pub async fn cancel(&self) -> Result<(), PanelError> {
        let result = self.commands.cancel_bulk().await;
        {
            let mut state = self.lock();
            state.paused = false;
            state.cancelled = Some(CancelMark {
                total: state.snapshot.as_ref().map(|s| s.total),
                current: state.snapshot.as_ref().map(|s| s.current),
            });
            state.countdown = None;
            state.rederive();
        }
        self.publish(QueueStatus::Cancelled);
        if let Err(e) = &result {
            warn!("queue: cancel request failed, cancelled locally anyway: {e}");
        }
        result
    }
}

/// Restart the countdown when a new wait begins; keep it otherwise.
fn next_countdown(
    previous: Option<&BulkProgress>,
    next: &BulkProgress,
    current: Option<u64>,
) -> Option<u64> {
    if next.status != BulkStatus::Waiting {
        return None;
    }
    let same_wait = previous.is_some_and(|p| {
        p.status == BulkStatus::Waiting
            && p.batch == next.batch
            && p.wait_minutes == next.wait_minutes
    });
    if same_wait && current.is_some() {
        current
    } else {
        next.wait_secs()
    }
}

/// Tick the countdown once per second until the task is aborted.
pub fn spawn_countdown(control: Arc<BulkQueueControl>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval.tick().await;
        loop {
            interval.tick().await;
            control.tick();
        }
    })
}

/// Feed `bulk_progress` events into the control until the stream closes.
///
/// A completed run is cleared back to idle after `grace`, unless a newer
/// snapshot arrives first.
pub async fn follow_progress(
    control: Arc<BulkQueueControl>,
    mut events: broadcast::Receiver<RealtimeEvent>,
    grace: Duration,
) {
    let mut clear_at: Option<Instant> = None;
    loop {
        let grace_elapsed = async {
            match clear_at {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };
        tokio::select! {
            event = events.recv() => match event {
                Ok(RealtimeEvent::BulkProgress(progress)) => {
                    let completed = progress.status == BulkStatus::Completed;
                    control.apply_snapshot(progress);
                    clear_at = completed.then(|| Instant::now() + grace);
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("queue: missed {missed} realtime events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = grace_elapsed => {
                clear_at = None;
                if control.clear_if_completed() {
                    debug!("queue: completed run cleared");
                }
            }
        }
    }
}
