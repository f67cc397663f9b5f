// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

//! Disconnect recovery.
//!
//! Two paths race after a device change. When the backend reports that the
//! stream died, the supervisor reopens it straight away and raises the
//! `output_reset` flag. When only the platform's device-change callback
//! fires, a timer forces a restart after the reconnect timeout unless the
//! stream was already reset in the meantime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::backend::StreamEvent;
use super::stream::{StreamConfig, StreamController, StreamState};
use crate::config::{
    ConfigError, RecoverySettings, DEFAULT_MAX_RECOVERY_ATTEMPTS, DEFAULT_RECONNECT_TIMEOUT,
};
use crate::error::EngineError;

/// Pause between consecutive reopen attempts.
const RETRY_DELAY: Duration = Duration::from_millis(20);

#[derive(Clone, Debug, PartialEq)]
pub struct RecoveryPolicy {
    /// How long the platform gets to recover on its own after a device change.
    pub reconnect_timeout: Duration,
    pub max_attempts: u32,
}

impl RecoveryPolicy {
    pub fn from_settings(settings: &RecoverySettings) -> Result<RecoveryPolicy, ConfigError> {
        Ok(RecoveryPolicy {
            reconnect_timeout: settings.reconnect_timeout()?,
            max_attempts: settings.max_recovery_attempts().max(1),
        })
    }
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        RecoveryPolicy {
            reconnect_timeout: DEFAULT_RECONNECT_TIMEOUT,
            max_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
        }
    }
}

/// Runs on the supervisor's threads with the negotiated config each time the
/// supervisor itself brings the stream back.
pub type RestartHook = Box<dyn Fn(&StreamConfig) + Send + Sync>;

/// Something the caller should know about that did not come back from a call.
#[derive(Clone, Debug, PartialEq)]
pub enum EngineNotification {
    /// The engine gave up on the output stream. It must be recreated.
    Fatal(EngineError),
}

/// Recovery bookkeeping shared with the engine.
#[derive(Debug, Default)]
pub struct RecoveryStatus {
    output_reset: AtomicBool,
    forced_restarts: AtomicU64,
    recoveries: AtomicU64,
    failed_attempts: AtomicU64,
    terminal: AtomicBool,
}

impl RecoveryStatus {
    /// True once the stream was reset after a disconnect and nobody has
    /// cleared the flag since.
    pub fn output_reset(&self) -> bool {
        self.output_reset.load(Ordering::SeqCst)
    }

    pub fn clear_output_reset(&self) {
        self.output_reset.store(false, Ordering::SeqCst);
    }

    /// Restarts issued by the device-change timer.
    pub fn forced_restarts(&self) -> u64 {
        self.forced_restarts.load(Ordering::SeqCst)
    }

    /// Streams reopened after a disconnect event.
    pub fn recoveries(&self) -> u64 {
        self.recoveries.load(Ordering::SeqCst)
    }

    pub fn failed_attempts(&self) -> u64 {
        self.failed_attempts.load(Ordering::SeqCst)
    }

    /// Recovery failed for good. Nothing restarts the stream after this.
    pub fn is_terminal(&self) -> bool {
        self.terminal.load(Ordering::SeqCst)
    }
}

struct PendingRestart {
    cancel: Sender<()>,
    thread: JoinHandle<()>,
}

struct Shared {
    controller: Arc<Mutex<StreamController>>,
    status: Arc<RecoveryStatus>,
    policy: RecoveryPolicy,
    notifications: Sender<EngineNotification>,
    on_restart: Option<RestartHook>,
    timer: Mutex<Option<PendingRestart>>,
    /// Cancelled timers. Each still holds this struct until its thread exits,
    /// so all of them are joined on shutdown.
    cancelled: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    fn cancel_timer(&self) -> bool {
        let Some(pending) = self.timer.lock().take() else {
            return false;
        };
        self.cancel(pending);
        true
    }

    fn cancel(&self, pending: PendingRestart) {
        let _ = pending.cancel.send(());
        let mut cancelled = self.cancelled.lock();
        cancelled.retain(|thread| !thread.is_finished());
        cancelled.push(pending.thread);
    }

    fn join_timers(&self) {
        let pending = self.timer.lock().take();
        if let Some(pending) = pending {
            let _ = pending.cancel.send(());
            let _ = pending.thread.join();
        }
        let cancelled = std::mem::take(&mut *self.cancelled.lock());
        for thread in cancelled {
            let _ = thread.join();
        }
    }

    /// The backend saw the stream die. Reopen it now.
    fn recover(&self) {
        if self.cancel_timer() {
            debug!("Cancelled pending forced restart");
        }
        if self.status.is_terminal() {
            return;
        }
        let restarted = {
            let mut controller = self.controller.lock();
            if controller.state() == StreamState::Closed {
                debug!("Ignoring disconnect on a closed stream");
                return;
            }
            controller.on_disconnect();
            self.restart(&mut controller, "auto")
        };
        if let Some(config) = restarted {
            self.restarted(&config);
            self.status.output_reset.store(true, Ordering::SeqCst);
            self.status.recoveries.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// The timer expired without the stream being reset.
    fn forced_restart(&self) {
        let restarted = {
            let mut controller = self.controller.lock();
            if self.status.output_reset() || self.status.is_terminal() {
                debug!("Stream already reset, skipping forced restart");
                return;
            }
            info!("No recovery within the reconnect timeout, forcing a restart");
            self.status.forced_restarts.fetch_add(1, Ordering::SeqCst);
            self.restart(&mut controller, "forced")
        };
        if let Some(config) = restarted {
            self.restarted(&config);
        }
    }

    /// Runs the restart hook. Called without the controller lock held.
    fn restarted(&self, config: &StreamConfig) {
        if let Some(on_restart) = self.on_restart.as_ref() {
            on_restart(config);
        }
    }

    /// Tries to restart up to the policy's attempt limit. After the last
    /// failure the stream is closed and a fatal notification goes out once.
    fn restart(&self, controller: &mut StreamController, path: &str) -> Option<StreamConfig> {
        for attempt in 1..=self.policy.max_attempts {
            match controller.restart() {
                Ok(config) => {
                    info!(
                        path,
                        attempt,
                        sample_rate = config.sample_rate,
                        "Output stream restarted"
                    );
                    return Some(config);
                }
                Err(e) => {
                    self.status.failed_attempts.fetch_add(1, Ordering::SeqCst);
                    warn!(path, attempt, error = %e, "Output stream restart failed");
                    if attempt < self.policy.max_attempts {
                        thread::sleep(RETRY_DELAY);
                    }
                }
            }
        }

        controller.close();
        if !self.status.terminal.swap(true, Ordering::SeqCst) {
            error!(
                attempts = self.policy.max_attempts,
                "Giving up on the output stream"
            );
            let _ = self
                .notifications
                .send(EngineNotification::Fatal(EngineError::DeviceUnavailable(
                    format!(
                        "output stream could not be restarted after {} attempts",
                        self.policy.max_attempts
                    ),
                )));
        }
        None
    }
}

/// Watches stream events and runs the recovery protocol on its own thread.
pub struct RecoverySupervisor {
    shared: Arc<Shared>,
    shutdown: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RecoverySupervisor {
    pub fn spawn(
        controller: Arc<Mutex<StreamController>>,
        events: Receiver<StreamEvent>,
        policy: RecoveryPolicy,
        notifications: Sender<EngineNotification>,
        on_restart: Option<RestartHook>,
    ) -> RecoverySupervisor {
        let shared = Arc::new(Shared {
            controller,
            status: Arc::new(RecoveryStatus::default()),
            policy,
            notifications,
            on_restart,
            timer: Mutex::new(None),
            cancelled: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread = {
            let shared = shared.clone();
            thread::spawn(move || loop {
                crossbeam_channel::select! {
                    recv(events) -> event => match event {
                        Ok(StreamEvent::Disconnected) => shared.recover(),
                        Ok(StreamEvent::Error(message)) => {
                            warn!(error = message, "Output stream reported an error");
                        }
                        Err(_) => return,
                    },
                    recv(shutdown_rx) -> _ => return,
                }
            })
        };

        RecoverySupervisor {
            shared,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        }
    }

    pub fn status(&self) -> &Arc<RecoveryStatus> {
        &self.shared.status
    }

    pub fn policy(&self) -> &RecoveryPolicy {
        &self.shared.policy
    }

    /// The platform reported a device was added or removed. If the stream has
    /// already been reset this only clears the flag; otherwise a restart is
    /// scheduled for when the reconnect timeout runs out.
    pub fn on_device_change(&self) {
        if self.shared.status.output_reset.swap(false, Ordering::SeqCst) {
            debug!("Output already reset, no restart needed");
            return;
        }

        let (cancel_tx, cancel_rx) = crossbeam_channel::bounded::<()>(1);
        let timeout = self.shared.policy.reconnect_timeout;
        let shared = self.shared.clone();
        let thread = thread::spawn(move || {
            if let Err(RecvTimeoutError::Timeout) = cancel_rx.recv_timeout(timeout) {
                shared.forced_restart();
            }
        });
        debug!(timeout = ?timeout, "Scheduled forced restart");

        let previous = self.shared.timer.lock().replace(PendingRestart {
            cancel: cancel_tx,
            thread,
        });
        if let Some(previous) = previous {
            self.shared.cancel(previous);
        }
    }

    pub fn has_pending_restart(&self) -> bool {
        self.shared
            .timer
            .lock()
            .as_ref()
            .is_some_and(|pending| !pending.thread.is_finished())
    }

    /// Stops the supervisor and any pending timer. Safe to call twice.
    pub fn shutdown(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Recovery supervisor thread panicked");
            }
        }
        // Nothing cancels timers once the event loop has exited.
        self.shared.join_timers();
    }
}

impl Drop for RecoverySupervisor {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::mock::MockDevice;
    use crate::audio::stream::StreamConfig;
    use crate::testutil::{eventually, mock_controller};

    const TIMEOUT: Duration = Duration::from_millis(100);

    struct Fixture {
        device: MockDevice,
        controller: Arc<Mutex<StreamController>>,
        supervisor: RecoverySupervisor,
        notifications: Receiver<EngineNotification>,
        _tx: crate::audio::CommandSender,
    }

    fn fixture(max_attempts: u32) -> Fixture {
        fixture_with_hook(max_attempts, None)
    }

    fn fixture_with_hook(max_attempts: u32, on_restart: Option<RestartHook>) -> Fixture {
        let device = MockDevice::new("mock");
        let (tx, mut controller, events) = mock_controller(&device);
        controller.open(StreamConfig::default()).unwrap();
        controller.start().unwrap();
        let controller = Arc::new(Mutex::new(controller));
        let (notify_tx, notify_rx) = crossbeam_channel::unbounded();
        let supervisor = RecoverySupervisor::spawn(
            controller.clone(),
            events,
            RecoveryPolicy {
                reconnect_timeout: TIMEOUT,
                max_attempts,
            },
            notify_tx,
            on_restart,
        );
        Fixture {
            device,
            controller,
            supervisor,
            notifications: notify_rx,
            _tx: tx,
        }
    }

    #[test]
    fn test_default_policy_matches_default_settings() {
        assert_eq!(
            RecoveryPolicy::from_settings(&RecoverySettings::default()).unwrap(),
            RecoveryPolicy::default()
        );
        assert_eq!(RecoveryPolicy::default().max_attempts, 3);
    }

    #[test]
    fn test_restart_hook_sees_negotiated_config() {
        let (hook_tx, hook_rx) = crossbeam_channel::unbounded();
        let f = fixture_with_hook(
            3,
            Some(Box::new(move |config: &StreamConfig| {
                let _ = hook_tx.send(config.sample_rate);
            })),
        );
        f.device.set_native_sample_rate(Some(22050));
        f.device.disconnect();
        assert_eq!(hook_rx.recv_timeout(Duration::from_secs(3)), Ok(22050));

        // The forced path reports too.
        f.device.disconnect_silently();
        f.supervisor.status().clear_output_reset();
        f.supervisor.on_device_change();
        assert_eq!(hook_rx.recv_timeout(Duration::from_secs(3)), Ok(22050));
    }

    #[test]
    fn test_shutdown_releases_controller_from_cancelled_timers() {
        for _ in 0..20 {
            let mut f = fixture(3);
            f.supervisor.on_device_change();
            f.supervisor.on_device_change();
            f.supervisor.on_device_change();
            f.supervisor.shutdown();
            // The fixture and the supervisor itself.
            assert_eq!(Arc::strong_count(&f.controller), 2);
            assert!(!f.supervisor.has_pending_restart());
        }
    }

    #[test]
    fn test_disconnect_event_recovers() {
        let f = fixture(3);
        f.device.disconnect();
        let status = f.supervisor.status().clone();
        eventually(|| status.recoveries() == 1, "Stream was not recovered");
        assert!(status.output_reset());
        assert!(f.device.is_running());
        assert_eq!(f.device.open_count(), 2);
        assert_eq!(f.controller.lock().state(), StreamState::Running);
    }

    #[test]
    fn test_device_change_without_recovery_forces_one_restart() {
        let f = fixture(3);
        f.device.disconnect_silently();
        f.supervisor.on_device_change();
        let status = f.supervisor.status().clone();
        eventually(|| status.forced_restarts() == 1, "No forced restart");
        thread::sleep(TIMEOUT * 3);
        assert_eq!(status.forced_restarts(), 1);
        assert!(f.device.is_running());
        assert_eq!(f.device.open_count(), 2);
    }

    #[test]
    fn test_device_change_after_recovery_does_nothing() {
        let f = fixture(3);
        f.device.disconnect();
        let status = f.supervisor.status().clone();
        eventually(|| status.output_reset(), "Stream was not recovered");

        f.supervisor.on_device_change();
        assert!(!status.output_reset());
        assert!(!f.supervisor.has_pending_restart());
        thread::sleep(TIMEOUT * 3);
        assert_eq!(status.forced_restarts(), 0);
        assert_eq!(f.device.open_count(), 2);
    }

    #[test]
    fn test_recovery_cancels_pending_timer() {
        let f = fixture(3);
        f.supervisor.on_device_change();
        f.device.disconnect();
        let status = f.supervisor.status().clone();
        eventually(|| status.recoveries() == 1, "Stream was not recovered");
        thread::sleep(TIMEOUT * 3);
        assert_eq!(status.forced_restarts(), 0);
        assert_eq!(f.device.open_count(), 2);
    }

    #[test]
    fn test_repeated_device_changes_restart_once() {
        let f = fixture(3);
        f.device.disconnect_silently();
        f.supervisor.on_device_change();
        f.supervisor.on_device_change();
        f.supervisor.on_device_change();
        thread::sleep(TIMEOUT * 4);
        assert_eq!(f.supervisor.status().forced_restarts(), 1);
    }

    #[test]
    fn test_repeated_failures_are_terminal() {
        let f = fixture(3);
        f.device.fail_next_opens(3);
        f.device.disconnect();

        let notification = f
            .notifications
            .recv_timeout(Duration::from_secs(3))
            .unwrap();
        assert!(matches!(
            notification,
            EngineNotification::Fatal(EngineError::DeviceUnavailable(_))
        ));
        let status = f.supervisor.status();
        assert!(status.is_terminal());
        assert_eq!(status.failed_attempts(), 3);
        assert_eq!(f.controller.lock().state(), StreamState::Closed);

        // Nothing restarts a terminal stream, and the notification is sent once.
        f.supervisor.on_device_change();
        thread::sleep(TIMEOUT * 3);
        assert_eq!(status.forced_restarts(), 0);
        assert!(f.notifications.try_recv().is_err());
    }

    #[test]
    fn test_shutdown_joins_pending_timer() {
        let mut f = fixture(3);
        f.supervisor.on_device_change();
        f.supervisor.shutdown();
        f.supervisor.shutdown();
        thread::sleep(TIMEOUT * 2);
        assert_eq!(f.supervisor.status().forced_restarts(), 0);
    }
}
