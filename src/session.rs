//! Background read sessions.
//!
//! A [`Worker`] owns at most one [`Session`]: a dedicated thread running a read loop
//! against one open device, a [`CancelToken`] and an exit signal. Every backend
//! instantiates its own worker and hands it a [`FrameSource`].
//!
//! ## States
//! `Idle -> Starting -> Running -> Stopping -> Idle`, plus `Running -> Idle` when the
//! source reports a fatal failure. The worker never restarts a failed session.
//!
//! ## Loop
//! Each iteration makes one bounded attempt to read:
//! - data: publish one [`ReaderEvent::Frame`], continue,
//! - nothing within the timeout: continue silently,
//! - fatal: publish one [`ReaderEvent::Error`] and exit.
//!
//! Sources with a fixed cadence return a [`FrameSource::pace`] delay; the loop sleeps
//! on the cancel token so Stop wakes it immediately.
//!
//! ## Stop
//! Stop sets the token, waits up to the grace period for the loop to exit, then
//! proceeds regardless. The device handle lives inside the loop's source, so it is
//! released exactly when the loop exits, never while it is still in use. After the
//! wait the bus is fenced: a session that has been cancelled cannot publish again.

use crate::device::DeviceId;
use crate::error::{ReaderError, Result};
use crate::event::ReaderEvent;
use crate::eventbus::EventBus;
use crate::frame::Frame;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative cancellation signal shared between a worker and its loop.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, cv) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        cv.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for `dur` or until cancelled. Returns `true` if cancelled.
    pub fn sleep(&self, dur: Duration) -> bool {
        let (flag, cv) = &*self.inner;
        let deadline = Instant::now() + dur;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = cv
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *cancelled
    }
}

/// Result of one bounded read attempt.
#[derive(Debug)]
pub enum ReadOutcome {
    Data(Frame),
    /// Timed out or nothing new; not an error.
    Idle,
    /// Disconnect or I/O failure; ends the session.
    Fatal(ReaderError),
}

/// One open device, read from the session thread.
pub trait FrameSource: Send + 'static {
    /// One bounded attempt to obtain a report. Must return within a bounded time.
    fn read(&mut self, cancel: &CancelToken) -> ReadOutcome;

    /// Delay between iterations for polled sources. `None` means event-paced.
    fn pace(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WorkerState {
    Idle = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
}

impl WorkerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => WorkerState::Starting,
            2 => WorkerState::Running,
            3 => WorkerState::Stopping,
            _ => WorkerState::Idle,
        }
    }
}

#[derive(Clone, Default)]
struct SharedState(Arc<AtomicU8>);

impl SharedState {
    fn get(&self) -> WorkerState {
        WorkerState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn set(&self, s: WorkerState) {
        self.0.store(s as u8, Ordering::SeqCst);
    }

    fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Runtime state of one active read loop.
struct Session {
    device: DeviceId,
    cancel: CancelToken,
    handle: JoinHandle<()>,
    /// Disconnects when the loop exits (the sender lives on the loop's stack).
    exited: mpsc::Receiver<()>,
}

/// Per-backend owner of the (at most one) active session.
pub struct Worker {
    name: &'static str,
    bus: EventBus,
    grace: Duration,
    state: SharedState,
    session: Option<Session>,
}

impl Worker {
    pub fn new(name: &'static str, bus: EventBus, grace: Duration) -> Self {
        Self {
            name,
            bus,
            grace,
            state: SharedState::default(),
            session: None,
        }
    }

    pub fn state(&self) -> WorkerState {
        self.state.get()
    }

    /// True while a session's loop has begun and not yet exited.
    pub fn is_reading(&self) -> bool {
        self.session.is_some() && self.state.get() == WorkerState::Running
    }

    /// Device of the current session, if one exists (it may have failed already).
    pub fn device(&self) -> Option<&DeviceId> {
        self.session.as_ref().map(|s| &s.device)
    }

    /// Tear down any existing session, then run `source` on a new thread.
    pub fn start(&mut self, device: DeviceId, source: impl FrameSource) -> Result<()> {
        self.stop();
        // A detached loop keeps its own state handle.
        self.state = SharedState::default();
        self.state.set(WorkerState::Starting);

        let cancel = CancelToken::new();
        let (exit_tx, exited) = mpsc::channel::<()>();
        let loop_cancel = cancel.clone();
        let loop_bus = self.bus.clone();
        let loop_state = self.state.clone();
        let loop_device = device.clone();

        let spawned = thread::Builder::new()
            .name(format!("padscope-{}", self.name))
            .spawn(move || {
                let _exit = exit_tx;
                run_loop(loop_device, source, &loop_cancel, &loop_bus, &loop_state);
            });

        let handle = match spawned {
            Ok(h) => h,
            Err(e) => {
                self.state.set(WorkerState::Idle);
                let error = ReaderError::DeviceUnavailable(format!("cannot spawn reader: {e}"));
                self.bus.publish(&ReaderEvent::Error {
                    device: Some(device),
                    error: error.clone(),
                });
                return Err(error);
            }
        };

        self.state.transition(WorkerState::Starting, WorkerState::Running);
        info!(worker = self.name, %device, "reading started");
        self.session = Some(Session {
            device,
            cancel,
            handle,
            exited,
        });
        Ok(())
    }

    /// Stop the current session, if any. Idempotent.
    pub fn stop(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };

        self.state.transition(WorkerState::Running, WorkerState::Stopping);
        session.cancel.cancel();

        // Called from inside a callback on the loop thread: joining would deadlock.
        if session.handle.thread().id() == thread::current().id() {
            warn!(worker = self.name, "stop requested from the reader thread");
            self.state.set(WorkerState::Idle);
            return;
        }

        match session.exited.recv_timeout(self.grace) {
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    worker = self.name,
                    device = %session.device,
                    grace_ms = self.grace.as_millis() as u64,
                    "reader did not exit within the grace period; detaching"
                );
            }
            _ => {
                if session.handle.join().is_err() {
                    warn!(worker = self.name, "reader thread panicked");
                }
            }
        }

        self.bus.fence();
        self.state.set(WorkerState::Idle);
        info!(worker = self.name, device = %session.device, "reading stopped");
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_loop(
    device: DeviceId,
    mut source: impl FrameSource,
    cancel: &CancelToken,
    bus: &EventBus,
    state: &SharedState,
) {
    state.transition(WorkerState::Starting, WorkerState::Running);
    let live = || !cancel.is_cancelled();

    while live() {
        let outcome = catch_unwind(AssertUnwindSafe(|| source.read(cancel))).unwrap_or_else(
            |_| ReadOutcome::Fatal(ReaderError::ReadFailed("reader panicked".into())),
        );

        match outcome {
            ReadOutcome::Data(frame) => {
                let event = ReaderEvent::Frame {
                    device: device.clone(),
                    frame,
                };
                bus.publish_if(live, &event);
            }
            ReadOutcome::Idle => {}
            ReadOutcome::Fatal(error) => {
                // A failure caused by our own cancellation is not reported.
                let event = ReaderEvent::Error {
                    device: Some(device.clone()),
                    error: error.clone(),
                };
                if bus.publish_if(live, &event) {
                    warn!(%device, %error, "reading ended");
                }
                break;
            }
        }

        if let Some(delay) = source.pace() {
            if cancel.sleep(delay) {
                break;
            }
        }
    }

    debug!(%device, "reader loop exited");
    state.set(WorkerState::Idle);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eventbus::EventFilter;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    /// Replays scripted outcomes, then idles.
    struct Script {
        outcomes: VecDeque<ReadOutcome>,
        pace: Option<Duration>,
        dropped: Arc<AtomicBool>,
    }

    impl Script {
        fn new(outcomes: Vec<ReadOutcome>) -> (Self, Arc<AtomicBool>) {
            let dropped = Arc::new(AtomicBool::new(false));
            (
                Self {
                    outcomes: outcomes.into(),
                    pace: Some(Duration::from_millis(2)),
                    dropped: dropped.clone(),
                },
                dropped,
            )
        }
    }

    impl FrameSource for Script {
        fn read(&mut self, cancel: &CancelToken) -> ReadOutcome {
            match self.outcomes.pop_front() {
                Some(o) => o,
                None => {
                    cancel.sleep(Duration::from_millis(5));
                    ReadOutcome::Idle
                }
            }
        }

        fn pace(&self) -> Option<Duration> {
            self.pace
        }
    }

    impl Drop for Script {
        fn drop(&mut self) {
            self.dropped.store(true, Ordering::SeqCst);
        }
    }

    fn collect(bus: &EventBus) -> Arc<Mutex<Vec<ReaderEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(
            move |e: &ReaderEvent| sink.lock().unwrap().push(e.clone()),
            EventFilter::All,
        );
        seen
    }

    fn wait_until(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(2);
        while !cond() {
            assert!(Instant::now() < deadline, "condition not reached in time");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn cancel_token_sleep_wakes_early() {
        let token = CancelToken::new();
        let t = token.clone();
        let started = Instant::now();
        let h = thread::spawn(move || t.sleep(Duration::from_secs(5)));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(h.join().unwrap());
        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!CancelToken::new().sleep(Duration::from_millis(1)));
    }

    #[test]
    fn frames_are_published_in_read_order() {
        let bus = EventBus::new();
        let seen = collect(&bus);
        let mut worker = Worker::new("test", bus, Duration::from_secs(1));
        let (script, _) = Script::new(
            (0u8..5)
                .map(|i| ReadOutcome::Data(Frame::new(&[i])))
                .collect(),
        );

        worker.start(DeviceId::Slot(0), script).unwrap();
        wait_until(|| seen.lock().unwrap().len() == 5);
        worker.stop();

        let order: Vec<u8> = seen
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| e.frame().map(|f| f.get(0)))
            .collect();
        assert_eq!(order, vec![0, 1, 2, 3, 4]);
        assert_eq!(worker.state(), WorkerState::Idle);
    }

    #[test]
    fn fatal_failure_ends_session_once() {
        let bus = EventBus::new();
        let seen = collect(&bus);
        let mut worker = Worker::new("test", bus, Duration::from_secs(1));
        let (script, dropped) = Script::new(vec![
            ReadOutcome::Idle,
            ReadOutcome::Fatal(ReaderError::Disconnected),
            ReadOutcome::Data(Frame::new(&[1])),
        ]);

        worker.start(DeviceId::Slot(1), script).unwrap();
        wait_until(|| dropped.load(Ordering::SeqCst));

        assert!(!worker.is_reading());
        assert_eq!(worker.state(), WorkerState::Idle);
        let events = seen.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].error(), Some(&ReaderError::Disconnected));

        // stopping a self-terminated session is silent
        worker.stop();
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn stop_releases_source_and_is_idempotent() {
        let bus = EventBus::new();
        let seen = collect(&bus);
        let mut worker = Worker::new("test", bus, Duration::from_secs(1));
        let (script, dropped) = Script::new(vec![]);

        worker.start(DeviceId::Slot(2), script).unwrap();
        assert!(worker.is_reading());
        worker.stop();
        assert!(dropped.load(Ordering::SeqCst));
        assert!(!worker.is_reading());

        worker.stop();
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn panicking_source_becomes_read_failure() {
        struct Boom;
        impl FrameSource for Boom {
            fn read(&mut self, _: &CancelToken) -> ReadOutcome {
                panic!("driver bug")
            }
        }

        let bus = EventBus::new();
        let seen = collect(&bus);
        let mut worker = Worker::new("test", bus, Duration::from_secs(1));
        worker.start(DeviceId::Slot(3), Boom).unwrap();
        wait_until(|| !seen.lock().unwrap().is_empty());
        assert!(matches!(
            seen.lock().unwrap()[0].error(),
            Some(ReaderError::ReadFailed(_))
        ));
    }

    #[test]
    fn stuck_source_is_detached_after_grace() {
        struct Stuck;
        impl FrameSource for Stuck {
            fn read(&mut self, _: &CancelToken) -> ReadOutcome {
                thread::sleep(Duration::from_millis(300));
                ReadOutcome::Data(Frame::new(&[0xEE]))
            }
        }

        let bus = EventBus::new();
        let seen = collect(&bus);
        let mut worker = Worker::new("test", bus, Duration::from_millis(20));
        worker.start(DeviceId::Slot(0), Stuck).unwrap();
        let started = Instant::now();
        worker.stop();
        assert!(started.elapsed() < Duration::from_millis(250));

        // the late read completes after stop returned, but is never published
        thread::sleep(Duration::from_millis(400));
        assert!(seen.lock().unwrap().is_empty());
    }
}
