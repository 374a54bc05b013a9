//! # Timer Set
//!
//! Named one-shot and periodic timers whose expiry posts an event into the
//! automaton queue, but only while the timer's state guard holds. A timer
//! stopped after it already fired is tolerated: the stale event fails the
//! guard or is ignored by the handler of the state the automaton is in.
//!
//! Two implementations of [`TimerControl`]:
//!
//! - [`TimerSet`] runs a worker thread that sleeps until the next deadline.
//! - [`ManualTimers`] never expires on its own; callers fire timers
//!   explicitly, which makes automaton runs deterministic.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, unbounded};

use crate::message::{Event, Message};
use crate::queue::EventSender;
use crate::state::{SharedStatus, State};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerId {
    /// Periodic signal/network re-check.
    Polling,
    PdnActivateRetry,
    /// Registration must complete before this expires.
    NwRegTimeout,
    /// NFMC backoff before powering the modem back on.
    RegisterRetry,
    FotaTimeout,
    LpInactivity,
    /// Modem must confirm low-power entry before this expires.
    SleepRequest,
}

impl TimerId {
    pub const ALL: [TimerId; 7] = [
        TimerId::Polling,
        TimerId::PdnActivateRetry,
        TimerId::NwRegTimeout,
        TimerId::RegisterRetry,
        TimerId::FotaTimeout,
        TimerId::LpInactivity,
        TimerId::SleepRequest,
    ];

    pub fn is_periodic(self) -> bool {
        matches!(self, TimerId::Polling)
    }

    /// Event posted on expiry.
    pub fn event(self) -> Event {
        match self {
            TimerId::Polling => Event::PollingTimer,
            TimerId::PdnActivateRetry => Event::PdnActivateRetryTimer,
            TimerId::NwRegTimeout => Event::NwRegTimeoutTimer,
            TimerId::RegisterRetry => Event::RegisterRetryTimer,
            TimerId::FotaTimeout => Event::FotaTimeout,
            TimerId::LpInactivity => Event::PowerSleepRequest,
            TimerId::SleepRequest => Event::PowerSleepTimeout,
        }
    }

    /// Whether an expiry should be posted, given the published status.
    pub fn guard(self, status: &SharedStatus) -> bool {
        let state = status.state();
        match self {
            TimerId::Polling => {
                matches!(
                    state,
                    State::WaitingSignalQualityOk
                        | State::WaitingNetworkStatus
                        | State::ModemDataReady
                ) && !status.nfmc_retry_pending()
                    && status.polling_active()
                    && !status.polling_on_going()
            }
            TimerId::PdnActivateRetry => state == State::ModemPdnActivating,
            TimerId::NwRegTimeout => state == State::WaitingNetworkStatus,
            TimerId::RegisterRetry | TimerId::FotaTimeout => true,
            TimerId::LpInactivity => {
                state == State::ModemDataReady && status.low_power_target()
            }
            TimerId::SleepRequest => state == State::ModemPowerDataIdle,
        }
    }
}

/// Posts the expiry of `id` if its guard holds. Returns whether it posted.
pub fn expire(id: TimerId, status: &SharedStatus, sender: &EventSender) -> bool {
    if !id.guard(status) {
        tracing::trace!(timer = ?id, state = %status.state(), "timer expiry ignored by guard");
        return false;
    }
    sender.post(Message::Event(id.event()))
}

/// Arms and disarms named timers. Restarting an armed timer replaces it.
pub trait TimerControl: Send {
    fn start(&self, id: TimerId, period: Duration);

    fn stop(&self, id: TimerId);
}

// ─── Threaded timer set ──────────────────────────────────────────────────────

enum TimerCommand {
    Start(TimerId, Duration),
    Stop(TimerId),
    Shutdown,
}

struct Armed {
    deadline: Instant,
    period: Duration,
}

/// Timer worker thread. Dropping it stops the thread.
pub struct TimerSet {
    tx: Sender<TimerCommand>,
    handle: Option<thread::JoinHandle<()>>,
}

impl TimerSet {
    pub fn spawn(status: Arc<SharedStatus>, sender: EventSender) -> io::Result<Self> {
        let (tx, rx) = unbounded();
        let handle = thread::Builder::new()
            .name("cellular-timers".into())
            .spawn(move || timer_worker(rx, status, sender))?;
        Ok(Self {
            tx,
            handle: Some(handle),
        })
    }

    /// Control handle usable from the automaton task.
    pub fn control(&self) -> TimerHandle {
        TimerHandle {
            tx: self.tx.clone(),
        }
    }

    /// Stops the worker. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.tx.send(TimerCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TimerSet {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[derive(Clone)]
pub struct TimerHandle {
    tx: Sender<TimerCommand>,
}

impl TimerControl for TimerHandle {
    fn start(&self, id: TimerId, period: Duration) {
        if self.tx.send(TimerCommand::Start(id, period)).is_err() {
            tracing::debug!(timer = ?id, "timer worker gone, start ignored");
        }
    }

    fn stop(&self, id: TimerId) {
        if self.tx.send(TimerCommand::Stop(id)).is_err() {
            tracing::debug!(timer = ?id, "timer worker gone, stop ignored");
        }
    }
}

fn timer_worker(rx: Receiver<TimerCommand>, status: Arc<SharedStatus>, sender: EventSender) {
    let mut armed: HashMap<TimerId, Armed> = HashMap::new();

    loop {
        let next_deadline = armed.values().map(|a| a.deadline).min();
        let command = match next_deadline {
            Some(deadline) => match rx.recv_deadline(deadline) {
                Ok(cmd) => Some(cmd),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            None => match rx.recv() {
                Ok(cmd) => Some(cmd),
                Err(_) => break,
            },
        };

        match command {
            Some(TimerCommand::Start(id, period)) => {
                let period = period.max(Duration::from_millis(1));
                armed.insert(
                    id,
                    Armed {
                        deadline: Instant::now() + period,
                        period,
                    },
                );
            }
            Some(TimerCommand::Stop(id)) => {
                armed.remove(&id);
            }
            Some(TimerCommand::Shutdown) => break,
            None => {
                let now = Instant::now();
                let mut due: Vec<TimerId> = armed
                    .iter()
                    .filter(|(_, a)| a.deadline <= now)
                    .map(|(id, _)| *id)
                    .collect();
                due.sort();
                for id in due {
                    if id.is_periodic() {
                        if let Some(a) = armed.get_mut(&id) {
                            a.deadline = now + a.period;
                        }
                    } else {
                        armed.remove(&id);
                    }
                    expire(id, &status, &sender);
                }
            }
        }
    }
    tracing::debug!("timer worker stopped");
}

// ─── Manual timers ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerOp {
    Start(TimerId, Duration),
    Stop(TimerId),
}

#[derive(Default)]
struct ManualState {
    armed: HashMap<TimerId, Duration>,
    log: Vec<TimerOp>,
}

/// Timers that only expire when told to.
#[derive(Clone)]
pub struct ManualTimers {
    state: Arc<Mutex<ManualState>>,
    status: Arc<SharedStatus>,
    sender: EventSender,
}

impl ManualTimers {
    pub fn new(status: Arc<SharedStatus>, sender: EventSender) -> Self {
        Self {
            state: Arc::new(Mutex::new(ManualState::default())),
            status,
            sender,
        }
    }

    /// Period of an armed timer.
    pub fn armed(&self, id: TimerId) -> Option<Duration> {
        self.lock().armed.get(&id).copied()
    }

    /// Every start/stop so far, oldest first.
    pub fn log(&self) -> Vec<TimerOp> {
        self.lock().log.clone()
    }

    /// Periods passed to `start` for `id`, oldest first.
    pub fn starts(&self, id: TimerId) -> Vec<Duration> {
        self.lock()
            .log
            .iter()
            .filter_map(|op| match op {
                TimerOp::Start(t, period) if *t == id => Some(*period),
                _ => None,
            })
            .collect()
    }

    /// Expires an armed timer through its guard. Unarmed timers do nothing.
    pub fn fire(&self, id: TimerId) -> bool {
        {
            let mut state = self.lock();
            if !state.armed.contains_key(&id) {
                return false;
            }
            if !id.is_periodic() {
                state.armed.remove(&id);
            }
        }
        expire(id, &self.status, &self.sender)
    }

    /// Delivers an expiry that was already in flight, armed or not.
    pub fn fire_stale(&self, id: TimerId) -> bool {
        expire(id, &self.status, &self.sender)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TimerControl for ManualTimers {
    fn start(&self, id: TimerId, period: Duration) {
        let mut state = self.lock();
        state.armed.insert(id, period);
        state.log.push(TimerOp::Start(id, period));
    }

    fn stop(&self, id: TimerId) {
        let mut state = self.lock();
        if state.armed.remove(&id).is_some() {
            state.log.push(TimerOp::Stop(id));
        }
    }
}
