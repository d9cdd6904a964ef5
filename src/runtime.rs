//! Event loop driving a [`DiffSession`].
//!
//! Backend requests run on a worker thread and come back over a channel; the
//! caller never waits on the backend unless it asks to with
//! [`Driver::wait`] or [`Driver::settle`]. Replies are applied to the session
//! only inside [`Driver::pump`] (and `settle`), on the caller's thread, so a
//! reply can arrive after a reset and is then dropped by the session's
//! generation, phase and offset checks.
//!
//! The caller supplies the clock: entry points take `now`, and
//! [`Driver::next_deadline`] says when the next timer is due.

use std::collections::{HashMap, VecDeque};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::backend::{DiffBackend, DiffParams};
use crate::command::{Command, TimerKind};
use crate::config::DiffConfig;
use crate::error::DiffError;
use crate::message::Message;
use crate::session::{DiffSession, DiffView};
use crate::update::update;

#[derive(Debug, Clone, Copy)]
struct TimerEntry {
    generation: u64,
    period: Duration,
    deadline: Instant,
}

/// Fixed-period timers, at most one per [`TimerKind`].
#[derive(Debug, Default)]
struct Timers {
    entries: HashMap<TimerKind, TimerEntry>,
}

impl Timers {
    fn arm(&mut self, timer: TimerKind, generation: u64, period: Duration, now: Instant) {
        self.entries.insert(
            timer,
            TimerEntry {
                generation,
                period,
                deadline: now + period,
            },
        );
    }

    fn cancel(&mut self, timer: TimerKind) {
        self.entries.remove(&timer);
    }

    fn is_armed(&self, timer: TimerKind) -> bool {
        self.entries.contains_key(&timer)
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().map(|entry| entry.deadline).min()
    }

    /// Take the earliest timer due at `now` and schedule its next period.
    /// Periods that were missed entirely are skipped.
    fn pop_due(&mut self, now: Instant) -> Option<(TimerKind, u64)> {
        let (&timer, entry) = self
            .entries
            .iter_mut()
            .filter(|(_, entry)| entry.deadline <= now)
            .min_by_key(|(_, entry)| entry.deadline)?;
        let next = entry.deadline + entry.period;
        entry.deadline = if next <= now { now + entry.period } else { next };
        Some((timer, entry.generation))
    }
}

/// A backend call handed to the worker thread.
enum Request {
    Structure {
        generation: u64,
        params: DiffParams,
    },
    NodePage {
        generation: u64,
        params: DiffParams,
        offset: usize,
        limit: usize,
    },
}

impl Request {
    fn run<B: DiffBackend>(self, backend: &B) -> Message {
        match self {
            Self::Structure { generation, params } => Message::StructureReceived {
                generation,
                reply: backend.diff_structure(&params).map_err(|err| classify(&err)),
            },
            Self::NodePage {
                generation,
                params,
                offset,
                limit,
            } => Message::NodePageReceived {
                generation,
                offset,
                reply: backend
                    .diff_node_page(&params, offset, limit)
                    .map_err(|err| classify(&err)),
            },
        }
    }

    fn failed(self, error: DiffError) -> Message {
        match self {
            Self::Structure { generation, .. } => Message::StructureReceived {
                generation,
                reply: Err(error),
            },
            Self::NodePage {
                generation, offset, ..
            } => Message::NodePageReceived {
                generation,
                offset,
                reply: Err(error),
            },
        }
    }
}

/// Keep a [`DiffError`] raised by the backend; anything else is a failed
/// request carrying the full context chain.
fn classify(err: &anyhow::Error) -> DiffError {
    err.chain()
        .find_map(|cause| cause.downcast_ref::<DiffError>())
        .cloned()
        .unwrap_or_else(|| DiffError::RequestFailed(format!("{err:#}")))
}

fn serve<B: DiffBackend>(backend: &B, requests: &Receiver<Request>, replies: &Sender<Message>) {
    for request in requests {
        if replies.send(request.run(backend)).is_err() {
            break;
        }
    }
}

/// Owns a session, its timers and the worker thread running its backend.
pub struct Driver {
    session: DiffSession,
    timers: Timers,
    queue: VecDeque<Message>,
    /// Replies taken off the channel by `wait` but not yet applied
    arrived: VecDeque<Message>,
    requests: Sender<Request>,
    replies: Receiver<Message>,
    in_flight: usize,
}

impl Driver {
    /// Validate `config` and start the backend worker.
    ///
    /// # Errors
    ///
    /// Returns [`DiffError::InvalidConfig`] if the config cannot drive polling.
    pub fn new<B>(backend: B, config: DiffConfig) -> Result<Self, DiffError>
    where
        B: DiffBackend + Send + 'static,
    {
        config.validate()?;

        let (request_tx, request_rx) = mpsc::channel();
        let (reply_tx, reply_rx) = mpsc::channel();
        thread::spawn(move || serve(&backend, &request_rx, &reply_tx));

        Ok(Self {
            session: DiffSession::new(config),
            timers: Timers::default(),
            queue: VecDeque::new(),
            arrived: VecDeque::new(),
            requests: request_tx,
            replies: reply_rx,
            in_flight: 0,
        })
    }

    pub fn start(&mut self, params: DiffParams, now: Instant) {
        self.dispatch(Message::Start(params), now);
    }

    pub fn refresh(&mut self, now: Instant) {
        self.dispatch(Message::Refresh, now);
    }

    pub fn cancel(&mut self, now: Instant) {
        self.dispatch(Message::Cancel, now);
    }

    /// Apply every reply that has arrived, then fire every timer due at `now`.
    /// Returns the number of ticks delivered.
    pub fn pump(&mut self, now: Instant) -> usize {
        self.deliver(now);

        let mut fired = 0;
        while let Some((timer, generation)) = self.timers.pop_due(now) {
            fired += 1;
            self.dispatch(Message::Tick { timer, generation }, now);
        }
        fired
    }

    /// Block up to `timeout` for the next backend reply. The reply is applied
    /// by the next [`Driver::pump`]. Returns false at once when nothing is in
    /// flight.
    pub fn wait(&mut self, timeout: Duration) -> bool {
        if self.in_flight == 0 {
            return false;
        }
        match self.replies.recv_timeout(timeout) {
            Ok(reply) => {
                self.receive(reply);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => {
                warn!(in_flight = self.in_flight, "backend worker stopped");
                self.in_flight = 0;
                false
            }
        }
    }

    /// Apply replies (and the requests they cause) until nothing is in flight
    /// or `timeout` passes. Timers are not fired. Returns true if everything
    /// was answered.
    pub fn settle(&mut self, now: Instant, timeout: Duration) -> bool {
        let give_up = Instant::now() + timeout;
        self.deliver(now);
        while self.in_flight > 0 {
            let remaining = give_up.saturating_duration_since(Instant::now());
            if remaining.is_zero() || !self.wait(remaining) {
                return false;
            }
            self.deliver(now);
        }
        true
    }

    fn receive(&mut self, reply: Message) {
        self.in_flight = self.in_flight.saturating_sub(1);
        self.arrived.push_back(reply);
    }

    /// Apply the replies available right now. Replies to requests issued
    /// while applying them wait for the next call.
    fn deliver(&mut self, now: Instant) {
        let ready: Vec<Message> = self.replies.try_iter().collect();
        for reply in ready {
            self.receive(reply);
        }
        while let Some(reply) = self.arrived.pop_front() {
            self.dispatch(reply, now);
        }
    }

    /// Feed one message and run everything it causes.
    pub fn dispatch(&mut self, msg: Message, now: Instant) {
        self.queue.push_back(msg);
        while let Some(msg) = self.queue.pop_front() {
            for command in update(&mut self.session, msg) {
                self.execute(command, now);
            }
        }
    }

    fn execute(&mut self, command: Command, now: Instant) {
        match command {
            Command::FetchStructure { generation, params } => {
                trace!(generation, "requesting structure");
                self.send(Request::Structure { generation, params });
            }
            Command::FetchNodePage {
                generation,
                params,
                offset,
                limit,
            } => {
                trace!(generation, offset, limit, "requesting node page");
                self.send(Request::NodePage {
                    generation,
                    params,
                    offset,
                    limit,
                });
            }
            Command::ArmTimer {
                timer,
                generation,
                period,
            } => {
                debug!(?timer, generation, ?period, "timer armed");
                self.timers.arm(timer, generation, period, now);
            }
            Command::CancelTimer(timer) => self.timers.cancel(timer),
        }
    }

    fn send(&mut self, request: Request) {
        match self.requests.send(request) {
            Ok(()) => self.in_flight += 1,
            Err(mpsc::SendError(request)) => {
                warn!("backend worker stopped; failing request");
                let error = DiffError::RequestFailed("backend worker stopped".into());
                self.queue.push_back(request.failed(error));
            }
        }
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    #[must_use]
    pub fn timer_armed(&self, timer: TimerKind) -> bool {
        self.timers.is_armed(timer)
    }

    /// Requests sent to the backend whose replies have not been taken yet.
    #[must_use]
    pub const fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// True once the session has reached a terminal phase.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        self.session.phase().is_terminal()
    }

    #[must_use]
    pub const fn session(&self) -> &DiffSession {
        &self.session
    }

    #[must_use]
    pub const fn view(&self) -> DiffView<'_> {
        self.session.view()
    }
}
