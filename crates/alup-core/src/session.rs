use std::collections::HashMap;
use std::sync::{Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use alup_proto::{decode_ack, decode_handshake, encode_frame, Ack, AckStatus, Color, Command, Configuration, DecodeError, Frame, WireFrame};

use crate::error::SessionError;
use crate::estimator::{Estimator, FrameTiming, TimingReport};
use crate::link::{Link, SerialLink, TcpLink};
use crate::metrics::{CompletedFrame, FrameObserver};

/// Default size of the clock-delta estimator's rolling window (spec.md
/// §4.3).
pub const DEFAULT_ESTIMATOR_WINDOW: usize = 100;
/// Default number of frames `calibrate` sends with no explicit count
/// (spec.md §4.2, `calibrate(n = 100)`).
pub const DEFAULT_CALIBRATION_FRAMES: u32 = 100;

fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).expect("system clock before epoch").as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Ready,
    Closing,
    Closed,
}

/// Outcome of one completed frame, as filed by the reader thread for the
/// caller of `send` to collect.
enum Outcome {
    Done(CompletedFrame),
    Failed(SessionError),
}

struct State {
    status: Status,
    close_reason: Option<SessionError>,
    next_sequence: u32,
    in_flight: HashMap<u32, Frame>,
    outcomes: HashMap<u32, Outcome>,
    estimator: Estimator,
    last_latency_ms: i64,
}

impl State {
    fn is_full(&self, capacity: usize) -> bool {
        self.in_flight.len() >= capacity
    }
}

struct Inner {
    config: Configuration,
    writer: Mutex<Box<dyn Link>>,
    state: Mutex<State>,
    cv: Condvar,
    observer: Mutex<Option<FrameObserver>>,
    default_deadline: Duration,
}

impl Inner {
    /// Cancels every in-flight frame with `reason` and marks the session
    /// `Closed`. Called from both `disconnect` and the reader thread when
    /// it hits a fatal link/protocol error (spec.md §7).
    fn fail_session(&self, reason: SessionError) {
        let mut state = self.state.lock().unwrap();
        if state.status == Status::Closed {
            return;
        }
        log::error!("session closing: {reason}");
        for (sequence, _frame) in state.in_flight.drain() {
            state.outcomes.insert(sequence, Outcome::Failed(SessionError::LinkClosed));
        }
        state.status = Status::Closed;
        state.close_reason = Some(reason);
        self.cv.notify_all();
    }

    /// Folds one decoded ACK into the session: matches it against
    /// `in_flight`, updates the estimator, fires the observer, and files
    /// the outcome for the waiting `send` call (spec.md §4.2, §4.5).
    fn complete(&self, ack: Ack, t_response_in: u64) {
        let completed = {
            let mut state = self.state.lock().unwrap();
            let Some(mut frame) = state.in_flight.remove(&ack.sequence) else {
                // spec.md §9 open question (a): unknown/duplicate ACK sequence.
                log::warn!("received ACK for unknown or duplicate sequence {}", ack.sequence);
                state.outcomes.insert(
                    ack.sequence,
                    Outcome::Failed(SessionError::ProtocolError {
                        sequence: Some(ack.sequence),
                        reason: "ACK for unknown or duplicate sequence".into(),
                    }),
                );
                self.cv.notify_all();
                return;
            };

            let t_frame_out = frame.t_frame_out.expect("t_frame_out set at write time");
            let timing = state.estimator.record(FrameTiming {
                t_frame_out,
                t_receiver_in: ack.t_receiver_in,
                t_receiver_out: ack.t_receiver_out,
                t_response_in,
            });
            frame.t_receiver_in = Some(ack.t_receiver_in);
            frame.t_receiver_out = Some(ack.t_receiver_out);
            frame.t_response_in = Some(t_response_in);
            state.last_latency_ms = timing.latency_ms;

            let completed = CompletedFrame { sequence: ack.sequence, status: ack.status, frame, timing };

            let outcome = if ack.status == AckStatus::Error {
                Outcome::Failed(SessionError::ProtocolError {
                    sequence: Some(ack.sequence),
                    reason: "controller reported status=ERROR".into(),
                })
            } else {
                Outcome::Done(completed.clone())
            };
            state.outcomes.insert(ack.sequence, outcome);
            self.cv.notify_all();
            completed
        };

        // Fired outside the state lock (DESIGN NOTES §9: avoid
        // re-entrancy with `send`).
        if let Some(observer) = self.observer.lock().unwrap().as_ref() {
            observer(&completed);
        }
    }
}

/// A single controller connection (spec.md §4.2).
///
/// Cheap to clone-share: internally an `Arc`, so a `Session` can be
/// handed to a [`crate::Group`] and to multiple producer threads at
/// once. The background reader thread is the only code that ever reads
/// from the link; callers of `send` only ever write to it, and only
/// while holding the writer lock.
pub struct Session {
    inner: std::sync::Arc<Inner>,
    // Wrapped in a `Mutex` purely so `Session` stays `Sync` — a `Group`
    // holds `&Session` across the scoped threads it fans a `send` out to.
    reader: Mutex<Option<JoinHandle<()>>>,
}

/// How `send` behaves when the in-flight pipeline is already at
/// `frameBufferSize` (spec.md §9 DESIGN NOTES, "non-blocking send").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    /// Block until a slot frees (the default policy, spec.md §4.2).
    Block,
    /// Fail immediately with [`SessionError::BufferFull`].
    NonBlocking,
}

impl Session {
    /// Connects over a serial port and performs the handshake (spec.md
    /// §4.2, §6). `timeout` bounds both the link open and the handshake.
    pub fn connect_serial(port: &str, baud: u32, timeout: Duration) -> Result<Session, SessionError> {
        let link = SerialLink::open(port, baud)?;
        Self::connect(Box::new(link), timeout)
    }

    /// Connects over TCP (spec.md §6, default port 5012) and performs the
    /// handshake.
    pub fn connect_tcp(host: &str, port: u16, timeout: Duration) -> Result<Session, SessionError> {
        let deadline = Instant::now() + timeout;
        let link = TcpLink::connect(host, port, deadline)?;
        Self::connect(Box::new(link), timeout)
    }

    /// Performs the handshake over an arbitrary, caller-supplied
    /// [`Link`] and brings the session to `Ready`. `connect_serial` and
    /// `connect_tcp` are thin wrappers around this for the two
    /// transports spec.md §6 names; tests use it directly with an
    /// in-memory loopback link.
    pub fn connect(mut link: Box<dyn Link>, timeout: Duration) -> Result<Session, SessionError> {
        let deadline = Instant::now() + timeout;
        let config = perform_handshake(link.as_mut(), deadline)?;

        let reader_link = link.try_clone()?;

        let inner = std::sync::Arc::new(Inner {
            config,
            writer: Mutex::new(link),
            state: Mutex::new(State {
                status: Status::Ready,
                close_reason: None,
                next_sequence: 0,
                in_flight: HashMap::new(),
                outcomes: HashMap::new(),
                estimator: Estimator::new(DEFAULT_ESTIMATOR_WINDOW),
                last_latency_ms: 0,
            }),
            cv: Condvar::new(),
            observer: Mutex::new(None),
            default_deadline: timeout,
        });

        let reader = {
            let inner = inner.clone();
            std::thread::spawn(move || reader_loop(inner, reader_link))
        };

        Ok(Session { inner, reader: Mutex::new(Some(reader)) })
    }

    /// Device configuration received at handshake time (read-only).
    pub fn configuration(&self) -> &Configuration {
        &self.inner.config
    }

    /// Round-trip latency, in milliseconds, of the most recently
    /// completed frame.
    pub fn last_latency_ms(&self) -> i64 {
        self.inner.state.lock().unwrap().last_latency_ms
    }

    /// The estimator's currently published clock delta, in milliseconds.
    pub fn time_delta_ms(&self) -> i64 {
        self.inner.state.lock().unwrap().estimator.median_ms()
    }

    /// Installs (or clears, with `None`) the observer invoked once per
    /// completed frame (spec.md §4.5, §6 `Session.on_frame_response`).
    pub fn set_observer(&self, observer: Option<FrameObserver>) {
        *self.inner.observer.lock().unwrap() = observer;
    }

    /// Sends `frame`, blocking for a pipeline slot if necessary and for
    /// the matching ACK, per spec.md §4.2.
    pub fn send(&self, frame: Frame) -> Result<CompletedFrame, SessionError> {
        self.send_with(frame, SendMode::Block)
    }

    /// Sends `frame` without blocking on a full pipeline: fails
    /// immediately with [`SessionError::BufferFull`] instead (spec.md §9
    /// DESIGN NOTES, "non-blocking send").
    pub fn try_send(&self, frame: Frame) -> Result<CompletedFrame, SessionError> {
        self.send_with(frame, SendMode::NonBlocking)
    }

    pub fn send_with(&self, frame: Frame, mode: SendMode) -> Result<CompletedFrame, SessionError> {
        self.validate(&frame)?;
        let sequence = self.dispatch(frame, mode)?;
        self.await_outcome(sequence)
    }

    fn validate(&self, frame: &Frame) -> Result<(), SessionError> {
        let config = &self.inner.config;
        if frame.offset > config.max_offset() {
            return Err(SessionError::InvalidArgument(format!(
                "offset {} exceeds strip length {}",
                frame.offset, config.led_count
            )));
        }
        let end = frame.offset as usize + frame.colors.len();
        if end > config.led_count as usize {
            return Err(SessionError::InvalidArgument(format!(
                "colors (offset {}, len {}) exceed strip length {}",
                frame.offset,
                frame.colors.len(),
                config.led_count
            )));
        }
        Ok(())
    }

    /// Reserves a sequence and a pipeline slot, encodes and writes the
    /// frame, and records `t_frame_out`. Holds the writer lock for the
    /// entire reserve → write → bookkeeping sequence so that bytes reach
    /// the wire in the order `send` was called (spec.md §5 P3), while
    /// never holding the state lock across I/O (spec.md §5).
    fn dispatch(&self, mut frame: Frame, mode: SendMode) -> Result<u32, SessionError> {
        let capacity = self.inner.config.frame_buffer_size.max(1) as usize;
        let deadline = Instant::now() + self.inner.default_deadline;

        let mut writer = self.inner.writer.lock().unwrap();

        let sequence = {
            let mut state = self.inner.state.lock().unwrap();
            loop {
                match state.status {
                    // The session is already closed: whatever caused that
                    // (timeout, CRC error, ...) was already reported to the
                    // caller who hit it. Any later send just finds a dead
                    // link (spec.md §8 S6).
                    Status::Closing | Status::Closed => return Err(SessionError::LinkClosed),
                    Status::Ready => {}
                }
                if !state.is_full(capacity) {
                    break;
                }
                if mode == SendMode::NonBlocking {
                    return Err(SessionError::BufferFull);
                }
                let (guard, timed_out) = self.inner.cv.wait_timeout(state, deadline.saturating_duration_since(Instant::now())).unwrap();
                state = guard;
                if timed_out.timed_out() && state.is_full(capacity) && state.status == Status::Ready {
                    drop(state);
                    // spec.md §7: TIMEOUT is fatal to the whole session, even
                    // when it happens waiting for a pipeline slot rather than
                    // for a specific ACK.
                    self.inner.fail_session(SessionError::Timeout);
                    return Err(SessionError::Timeout);
                }
            }

            let sequence = state.next_sequence;
            state.next_sequence = state.next_sequence.wrapping_add(1);
            frame.timestamp = state.estimator.rewrite_timestamp(frame.timestamp);
            state.in_flight.insert(sequence, frame.clone());
            sequence
        };

        let wire = WireFrame {
            sequence,
            command: frame.command,
            offset: frame.offset,
            timestamp: frame.timestamp,
            colors: &frame.colors,
        };
        let bytes = encode_frame(&wire).map_err(|err| SessionError::InvalidArgument(err.to_string()))?;

        let write_result = writer.write_all(&bytes, deadline);
        let t_frame_out = now_ms();
        drop(writer);

        {
            let mut state = self.inner.state.lock().unwrap();
            if let Err(err) = write_result {
                state.in_flight.remove(&sequence);
                let reason: SessionError = err.into();
                state.status = Status::Closed;
                state.close_reason = Some(reason.clone());
                self.inner.cv.notify_all();
                return Err(reason);
            }
            if let Some(in_flight_frame) = state.in_flight.get_mut(&sequence) {
                in_flight_frame.t_frame_out = Some(t_frame_out);
            }
        }

        Ok(sequence)
    }

    fn await_outcome(&self, sequence: u32) -> Result<CompletedFrame, SessionError> {
        let deadline = Instant::now() + self.inner.default_deadline;
        let mut state = self.inner.state.lock().unwrap();
        loop {
            if let Some(outcome) = state.outcomes.remove(&sequence) {
                self.inner.cv.notify_all();
                return match outcome {
                    Outcome::Done(completed) => Ok(completed),
                    Outcome::Failed(err) => Err(err),
                };
            }
            if state.status == Status::Closed {
                return Err(state.close_reason.clone().unwrap_or(SessionError::LinkClosed));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                drop(state);
                self.inner.fail_session(SessionError::Timeout);
                return Err(SessionError::Timeout);
            }
            let (guard, _) = self.inner.cv.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }

    /// Convenience producer: replaces the strip's colors starting at
    /// offset 0 (spec.md §6 `Session.set_colors`).
    pub fn set_colors(&self, colors: Vec<Color>) -> Result<CompletedFrame, SessionError> {
        self.send(Frame::with_colors(colors))
    }

    /// Convenience producer: sends an empty frame carrying only `cmd`.
    pub fn set_command(&self, cmd: Command) -> Result<CompletedFrame, SessionError> {
        let mut frame = Frame::new();
        frame.command = cmd;
        self.send(frame)
    }

    /// Sends a `CLEAR` command frame (spec.md §6 `Session.clear`).
    pub fn clear(&self) -> Result<CompletedFrame, SessionError> {
        self.set_command(Command::Clear)
    }

    /// Sends `n` empty frames to warm the delta estimator (spec.md §4.2).
    pub fn calibrate(&self, n: u32) -> Result<(), SessionError> {
        for _ in 0..n {
            self.send(Frame::new())?;
        }
        Ok(())
    }

    /// `Session::ping(n, pause)` (SPEC_FULL.md §3, grounded in
    /// `original_source/tools/ping.py`): sends `n` zero-timestamp `PING`
    /// frames with `pause` between each, returning the per-call timing.
    pub fn ping(&self, n: u32, pause: Duration) -> Result<Vec<TimingReport>, SessionError> {
        let mut reports = Vec::with_capacity(n as usize);
        for i in 0..n {
            let mut frame = Frame::new();
            frame.command = Command::Ping;
            let completed = self.send(frame)?;
            reports.push(completed.timing);
            if i + 1 < n {
                std::thread::sleep(pause);
            }
        }
        Ok(reports)
    }

    /// Blocks until every in-flight frame has completed (spec.md §4.2).
    pub fn flush_buffer(&self) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.inner.default_deadline * 4;
        let mut state = self.inner.state.lock().unwrap();
        while !state.in_flight.is_empty() {
            if state.status == Status::Closed {
                return Err(state.close_reason.clone().unwrap_or(SessionError::LinkClosed));
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::Timeout);
            }
            let (guard, _) = self.inner.cv.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
        Ok(())
    }

    /// Transitions to `Closing`, cancels in-flight frames with
    /// `LINK_CLOSED`, and closes the link (spec.md §4.2, §7). Idempotent.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.inner.fail_session(SessionError::LinkClosed);
        self.inner.writer.lock().unwrap().close()?;
        if let Some(reader) = self.reader.lock().unwrap().take() {
            let _ = reader.join();
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let _ = self.disconnect();
    }
}

/// Reads the handshake off `link`, retrying the read (not the whole
/// handshake) as more bytes trickle in, until either a full handshake
/// decodes or `deadline` passes (spec.md §4.1, §5).
fn perform_handshake(link: &mut dyn Link, deadline: Instant) -> Result<Configuration, SessionError> {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 256];
    loop {
        match decode_handshake(&buf) {
            Ok((config, _consumed)) => {
                link.write_all(&[alup_proto::HANDSHAKE_READY_BYTE], deadline)?;
                return Ok(config);
            }
            Err(DecodeError::Framing(reason)) if reason == "handshake frame truncated" => {}
            Err(err) => return Err(err.into()),
        }

        if Instant::now() >= deadline {
            return Err(SessionError::HandshakeTimeout);
        }

        let n = link.read(&mut scratch, deadline)?;
        if n == 0 && Instant::now() >= deadline {
            return Err(SessionError::HandshakeTimeout);
        }
        buf.extend_from_slice(&scratch[..n]);
    }
}

/// Owns the inbound half of the link for the lifetime of the session
/// (spec.md §5: "the reader task is required; it owns the inbound half
/// of the Link"). Polls with a short deadline so it notices the session
/// closing promptly without busy-spinning.
fn reader_loop(inner: std::sync::Arc<Inner>, mut link: Box<dyn Link>) {
    let mut buf = Vec::new();
    let mut scratch = [0u8; 512];

    loop {
        if inner.state.lock().unwrap().status == Status::Closed {
            return;
        }

        let tick_deadline = Instant::now() + Duration::from_millis(200);
        match link.read(&mut scratch, tick_deadline) {
            Ok(0) => continue,
            Ok(n) => buf.extend_from_slice(&scratch[..n]),
            Err(err) => {
                inner.fail_session(err.into());
                return;
            }
        }

        while buf.len() >= alup_proto::ACK_WIRE_LEN {
            match decode_ack(&buf[..alup_proto::ACK_WIRE_LEN]) {
                Ok(ack) => {
                    let t_response_in = now_ms();
                    buf.drain(..alup_proto::ACK_WIRE_LEN);
                    inner.complete(ack, t_response_in);
                }
                Err(err) => {
                    inner.fail_session(err.into());
                    return;
                }
            }
        }
    }
}
