//! In-process loopback transport plus a minimal scripted controller,
//! used to exercise `Session` against the wire protocol without any
//! real hardware (spec.md §8, "use a scripted in-process controller
//! that speaks the wire protocol on a loopback transport").

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use alup_core::{Link, LinkError};
use alup_proto::{Color, Command, Configuration, ACK_SYNC, DATA_HEADER_LEN, DATA_SYNC};

#[derive(Default)]
struct QueueState {
    bytes: VecDeque<u8>,
    closed: bool,
}

struct ByteQueue {
    state: Mutex<QueueState>,
    cv: Condvar,
}

impl ByteQueue {
    fn new() -> Arc<ByteQueue> {
        Arc::new(ByteQueue { state: Mutex::new(QueueState::default()), cv: Condvar::new() })
    }

    fn push(&self, bytes: &[u8]) {
        let mut state = self.state.lock().unwrap();
        state.bytes.extend(bytes.iter().copied());
        self.cv.notify_all();
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        self.cv.notify_all();
    }

    /// Pops up to `buf.len()` bytes, blocking until at least one is
    /// available, the queue is closed with nothing left to drain, or
    /// `deadline` passes.
    fn pop_some(&self, buf: &mut [u8], deadline: Instant) -> PopResult {
        let mut state = self.state.lock().unwrap();
        loop {
            if !state.bytes.is_empty() {
                let n = buf.len().min(state.bytes.len());
                for slot in buf.iter_mut().take(n) {
                    *slot = state.bytes.pop_front().unwrap();
                }
                return PopResult::Bytes(n);
            }
            if state.closed {
                return PopResult::Closed;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return PopResult::TimedOut;
            }
            let (guard, _) = self.cv.wait_timeout(state, remaining).unwrap();
            state = guard;
        }
    }
}

/// Mirrors the real `Link` impls' distinction between "nothing arrived
/// within the deadline" (`Ok(0)`) and "the peer closed its end"
/// (`LinkError::Closed`).
enum PopResult {
    Bytes(usize),
    TimedOut,
    Closed,
}

/// One end of an in-memory duplex byte stream (spec.md §2's `Link`).
pub struct LoopbackLink {
    read_q: Arc<ByteQueue>,
    write_q: Arc<ByteQueue>,
}

impl Link for LoopbackLink {
    fn read(&mut self, buf: &mut [u8], deadline: Instant) -> Result<usize, LinkError> {
        match self.read_q.pop_some(buf, deadline) {
            PopResult::Bytes(n) => Ok(n),
            PopResult::TimedOut => Ok(0),
            PopResult::Closed => Err(LinkError::Closed),
        }
    }

    fn write_all(&mut self, buf: &[u8], _deadline: Instant) -> Result<(), LinkError> {
        self.write_q.push(buf);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), LinkError> {
        self.write_q.close();
        Ok(())
    }

    fn try_clone(&self) -> Result<Box<dyn Link>, LinkError> {
        Ok(Box::new(LoopbackLink { read_q: self.read_q.clone(), write_q: self.write_q.clone() }))
    }
}

/// Builds a connected pair: `(host_side, controller_side)`.
pub fn loopback_pair() -> (LoopbackLink, LoopbackLink) {
    let a_to_b = ByteQueue::new();
    let b_to_a = ByteQueue::new();
    let host = LoopbackLink { read_q: b_to_a.clone(), write_q: a_to_b.clone() };
    let controller = LoopbackLink { read_q: a_to_b, write_q: b_to_a };
    (host, controller)
}

pub fn now_ms() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_millis() as u64
}

pub fn test_config() -> Configuration {
    Configuration {
        protocol_version: (1, 0, 0),
        device_name: "loopback-strip".into(),
        led_count: 16,
        data_pin: 2,
        clock_pin: 3,
        extra_values: vec![],
        frame_buffer_size: 4,
    }
}

/// A data frame as the scripted controller sees it, decoded off the
/// wire the same way `alup_proto::codec` encoded it — this is
/// deliberately a test-only mirror of `encode_frame`, not a capability
/// `alup-proto` exposes to the host (the host never decodes its own
/// outbound frames).
#[derive(Debug, Clone)]
pub struct RecvDataFrame {
    pub sequence: u32,
    pub command: Command,
    pub offset: u16,
    pub timestamp: u64,
    pub colors: Vec<Color>,
}

fn read_exact(link: &mut dyn Link, n: usize, deadline: Instant) -> Vec<u8> {
    let mut out = Vec::with_capacity(n);
    let mut scratch = [0u8; 512];
    while out.len() < n {
        let want = (n - out.len()).min(scratch.len());
        let got = link.read(&mut scratch[..want], deadline).expect("loopback read never errors");
        if got == 0 {
            if Instant::now() >= deadline {
                panic!("scripted controller timed out waiting for {n} bytes, got {}", out.len());
            }
            continue;
        }
        out.extend_from_slice(&scratch[..got]);
    }
    out
}

/// Blocks until one full data frame has arrived on `link` and returns
/// it decoded.
pub fn recv_data_frame(link: &mut dyn Link) -> RecvDataFrame {
    let deadline = Instant::now() + Duration::from_secs(5);
    let header = read_exact(link, DATA_HEADER_LEN, deadline);
    assert_eq!(&header[0..2], &DATA_SYNC, "data frame missing sync marker");
    let sequence = u32::from_be_bytes(header[2..6].try_into().unwrap());
    let command = Command::from_u8(header[6]);
    let offset = u16::from_be_bytes(header[7..9].try_into().unwrap());
    let timestamp = u64::from_be_bytes(header[9..17].try_into().unwrap());
    let body_len = u16::from_be_bytes(header[17..19].try_into().unwrap()) as usize;

    let rest = read_exact(link, body_len + 2, deadline); // body + trailing CRC
    let colors = rest[..body_len]
        .chunks_exact(3)
        .map(|c| Color::new(c[0], c[1], c[2]))
        .collect();

    RecvDataFrame { sequence, command, offset, timestamp, colors }
}

/// Encodes an acknowledgement byte-for-byte the way the real controller
/// firmware would, for the scripted controller to hand back.
pub fn build_ack(sequence: u32, status: alup_proto::AckStatus, t_receiver_in: u64, t_receiver_out: u64) -> Vec<u8> {
    alup_proto::encode_ack(&alup_proto::Ack { status, sequence, t_receiver_in, t_receiver_out })
}

/// Writes a single acknowledgement onto `link`, as the scripted
/// controller would right after processing a frame.
pub fn send_ack(link: &mut dyn Link, sequence: u32, status: alup_proto::AckStatus, t_receiver_in: u64, t_receiver_out: u64) {
    let bytes = build_ack(sequence, status, t_receiver_in, t_receiver_out);
    link.write_all(&bytes, Instant::now() + Duration::from_secs(5)).unwrap();
}

/// Sanity marker so callers can assert the scripted controller agrees
/// with the codec on the ACK sync bytes without importing `alup_proto`
/// directly in every test.
pub const CONTROLLER_ACK_SYNC: [u8; 2] = ACK_SYNC;

/// Performs the controller side of the handshake: writes `config` then
/// reads the host's single ready byte.
pub fn controller_handshake(link: &mut dyn Link, config: &Configuration) {
    let deadline = Instant::now() + Duration::from_secs(5);
    let encoded = alup_proto::encode_handshake(config);
    link.write_all(&encoded, deadline).unwrap();
    let _ready_byte = read_exact(link, 1, deadline);
}
