use crate::{Color, Command};

/// An outbound request (spec.md §3).
///
/// `colors` and `offset` are immutable for the lifetime of the frame
/// once it has been handed to `alup_core`'s `Session::send` — nothing in
/// this crate enforces that on its own, it's a contract upheld by the
/// caller and by `Session`.
///
/// The four `t_*` fields are telemetry, not part of the wire encoding;
/// they start as `None` and are written exactly once, when the matching
/// acknowledgement arrives.
#[derive(Debug, Clone, Default)]
pub struct Frame {
    pub command: Command,
    pub offset: u16,
    /// Milliseconds, in the *host's* clock domain. Zero means "apply as
    /// soon as possible"; `Session` is responsible for rewriting this
    /// into the controller's domain before the frame is encoded.
    pub timestamp: u64,
    pub colors: Vec<Color>,

    pub t_frame_out: Option<u64>,
    pub t_receiver_in: Option<u64>,
    pub t_receiver_out: Option<u64>,
    pub t_response_in: Option<u64>,
}

impl Frame {
    pub fn new() -> Self {
        Frame::default()
    }

    pub fn with_colors(colors: Vec<Color>) -> Self {
        Frame {
            colors,
            ..Default::default()
        }
    }

    /// `true` once every telemetry field has been filled in by a
    /// completed round trip.
    pub fn is_complete(&self) -> bool {
        self.t_frame_out.is_some()
            && self.t_receiver_in.is_some()
            && self.t_receiver_out.is_some()
            && self.t_response_in.is_some()
    }
}

/// The exact shape of a data frame as it appears on the wire (spec.md
/// §4.1): a sequence number, a command, an offset, a *controller-domain*
/// timestamp, and the color body. Kept separate from [`Frame`] so the
/// codec never has to know about host-side telemetry or timestamp
/// rewriting — by the time a `WireFrame` exists, both have already
/// happened.
#[derive(Debug, Clone, Copy)]
pub struct WireFrame<'a> {
    pub sequence: u32,
    pub command: Command,
    pub offset: u16,
    pub timestamp: u64,
    pub colors: &'a [Color],
}
