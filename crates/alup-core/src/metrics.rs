use alup_proto::{AckStatus, Frame};

use crate::estimator::TimingReport;

/// Snapshot handed to a [`FrameObserver`] once a frame's acknowledgement
/// has arrived and its telemetry is complete (spec.md §6,
/// `Session.on_frame_response`).
#[derive(Debug, Clone)]
pub struct CompletedFrame {
    pub sequence: u32,
    pub status: AckStatus,
    pub frame: Frame,
    pub timing: TimingReport,
}

/// A caller-supplied hook invoked from the session's reader thread each
/// time a frame completes. Must not block — it runs on the same thread
/// that drains the link and unblocks other waiters.
pub type FrameObserver = Box<dyn Fn(&CompletedFrame) + Send + Sync>;
