//! Transport machinery for the Addressable LED Uniform Protocol: a
//! `Session` owns one controller connection, a `Group` fans a frame out
//! to several, and the `Estimator` keeps the two clocks in sync.

mod error;
mod estimator;
mod group;
mod link;
mod metrics;
mod session;

pub use error::{GroupError, LinkError, SessionError};
pub use estimator::{DriftTracker, Estimator, FrameTiming, TimingReport};
pub use group::Group;
pub use link::{Link, SerialLink, TcpLink, DEFAULT_PORT};
pub use metrics::{CompletedFrame, FrameObserver};
pub use session::{SendMode, Session, DEFAULT_CALIBRATION_FRAMES, DEFAULT_ESTIMATOR_WINDOW};

pub use alup_proto::{Ack, AckStatus, Color, Command, Configuration, Frame};
