//! Wire data model and codec for the Addressable LED Uniform Protocol
//! (ALUP). Pure: nothing in this crate touches a socket or a serial
//! port. `alup-core` is where bytes actually move.

mod ack;
mod codec;
mod color;
mod command;
mod configuration;
mod error;
mod frame;

pub use ack::{Ack, AckStatus};
pub use codec::{
    decode_ack, decode_handshake, encode_ack, encode_frame, encode_handshake, ACK_SYNC, ACK_WIRE_LEN, DATA_HEADER_LEN,
    DATA_SYNC, HANDSHAKE_READY_BYTE, MAX_DEVICE_NAME_LEN,
};
pub use color::Color;
pub use command::Command;
pub use configuration::Configuration;
pub use error::{DecodeError, EncodeError};
pub use frame::{Frame, WireFrame};
