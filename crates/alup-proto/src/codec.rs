use crc::{Crc, CRC_16_IBM_3740};

use crate::{Ack, AckStatus, Configuration, DecodeError, EncodeError, WireFrame};

/// CRC-16/CCITT-FALSE: poly 0x1021, init 0xFFFF, no input/output
/// reflection, no final xor. `crc-catalog` files this algorithm under
/// `CRC_16_IBM_3740`; spec.md §6 names it by its more common alias.
const CRC16: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Marks the start of a host → controller data frame.
pub const DATA_SYNC: [u8; 2] = [0xAA, 0x55];
/// Marks the start of a controller → host acknowledgement.
pub const ACK_SYNC: [u8; 2] = [0x55, 0xAA];
/// Single byte the host writes once it has parsed the handshake and is
/// ready to receive data frames.
pub const HANDSHAKE_READY_BYTE: u8 = 0x01;

/// Fixed wire length of an acknowledgement: 2 (sync) + 4 (seq) + 1
/// (status) + 8 + 8 (timestamps) + 2 (crc).
pub const ACK_WIRE_LEN: usize = 25;

/// Header length of a data frame, not counting the color body or the
/// trailing CRC: 2 (sync) + 4 (seq) + 1 (command) + 2 (offset) + 8
/// (timestamp) + 2 (bodyLength).
pub const DATA_HEADER_LEN: usize = 19;

/// Longest device name the handshake's length-prefixed field allows.
pub const MAX_DEVICE_NAME_LEN: usize = 32;

fn crc16(bytes: &[u8]) -> u16 {
    CRC16.checksum(bytes)
}

/// Encodes a [`WireFrame`] into its on-wire byte representation.
///
/// Pure: performs no I/O, and the only way it fails is if the caller
/// handed it more colors than the 16-bit `bodyLength` field can
/// describe.
pub fn encode_frame(frame: &WireFrame<'_>) -> Result<Vec<u8>, EncodeError> {
    let body_len = frame
        .colors
        .len()
        .checked_mul(3)
        .filter(|&n| n <= u16::MAX as usize)
        .ok_or(EncodeError::BodyTooLarge { len: frame.colors.len() })? as u16;

    let mut buf = Vec::with_capacity(DATA_HEADER_LEN + body_len as usize + 2);
    buf.extend_from_slice(&DATA_SYNC);
    buf.extend_from_slice(&frame.sequence.to_be_bytes());
    buf.push(frame.command.as_u8());
    buf.extend_from_slice(&frame.offset.to_be_bytes());
    buf.extend_from_slice(&frame.timestamp.to_be_bytes());
    buf.extend_from_slice(&body_len.to_be_bytes());
    for color in frame.colors {
        buf.extend_from_slice(&color.to_rgb_bytes());
    }

    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());

    log::trace!("encoded frame seq={} body_len={} crc={:#06x}", frame.sequence, body_len, crc);
    Ok(buf)
}

/// Decodes a fixed-length acknowledgement frame.
///
/// `buf` must be exactly [`ACK_WIRE_LEN`] bytes, beginning at the sync
/// marker — the caller (`alup-core`'s reader loop) is responsible for
/// locating that marker in the byte stream first.
pub fn decode_ack(buf: &[u8]) -> Result<Ack, DecodeError> {
    if buf.len() != ACK_WIRE_LEN {
        return Err(DecodeError::Framing("acknowledgement frame has the wrong length"));
    }
    if buf[0..2] != ACK_SYNC {
        return Err(DecodeError::Framing("acknowledgement frame missing sync marker"));
    }

    let crc_covered = &buf[..ACK_WIRE_LEN - 2];
    let expected_crc = u16::from_be_bytes([buf[ACK_WIRE_LEN - 2], buf[ACK_WIRE_LEN - 1]]);
    let actual_crc = crc16(crc_covered);
    if expected_crc != actual_crc {
        return Err(DecodeError::CrcMismatch { expected: expected_crc, actual: actual_crc });
    }

    let sequence = u32::from_be_bytes(buf[2..6].try_into().unwrap());
    let status = AckStatus::from_u8(buf[6]);
    let t_receiver_in = u64::from_be_bytes(buf[7..15].try_into().unwrap());
    let t_receiver_out = u64::from_be_bytes(buf[15..23].try_into().unwrap());

    Ok(Ack { status, sequence, t_receiver_in, t_receiver_out })
}

/// Reads a [`Configuration`] off the front of `buf`, returning it along
/// with how many bytes were consumed.
///
/// The handshake has no sync marker of its own (spec.md §4.1) — it is
/// the very first thing the controller sends after link-up, so there is
/// nothing to resynchronize against.
pub fn decode_handshake(buf: &[u8]) -> Result<(Configuration, usize), DecodeError> {
    let mut cursor = 0usize;

    let mut take = |n: usize| -> Result<&[u8], DecodeError> {
        if cursor + n > buf.len() {
            return Err(DecodeError::Framing("handshake frame truncated"));
        }
        let slice = &buf[cursor..cursor + n];
        cursor += n;
        Ok(slice)
    };

    let version = take(3)?;
    let protocol_version = (version[0], version[1], version[2]);

    let name_len = take(1)?[0] as usize;
    if name_len > MAX_DEVICE_NAME_LEN {
        return Err(DecodeError::Framing("handshake device name exceeds 32 bytes"));
    }
    let device_name = String::from_utf8_lossy(take(name_len)?).into_owned();

    let led_count = u16::from_be_bytes(take(2)?.try_into().unwrap());
    let data_pin = take(1)?[0];
    let clock_pin = take(1)?[0];

    let extra_len = u16::from_be_bytes(take(2)?.try_into().unwrap()) as usize;
    let extra_values = take(extra_len)?.to_vec();

    let frame_buffer_size = u16::from_be_bytes(take(2)?.try_into().unwrap());

    Ok((
        Configuration {
            protocol_version,
            device_name,
            led_count,
            data_pin,
            clock_pin,
            extra_values,
            frame_buffer_size,
        },
        cursor,
    ))
}

/// Encodes the handshake device configuration the way a scripted
/// controller (tests, `alup-core`'s loopback harness) would — the
/// inverse of [`decode_handshake`]. Not used by the host at runtime.
pub fn encode_handshake(config: &Configuration) -> Vec<u8> {
    let mut buf = Vec::new();
    buf.push(config.protocol_version.0);
    buf.push(config.protocol_version.1);
    buf.push(config.protocol_version.2);

    let name_bytes = config.device_name.as_bytes();
    let name_len = name_bytes.len().min(MAX_DEVICE_NAME_LEN);
    buf.push(name_len as u8);
    buf.extend_from_slice(&name_bytes[..name_len]);

    buf.extend_from_slice(&config.led_count.to_be_bytes());
    buf.push(config.data_pin);
    buf.push(config.clock_pin);

    buf.extend_from_slice(&(config.extra_values.len() as u16).to_be_bytes());
    buf.extend_from_slice(&config.extra_values);

    buf.extend_from_slice(&config.frame_buffer_size.to_be_bytes());
    buf
}

/// Encodes an acknowledgement the way a scripted controller would — the
/// inverse of [`decode_ack`]. Not used by the host at runtime.
pub fn encode_ack(ack: &Ack) -> Vec<u8> {
    let mut buf = Vec::with_capacity(ACK_WIRE_LEN);
    buf.extend_from_slice(&ACK_SYNC);
    buf.extend_from_slice(&ack.sequence.to_be_bytes());
    buf.push(ack.status.as_u8());
    buf.extend_from_slice(&ack.t_receiver_in.to_be_bytes());
    buf.extend_from_slice(&ack.t_receiver_out.to_be_bytes());
    let crc = crc16(&buf);
    buf.extend_from_slice(&crc.to_be_bytes());
    buf
}
