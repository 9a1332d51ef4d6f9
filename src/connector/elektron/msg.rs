/*!
The `msg` module frames Elektron request/response messages. A decoded message
body is `[seq_be16][00 00][opcode][arguments…]`; on the wire it travels as
`F0 · vendor header · 7-bit-packed body · F7`. The framer allocates the
sequence number at send time, inside the same critical section that consumes
the matching reply.
!*/

use crate::backend::{Backend, SYSEX_TIMEOUT};
use crate::bytes::ByteWriter;
use crate::error::LibResult;
use crate::text::to_cp1252;
use crate::transfer::SysexTransfer;
use crate::{sevenbit, text};
use log::debug;
use std::time::Duration;

pub(crate) const MSG_HEADER: [u8; 6] = [0xF0, 0x00, 0x20, 0x3C, 0x10, 0x00];

pub(crate) const OP_PING: u8 = 0x01;
pub(crate) const OP_SOFTWARE_VERSION: u8 = 0x02;
pub(crate) const OP_DEVICE_UID: u8 = 0x03;
pub(crate) const OP_STORAGE_INFO: u8 = 0x05;

pub(crate) const OP_SAMPLE_READ_DIR: u8 = 0x10;
pub(crate) const OP_SAMPLE_CREATE_DIR: u8 = 0x11;
pub(crate) const OP_SAMPLE_DELETE_DIR: u8 = 0x12;
pub(crate) const OP_SAMPLE_DELETE_FILE: u8 = 0x20;
pub(crate) const OP_SAMPLE_RENAME_FILE: u8 = 0x21;
pub(crate) const OP_SAMPLE_OPEN_READER: u8 = 0x30;
pub(crate) const OP_SAMPLE_CLOSE_READER: u8 = 0x31;
pub(crate) const OP_SAMPLE_READ_BLOCK: u8 = 0x32;
pub(crate) const OP_SAMPLE_OPEN_WRITER: u8 = 0x40;
pub(crate) const OP_SAMPLE_CLOSE_WRITER: u8 = 0x41;
pub(crate) const OP_SAMPLE_WRITE_BLOCK: u8 = 0x42;

pub(crate) const OP_OS_UPGRADE_START: u8 = 0x50;
pub(crate) const OP_OS_UPGRADE_WRITE: u8 = 0x51;

pub(crate) const OP_DATA_LIST: u8 = 0x53;
pub(crate) const OP_DATA_OPEN_READ: u8 = 0x54;
pub(crate) const OP_DATA_READ_PARTIAL: u8 = 0x55;
pub(crate) const OP_DATA_CLOSE_READ: u8 = 0x56;
pub(crate) const OP_DATA_OPEN_WRITE: u8 = 0x57;
pub(crate) const OP_DATA_WRITE_PARTIAL: u8 = 0x58;
pub(crate) const OP_DATA_CLOSE_WRITE: u8 = 0x59;
pub(crate) const OP_DATA_MOVE: u8 = 0x5A;
pub(crate) const OP_DATA_COPY: u8 = 0x5B;
pub(crate) const OP_DATA_CLEAR: u8 = 0x5C;
pub(crate) const OP_DATA_SWAP: u8 = 0x5D;

/// Offset of the status byte within a decoded reply.
pub(crate) const MSG_STATUS: usize = 5;

/// Starts a message body: the framer's four reserved bytes, then the
/// template (opcode and fixed-size argument area).
pub(crate) fn new_msg(template: &[u8]) -> ByteWriter {
    let mut writer = ByteWriter::new();
    writer.put_bytes(&[0, 0, 0, 0]);
    writer.put_bytes(template);
    writer
}

/// Like [`new_msg`], appending a NUL-terminated CP1252 path.
pub(crate) fn new_msg_path(template: &[u8], path: &str) -> LibResult<ByteWriter> {
    let mut writer = new_msg(template);
    writer.put_cstring(&to_cp1252(path)?);
    Ok(writer)
}

/// The success flag of a reply: `1` is success, `0` failure.
pub(crate) fn status(msg: &[u8]) -> u8 {
    msg.get(MSG_STATUS).copied().unwrap_or(0)
}

/// The device's own error text, carried after the status byte.
pub(crate) fn device_string(msg: &[u8]) -> String {
    let bytes = match msg.get(MSG_STATUS + 1..) {
        Some(bytes) => bytes,
        None => return String::new(),
    };
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    text::from_cp1252(&bytes[..end])
}

/// Wraps a message body in the vendor frame.
pub(crate) fn to_sysex(msg: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(MSG_HEADER.len() + sevenbit::encoded_len(msg.len()) + 1);
    frame.extend_from_slice(&MSG_HEADER);
    frame.extend_from_slice(&sevenbit::encode(msg));
    frame.push(0xF7);
    frame
}

/// Unwraps a vendor frame into a message body, or `None` when the frame is
/// not one of ours.
pub(crate) fn from_sysex(frame: &[u8]) -> Option<Vec<u8>> {
    if frame.len() < 12 || frame[..MSG_HEADER.len()] != MSG_HEADER {
        return None;
    }
    let body = &frame[MSG_HEADER.len()..frame.len() - 1];
    Some(sevenbit::decode(body))
}

/// One framed exchange with the default timeout.
pub(crate) fn tx_and_rx(backend: &Backend, msg: ByteWriter) -> LibResult<Vec<u8>> {
    tx_and_rx_timeout(backend, msg, SYSEX_TIMEOUT)
}

/// One framed exchange: allocates the sequence number, sends, and receives
/// until a reply carrying the vendor header arrives, all under the session
/// lock. Unrelated SysEx traffic on the port is skipped.
pub(crate) fn tx_and_rx_timeout(
    backend: &Backend,
    msg: ByteWriter,
    timeout: Duration,
) -> LibResult<Vec<u8>> {
    let mut session = backend.session();
    session.drain();
    let seq = session.next_seq();
    let mut msg = msg;
    msg.set_be16(0, seq);
    let body = msg.into_inner();
    let frame = to_sysex(&body);
    let tx = SysexTransfer::new(Some(timeout));
    session.tx_sysex(&tx, &frame)?;
    loop {
        let rx = SysexTransfer::new(Some(timeout));
        let reply = session.rx_sysex(&rx)?;
        match from_sysex(&reply) {
            Some(decoded) => return Ok(decoded),
            None => debug!("skipping unrelated sysex frame ({} bytes)", reply.len()),
        }
    }
}
