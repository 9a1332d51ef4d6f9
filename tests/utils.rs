#![allow(dead_code)]

use log::LevelFilter;
use std::io::Write;
use std::sync::Once;

static LOGGER: Once = Once::new();

pub fn enable_logging() {
    LOGGER.call_once(logger_init)
}

fn logger_init() {
    env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{}:{} [{}] - {}",
                record.file().unwrap_or("unknown"),
                record.line().unwrap_or(0),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Warn)
        .is_test(true)
        .init();
}

/// The universal device inquiry the backend sends at init.
pub const IDENTITY_REQUEST: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];

/// A universal identity reply for a three-byte manufacturer id.
pub fn identity_reply(
    company: [u8; 3],
    family: [u8; 2],
    model: [u8; 2],
    version: [u8; 4],
) -> Vec<u8> {
    let mut reply = vec![0xF0, 0x7E, 0x01, 0x06, 0x02];
    reply.extend_from_slice(&company);
    reply.extend_from_slice(&family);
    reply.extend_from_slice(&model);
    reply.extend_from_slice(&version);
    reply.push(0xF7);
    reply
}
