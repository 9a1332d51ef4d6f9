/*!
The `midi` module is the seam between the transfer engine and a raw MIDI
endpoint. The engine only needs three things from a port: a synchronous send,
a poll-tick receive, and a way to throw away stale input. Anything that
provides those can carry a backend: the ALSA rawmidi port on a real machine,
or the in-memory port in [`virt`] when there is no hardware on the bus.
!*/

use snafu::Snafu;
use std::time::Duration;

#[cfg(feature = "alsa-backend")]
pub mod alsa;
pub mod virt;

/// How long one receive tick waits for input.
pub const POLL_TICK: Duration = Duration::from_millis(20);

/// Errors at the port seam. Any of these is fatal to the backend that owns
/// the port.
#[derive(Debug, Snafu)]
pub enum PortError {
    #[snafu(display("port i/o error: {}", source))]
    Io { source: std::io::Error },

    #[snafu(display("cannot open '{}': {}", device, message))]
    Open { device: String, message: String },
}

pub type PortResult<T> = std::result::Result<T, PortError>;

/// A bidirectional raw MIDI endpoint.
pub trait RawMidi: Send {
    /// Sends `data` synchronously, returning the number of bytes written.
    fn tx_raw(&mut self, data: &[u8]) -> PortResult<usize>;

    /// Waits up to `timeout` for input and reads what is available into
    /// `buf`. `Ok(0)` means the tick elapsed with nothing to read.
    fn rx_raw(&mut self, buf: &mut [u8], timeout: Duration) -> PortResult<usize>;

    /// Discards any input the device has already sent.
    fn drain(&mut self) -> PortResult<()>;
}

/// A port discovered during enumeration, not yet opened.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DeviceCandidate {
    /// The identifier to open, e.g. `hw:2,0`.
    pub id: String,
    /// The sub-device name the card reports, e.g. `Elektron Digitakt`.
    pub name: String,
}

/// True when every byte of `data` is a System Real-Time message (`0xF8` and
/// above). Such a buffer carries nothing for the transfer engine and is
/// treated as "no data yet".
pub(crate) fn is_realtime_only(data: &[u8]) -> bool {
    data.iter().all(|&b| b >= 0xF8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn realtime_detection() {
        assert!(is_realtime_only(&[0xF8, 0xFE, 0xFF]));
        assert!(!is_realtime_only(&[0xF8, 0x01]));
        assert!(!is_realtime_only(&[0xF0]));
        // An empty buffer carries nothing.
        assert!(is_realtime_only(&[]));
    }
}
