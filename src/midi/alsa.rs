/*!
The `alsa` module opens hardware raw MIDI ports through the ALSA rawmidi
interface, and scans the system's sound cards for sub-devices whose names a
connector claims.
!*/

use super::{DeviceCandidate, PortError, PortResult, RawMidi};
use alsa::card::Iter as CardIter;
use alsa::ctl::Ctl;
use alsa::rawmidi::{Info, Iter as RawmidiIter, Rawmidi};
use alsa::Direction;
use log::{debug, warn};
use std::io::{ErrorKind, Read, Write};
use std::thread;
use std::time::Duration;

/// A hardware port pair: non-blocking capture, blocking playback.
pub struct AlsaPort {
    input: Rawmidi,
    output: Rawmidi,
}

impl AlsaPort {
    /// Opens the rawmidi device identified by `device`, e.g. `hw:2,0`.
    pub fn open(device: &str) -> PortResult<Self> {
        let input = Rawmidi::new(device, Direction::Capture, true).map_err(|e| open_error(device, e))?;
        let output =
            Rawmidi::new(device, Direction::Playback, false).map_err(|e| open_error(device, e))?;
        debug!("opened rawmidi port '{}'", device);
        Ok(Self { input, output })
    }
}

fn open_error(device: &str, e: alsa::Error) -> PortError {
    PortError::Open {
        device: device.to_owned(),
        message: e.to_string(),
    }
}

impl RawMidi for AlsaPort {
    fn tx_raw(&mut self, data: &[u8]) -> PortResult<usize> {
        let mut io = self.output.io();
        io.write_all(data)
            .map_err(|source| PortError::Io { source })?;
        Ok(data.len())
    }

    fn rx_raw(&mut self, buf: &mut [u8], timeout: Duration) -> PortResult<usize> {
        let mut io = self.input.io();
        for pass in 0..2 {
            match io.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    if pass == 0 {
                        thread::sleep(timeout);
                    }
                }
                Err(source) => return Err(PortError::Io { source }),
            }
        }
        Ok(0)
    }

    fn drain(&mut self) -> PortResult<()> {
        let mut io = self.input.io();
        let mut scratch = [0u8; 1024];
        loop {
            match io.read(&mut scratch) {
                Ok(0) => return Ok(()),
                Ok(_) => continue,
                Err(e) if e.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(source) => return Err(PortError::Io { source }),
            }
        }
    }
}

/// Scans every sound card for rawmidi sub-devices whose names `claims`
/// accepts.
pub fn scan<F>(claims: F) -> Vec<DeviceCandidate>
where
    F: Fn(&str) -> bool,
{
    let mut found = Vec::new();
    for card in CardIter::new() {
        let card = match card {
            Ok(card) => card,
            Err(e) => {
                warn!("cannot read card: {}", e);
                continue;
            }
        };
        let name = format!("hw:{}", card.get_index());
        let ctl = match Ctl::new(&name, false) {
            Ok(ctl) => ctl,
            Err(e) => {
                warn!("cannot open control for {}: {}", name, e);
                continue;
            }
        };
        for info in RawmidiIter::new(&ctl) {
            let info: Info = match info {
                Ok(info) => info,
                Err(e) => {
                    warn!("cannot read rawmidi info on {}: {}", name, e);
                    continue;
                }
            };
            let sub_name = match info.get_subdevice_name() {
                Ok(sub_name) => sub_name,
                Err(_) => continue,
            };
            if claims(&sub_name) {
                let id = format!("hw:{},{}", card.get_index(), info.get_device());
                debug!("adding {} ({})", id, sub_name);
                found.push(DeviceCandidate { id, name: sub_name });
            }
        }
    }
    found
}
