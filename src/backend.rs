/*!
The `backend` module owns one connected device: the raw MIDI port, the
scratch buffer for reassembling SysEx frames out of the byte stream, the
16-bit request sequence counter, and the identity and capabilities a
connector fills in during the handshake.

All wire traffic for a backend is serialized through one mutex. A request and
its reply form a single critical section, from the instant the sequence
number is allocated until the matching reply is consumed; the lock is
released before any inter-block rest so that cancellation stays prompt.

Port failures are fatal: the port is torn down on the first i/o error and
every later operation fails fast with an i/o-kind error.
!*/

use crate::connector::Registry;
use crate::error::{ClosedSnafu, LibError, LibResult, NotSupportedSnafu, TimeoutSnafu};
use crate::fs::Filesystem;
use crate::midi::{self, RawMidi, POLL_TICK};
use crate::transfer::{SysexTransfer, TransferStatus};
use crate::Result;
use log::{debug, trace, warn};
use snafu::OptionExt;
use std::any::Any;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Default budget for one request/reply exchange.
pub const SYSEX_TIMEOUT: Duration = Duration::from_millis(5000);

/// Budget used when the request may not be implemented by the device at all;
/// five seconds is too long to learn nothing.
pub const SYSEX_TIMEOUT_GUESS: Duration = Duration::from_millis(1000);

/// Rest between the blocks of a multi-round transfer.
pub(crate) const REST_TIME: Duration = Duration::from_millis(50);

/// Outgoing writes are chunked; the port misbehaves beyond 4 KiB.
pub(crate) const MAX_TX_CHUNK: usize = 4 * 1024;

/// Receive scratch buffer length.
pub(crate) const SCRATCH_LEN: usize = 64 * 1024;

/// Upper bound for one reassembled SysEx message (batch included).
pub(crate) const MAX_SYSEX_LEN: usize = 32 * 1024;

const IDENTITY_REQUEST: [u8; 6] = [0xF0, 0x7E, 0x7F, 0x06, 0x01, 0xF7];

/// The identity a device reports to the universal device inquiry.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct MidiInfo {
    pub company: [u8; 3],
    pub family: [u8; 2],
    pub model: [u8; 2],
    pub version: [u8; 4],
}

/// Usage of one device storage area.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageStats {
    pub name: &'static str,
    pub bsize: u64,
    pub bfree: u64,
}

impl StorageStats {
    pub fn percent_used(&self) -> f64 {
        (self.bsize - self.bfree) as f64 * 100.0 / self.bsize as f64
    }
}

/// Device-level OS upgrade, for connectors that support it.
pub trait OsUpgrade: Send + Sync {
    fn upgrade_os(&self, backend: &Backend, image: &[u8], transfer: &SysexTransfer) -> Result<()>;
}

/// Device-level storage statistics, for connectors that support them. The
/// same storage may back several filesystems.
pub trait StorageQuery: Send + Sync {
    fn storage_stats(&self, backend: &Backend, storage: u8) -> Result<StorageStats>;
}

/// A handle to one connected device.
pub struct Backend {
    session: Mutex<Session>,
    midi_info: MidiInfo,
    name: String,
    version: String,
    description: String,
    filesystems: Vec<Arc<dyn Filesystem>>,
    os_upgrade: Option<Arc<dyn OsUpgrade>>,
    storage_query: Option<Arc<dyn StorageQuery>>,
    extension: Option<Arc<dyn Any + Send + Sync>>,
}

impl Backend {
    /// Opens a backend on `port`: performs the identity inquiry, picks the
    /// connector that claims the reported identity, and runs its handshake.
    pub fn init(port: Box<dyn RawMidi>, registry: &Registry) -> Result<Backend> {
        let mut backend = Backend {
            session: Mutex::new(Session::new(port)),
            midi_info: MidiInfo::default(),
            name: String::new(),
            version: String::new(),
            description: String::new(),
            filesystems: Vec::new(),
            os_upgrade: None,
            storage_query: None,
            extension: None,
        };
        backend.midi_info = backend.identity_inquiry()?;
        let connector = registry
            .find(&backend.midi_info)
            .context(NotSupportedSnafu {
                operation: format!("device identity {:02x?}", backend.midi_info.company),
            })?;
        debug!("handshaking with connector '{}'", connector.name());
        connector.handshake(&mut backend)?;
        debug!("connected to {}", backend.name);
        Ok(backend)
    }

    /// Enumerates candidate ports whose sub-device names a registered
    /// connector claims.
    #[cfg(feature = "alsa-backend")]
    pub fn devices(registry: &Registry) -> Vec<midi::DeviceCandidate> {
        midi::alsa::scan(|name| registry.claims_port(name))
    }

    /// Opens and handshakes the given candidate.
    #[cfg(feature = "alsa-backend")]
    pub fn open(candidate: &midi::DeviceCandidate, registry: &Registry) -> Result<Backend> {
        let port = midi::alsa::AlsaPort::open(&candidate.id).map_err(|source| LibError::Io {
            site: site!(),
            source,
        })?;
        Self::init(Box::new(port), registry)
    }

    /// True while the port is alive.
    pub fn check(&self) -> bool {
        self.session().port.is_some()
    }

    pub fn midi_info(&self) -> &MidiInfo {
        &self.midi_info
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn filesystems(&self) -> &[Arc<dyn Filesystem>] {
        &self.filesystems
    }

    pub fn filesystem_by_id(&self, id: u32) -> Option<&Arc<dyn Filesystem>> {
        self.filesystems.iter().find(|fs| fs.id() == id)
    }

    pub fn filesystem_by_name(&self, name: &str) -> Option<&Arc<dyn Filesystem>> {
        self.filesystems.iter().find(|fs| fs.name() == name)
    }

    /// Reports usage of one storage area, when the connector supports it.
    pub fn storage_stats(&self, storage: u8) -> Result<StorageStats> {
        let query = self
            .storage_query
            .clone()
            .context(NotSupportedSnafu {
                operation: "storage-stats",
            })?;
        query.storage_stats(self, storage)
    }

    /// Uploads a firmware image, when the connector supports it.
    pub fn upgrade_os(&self, image: &[u8], transfer: &SysexTransfer) -> Result<()> {
        let upgrade = self.os_upgrade.clone().context(NotSupportedSnafu {
            operation: "os-upgrade",
        })?;
        upgrade.upgrade_os(self, image, transfer)
    }

    // -- connector handshake surface -------------------------------------

    /// Fills the identity fields; called by a connector during its handshake.
    pub fn set_identity(&mut self, name: String, version: String, description: String) {
        self.name = name;
        self.version = version;
        self.description = description;
    }

    pub fn add_filesystem(&mut self, filesystem: Arc<dyn Filesystem>) {
        self.filesystems.push(filesystem);
    }

    pub fn set_os_upgrade(&mut self, upgrade: Arc<dyn OsUpgrade>) {
        self.os_upgrade = Some(upgrade);
    }

    pub fn set_storage_query(&mut self, query: Arc<dyn StorageQuery>) {
        self.storage_query = Some(query);
    }

    /// Attaches connector-private state. The connector's own API retrieves
    /// it with [`Backend::extension`]; it is dropped with the backend.
    pub fn set_extension(&mut self, extension: Arc<dyn Any + Send + Sync>) {
        self.extension = Some(extension);
    }

    pub fn extension(&self) -> Option<&Arc<dyn Any + Send + Sync>> {
        self.extension.as_ref()
    }

    // -- wire primitives --------------------------------------------------

    pub(crate) fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sends one SysEx message and returns one received message, as a single
    /// serialized exchange. Pending input is discarded first.
    pub fn tx_and_rx_sysex(&self, data: &[u8], timeout: Option<Duration>) -> Result<Vec<u8>> {
        let mut session = self.session();
        Ok(session.tx_and_rx_sysex(data, timeout)?)
    }

    /// Sends one SysEx message without waiting for a reply.
    pub fn tx_sysex(&self, transfer: &SysexTransfer, data: &[u8]) -> Result<usize> {
        let mut session = self.session();
        Ok(session.tx_sysex(transfer, data)?)
    }

    /// Receives one SysEx message (or, under `batch`, everything until
    /// silence).
    pub fn rx_sysex(&self, transfer: &SysexTransfer) -> Result<Vec<u8>> {
        let mut session = self.session();
        Ok(session.rx_sysex(transfer)?)
    }

    // -- control-plane side channel ---------------------------------------

    pub fn program_change(&self, channel: u8, program: u8) -> Result<()> {
        debug!("program change: channel {}, program {}", channel, program);
        self.tx_plain(&[0xC0 | (channel & 0x0F), program & 0x7F])
    }

    pub fn send_controller(&self, channel: u8, controller: u8, value: u8) -> Result<()> {
        debug!(
            "controller: channel {}, controller {}, value {}",
            channel, controller, value
        );
        self.tx_plain(&[0xB0 | (channel & 0x0F), controller & 0x7F, value & 0x7F])
    }

    pub fn send_note_on(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.tx_plain(&[0x90 | (channel & 0x0F), note & 0x7F, velocity & 0x7F])
    }

    pub fn send_note_off(&self, channel: u8, note: u8, velocity: u8) -> Result<()> {
        self.tx_plain(&[0x80 | (channel & 0x0F), note & 0x7F, velocity & 0x7F])
    }

    /// Sends a registered parameter number and its value as the four
    /// controller messages the convention prescribes.
    pub fn send_rpn(
        &self,
        channel: u8,
        controller_msb: u8,
        controller_lsb: u8,
        value_msb: u8,
        value_lsb: u8,
    ) -> Result<()> {
        let mut session = self.session();
        let status = 0xB0 | (channel & 0x0F);
        session.tx_plain(&[status, 101, controller_msb & 0x7F])?;
        session.tx_plain(&[status, 100, controller_lsb & 0x7F])?;
        session.tx_plain(&[status, 6, value_msb & 0x7F])?;
        session.tx_plain(&[status, 38, value_lsb & 0x7F])?;
        Ok(())
    }

    fn tx_plain(&self, bytes: &[u8]) -> Result<()> {
        let mut session = self.session();
        Ok(session.tx_plain(bytes)?)
    }

    fn identity_inquiry(&self) -> LibResult<MidiInfo> {
        let mut session = self.session();
        let reply = session.tx_and_rx_sysex(&IDENTITY_REQUEST, Some(SYSEX_TIMEOUT))?;
        parse_identity_reply(&reply)
    }
}

fn parse_identity_reply(reply: &[u8]) -> LibResult<MidiInfo> {
    // F0 7E <dev> 06 02 <company 1|3> <family 2> <model 2> <version 4> F7
    if reply.len() < 6 || reply[1] != 0x7E || reply[3] != 0x06 || reply[4] != 0x02 {
        protocol!("unexpected identity reply ({} bytes)", reply.len());
    }
    let mut pos = 5;
    let company_len = if reply[pos] == 0 { 3 } else { 1 };
    // company + family + model + version + the trailing F7
    if pos + company_len + 8 + 1 > reply.len() {
        protocol!("identity reply too short ({} bytes)", reply.len());
    }
    let mut info = MidiInfo::default();
    info.company[..company_len].copy_from_slice(&reply[pos..pos + company_len]);
    pos += company_len;
    info.family.copy_from_slice(&reply[pos..pos + 2]);
    pos += 2;
    info.model.copy_from_slice(&reply[pos..pos + 2]);
    pos += 2;
    info.version.copy_from_slice(&reply[pos..pos + 4]);
    Ok(info)
}

/// The serialized per-port state: the port itself, the scratch buffer with
/// its residual byte count, and the request sequence counter.
pub(crate) struct Session {
    port: Option<Box<dyn RawMidi>>,
    scratch: Vec<u8>,
    rx_len: usize,
    seq: u16,
}

impl Session {
    fn new(port: Box<dyn RawMidi>) -> Self {
        Self {
            port: Some(port),
            scratch: vec![0; SCRATCH_LEN],
            rx_len: 0,
            seq: 0,
        }
    }

    /// Allocates the next request sequence number, wrapping at 65535.
    pub(crate) fn next_seq(&mut self) -> u16 {
        let value = self.seq;
        self.seq = self.seq.wrapping_add(1);
        value
    }

    /// Discards residual scratch bytes and anything pending on the port.
    pub(crate) fn drain(&mut self) {
        trace!("draining input");
        self.rx_len = 0;
        if let Some(port) = self.port.as_mut() {
            if let Err(e) = port.drain() {
                warn!("error while draining: {}", e);
            }
        }
    }

    pub(crate) fn tx_plain(&mut self, data: &[u8]) -> LibResult<()> {
        self.tx_raw(data)?;
        Ok(())
    }

    fn tx_raw(&mut self, data: &[u8]) -> LibResult<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ClosedSnafu { site: site!() }.build())?;
        match port.tx_raw(data) {
            Ok(n) => Ok(n),
            Err(source) => {
                warn!("error while sending, closing port: {}", source);
                self.port = None;
                Err(LibError::Io {
                    site: site!(),
                    source,
                })
            }
        }
    }

    /// One poll pass: waits up to a tick for input the port has to offer.
    fn rx_raw_tick(&mut self) -> LibResult<usize> {
        let port = self
            .port
            .as_mut()
            .ok_or_else(|| ClosedSnafu { site: site!() }.build())?;
        match port.rx_raw(&mut self.scratch, POLL_TICK) {
            Ok(n) => Ok(n),
            Err(source) => {
                warn!("error while receiving, closing port: {}", source);
                self.port = None;
                Err(LibError::Io {
                    site: site!(),
                    source,
                })
            }
        }
    }

    /// Fills the scratch buffer with the next non-trivial chunk of input.
    /// Observes the cancellation flag at every tick and charges empty ticks
    /// against the transfer's budget. System Real-Time noise is discarded.
    fn rx_raw_fill(
        &mut self,
        transfer: &SysexTransfer,
        elapsed: &mut Duration,
    ) -> LibResult<usize> {
        loop {
            if !transfer.is_active() {
                return Err(LibError::Cancelled);
            }
            let n = self.rx_raw_tick()?;
            if n == 0 {
                *elapsed += POLL_TICK;
                let timing = !transfer.batch || transfer.status() == TransferStatus::Receiving;
                if timing {
                    if let Some(timeout) = transfer.timeout {
                        if *elapsed >= timeout {
                            debug!("timeout");
                            return TimeoutSnafu {
                                millis: timeout.as_millis() as u64,
                            }
                            .fail();
                        }
                    }
                }
                continue;
            }
            if midi::is_realtime_only(&self.scratch[..n]) {
                trace!("discarding {} real-time bytes", n);
                continue;
            }
            return Ok(n);
        }
    }

    /// Sends one SysEx message in chunks of at most [`MAX_TX_CHUNK`] bytes,
    /// checking the cancellation flag between chunks. The transfer always
    /// finishes in the terminal state.
    pub(crate) fn tx_sysex(&mut self, transfer: &SysexTransfer, data: &[u8]) -> LibResult<usize> {
        transfer.set_status(TransferStatus::Sending);
        let mut total = 0;
        let result = loop {
            if total == data.len() {
                break Ok(data.len());
            }
            if !transfer.is_active() {
                break Err(LibError::Cancelled);
            }
            let len = (data.len() - total).min(MAX_TX_CHUNK);
            match self.tx_raw(&data[total..total + len]) {
                Ok(_) => total += len,
                Err(e) => break Err(e),
            }
        };
        transfer.finish();
        if result.is_ok() {
            trace!("sent sysex message ({} bytes)", data.len());
        }
        result
    }

    /// Receives one SysEx message: waits for `0xF0`, then accumulates until
    /// `0xF7` (or, under `batch`, until a silent timeout window), keeping
    /// any bytes after the terminator for the next call. The returned buffer
    /// starts with `0xF0` and ends with `0xF7` (batch: a concatenation of
    /// such frames). The transfer always finishes in the terminal state.
    pub(crate) fn rx_sysex(&mut self, transfer: &SysexTransfer) -> LibResult<Vec<u8>> {
        transfer.set_status(TransferStatus::Waiting);
        let result = self.rx_sysex_inner(transfer);
        transfer.finish();
        result
    }

    fn rx_sysex_inner(&mut self, transfer: &SysexTransfer) -> LibResult<Vec<u8>> {
        let mut elapsed = Duration::from_millis(0);
        let mut message = Vec::new();
        let mut i = 0;

        // Skip everything before the start of the next SysEx frame.
        'begin: loop {
            while i < self.rx_len {
                if self.scratch[i] == 0xF0 {
                    break 'begin;
                }
                i += 1;
            }
            match self.rx_raw_fill(transfer, &mut elapsed) {
                Ok(n) => {
                    self.rx_len = n;
                    i = 0;
                }
                Err(e) => {
                    self.rx_len = 0;
                    return Err(e);
                }
            }
        }

        message.push(0xF0);
        i += 1;
        transfer.set_status(TransferStatus::Receiving);

        loop {
            if i == self.rx_len {
                match self.rx_raw_fill(transfer, &mut elapsed) {
                    Ok(n) => {
                        self.rx_len = n;
                        i = 0;
                    }
                    Err(LibError::Timeout { .. }) | Err(LibError::Cancelled)
                        if transfer.batch && !message.is_empty() =>
                    {
                        // End of the batch: silence after at least one frame.
                        self.rx_len = 0;
                        break;
                    }
                    Err(e) => {
                        self.rx_len = 0;
                        return Err(e);
                    }
                }
            }
            let mut terminated = false;
            while i < self.rx_len {
                let byte = self.scratch[i];
                if byte == 0xF7 && !transfer.batch {
                    message.push(byte);
                    i += 1;
                    terminated = true;
                    break;
                }
                if byte < 0xF8 {
                    message.push(byte);
                }
                i += 1;
            }
            if message.len() > MAX_SYSEX_LEN {
                self.rx_len = 0;
                protocol!("sysex message exceeds {} bytes", MAX_SYSEX_LEN);
            }
            if terminated {
                // Keep what follows the terminator for the next call.
                self.scratch.copy_within(i..self.rx_len, 0);
                self.rx_len -= i;
                break;
            }
        }

        trace!("received sysex message ({} bytes)", message.len());
        Ok(message)
    }

    /// One serialized request/reply exchange: drain, send, receive.
    pub(crate) fn tx_and_rx_sysex(
        &mut self,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> LibResult<Vec<u8>> {
        self.drain();
        let tx = SysexTransfer::new(timeout);
        self.tx_sysex(&tx, data)?;
        let rx = SysexTransfer::new(timeout);
        self.rx_sysex(&rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::midi::virt::VirtualPort;

    fn session(port: VirtualPort) -> Session {
        Session::new(Box::new(port))
    }

    #[test]
    fn seq_wraps() {
        let mut s = session(VirtualPort::new(|_: &[u8]| Vec::new()));
        s.seq = 65535;
        assert_eq!(s.next_seq(), 65535);
        assert_eq!(s.next_seq(), 0);
        assert_eq!(s.next_seq(), 1);
    }

    #[test]
    fn rx_sysex_skips_noise_and_realtime() {
        let mut port = VirtualPort::new(|_: &[u8]| Vec::new());
        port.push_rx(&[0x42, 0xFE, 0xF0, 0x01, 0xF8, 0x02, 0xF7, 0x99]);
        let mut s = session(port);
        let transfer = SysexTransfer::new(Some(Duration::from_millis(100)));
        let frame = s.rx_sysex(&transfer).unwrap();
        assert_eq!(frame, vec![0xF0, 0x01, 0x02, 0xF7]);
        assert!(!transfer.is_active());
        assert_eq!(transfer.status(), TransferStatus::Finished);
        // The byte after the terminator stays buffered.
        assert_eq!(s.rx_len, 1);
        assert_eq!(s.scratch[0], 0x99);
    }

    #[test]
    fn rx_sysex_consecutive_frames_from_one_fill() {
        let mut port = VirtualPort::new(|_: &[u8]| Vec::new());
        port.push_rx(&[0xF0, 0x01, 0xF7, 0xF0, 0x02, 0xF7]);
        let mut s = session(port);
        let t1 = SysexTransfer::new(Some(Duration::from_millis(100)));
        assert_eq!(s.rx_sysex(&t1).unwrap(), vec![0xF0, 0x01, 0xF7]);
        let t2 = SysexTransfer::new(Some(Duration::from_millis(100)));
        assert_eq!(s.rx_sysex(&t2).unwrap(), vec![0xF0, 0x02, 0xF7]);
    }

    #[test]
    fn rx_sysex_times_out() {
        let mut s = session(VirtualPort::new(|_: &[u8]| Vec::new()));
        let transfer = SysexTransfer::new(Some(Duration::from_millis(100)));
        let err = s.rx_sysex(&transfer).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Timeout);
        assert_eq!(transfer.status(), TransferStatus::Finished);
    }

    #[test]
    fn rx_sysex_observes_cancellation() {
        let mut s = session(VirtualPort::new(|_: &[u8]| Vec::new()));
        let transfer = SysexTransfer::new(None);
        transfer.control().cancel();
        let err = s.rx_sysex(&transfer).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Cancelled);
        assert_eq!(transfer.status(), TransferStatus::Finished);
    }

    #[test]
    fn rx_sysex_batch_collects_until_silence() {
        let mut port = VirtualPort::new(|_: &[u8]| Vec::new());
        port.push_rx(&[0xF0, 0x01, 0xF7, 0xF0, 0x02, 0xF7]);
        let mut s = session(port);
        let transfer = SysexTransfer::batch(Some(Duration::from_millis(40)));
        let frames = s.rx_sysex(&transfer).unwrap();
        assert_eq!(frames, vec![0xF0, 0x01, 0xF7, 0xF0, 0x02, 0xF7]);
    }

    #[test]
    fn identity_parse_three_byte_company() {
        let reply = [
            0xF0, 0x7E, 0x01, 0x06, 0x02, 0x00, 0x20, 0x3C, 0x00, 0x00, 0x0C, 0x00, 0x01, 0x02,
            0x03, 0x04, 0xF7,
        ];
        let info = parse_identity_reply(&reply).unwrap();
        assert_eq!(info.company, [0x00, 0x20, 0x3C]);
        assert_eq!(info.family, [0x00, 0x00]);
        assert_eq!(info.model, [0x0C, 0x00]);
        assert_eq!(info.version, [0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn identity_parse_one_byte_company() {
        let reply = [
            0xF0, 0x7E, 0x01, 0x06, 0x02, 0x41, 0x02, 0x00, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0xF7,
        ];
        let info = parse_identity_reply(&reply).unwrap();
        assert_eq!(info.company, [0x41, 0x00, 0x00]);
    }

    #[test]
    fn identity_parse_rejects_garbage() {
        let err = parse_identity_reply(&[0xF0, 0x01, 0xF7]).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::Protocol);
    }

    #[test]
    fn storage_percent() {
        let stats = StorageStats {
            name: "+Drive",
            bsize: 0x4000_0000,
            bfree: 0x1000_0000,
        };
        assert!((stats.percent_used() - 75.0).abs() < f64::EPSILON);
    }
}
