/*!
The `microbrute` module speaks the second protocol family: every SysEx frame
carries a 7-bit rolling counter at byte 6, requests use fixed templates, and
replies are matched by counter and opcode echo rather than by a sequence
number. The device exposes eight sequencer slots whose contents travel as
text, and a set of parameters reachable over SysEx or over a plain
controller/RPN side channel.
!*/

use crate::backend::{Backend, MidiInfo};
use crate::bytes::ByteReader;
use crate::connector::Connector;
use crate::error::{LibResult, NotSupportedSnafu, ReplySnafu};
use crate::fs::{split_path, Filesystem, FsOptions, Item, ItemAttrs, ItemIterator, ItemKind};
use crate::transfer::{JobControl, SysexTransfer};
use crate::Result;
use log::{debug, warn};
use snafu::{OptionExt, ResultExt};
use std::any::Any;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

const ARTURIA_ID: [u8; 3] = [0x00, 0x20, 0x6B];
const FAMILY_ID: [u8; 2] = [0x04, 0x00];
const MODEL_ID: [u8; 2] = [0x02, 0x01];

/// Filesystem id of the sequence slots.
pub const FS_SEQUENCE: u32 = 1;

const MAX_SEQS: u32 = 8;

/// Steps below this note value cannot be played and parse as rests.
const MIN_NOTE: u8 = 12;

/// The wire byte for a rest step.
const REST: u8 = 0x7F;

const COUNTER_POS: usize = 6;
const SEQ_ID_POS: usize = 9;
const SEQ_OFFSET_POS: usize = 10;
const SEQ_LEN_POS: usize = 11;
const SEQ_DATA_POS: usize = 12;

const SEQ_REQ: [u8; 13] = [
    0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, 0x00, 0x03, 0x3B, 0x00, 0x00, 0x20, 0xF7,
];

const SEQ_MSG: [u8; 45] = [
    0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, 0x00, 0x23, 0x3A, 0x00, 0x00, 0x20, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0xF7,
];

const GET_PARAM_MSG: [u8; 10] = [0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, 0x00, 0x00, 0x00, 0xF7];

const SET_PARAM_MSG: [u8; 11] = [
    0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, 0x00, 0x01, 0x00, 0x00, 0xF7,
];

/// The device parameters reachable over SysEx, and for most of them over a
/// controller (or RPN) side channel with a device-defined value mapping.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Param {
    NotePriority,
    VelResponse,
    LfoKeyRetrigger,
    EnvelopeLegato,
    BendRange,
    GateLength,
    Sync,
    TxChannel,
    RxChannel,
    Retriggering,
    PlayOn,
    NextSequence,
    StepOn,
    StepLength,
    CalibPbCenter,
    CalibBothBottom,
    CalibBothTop,
    CalibEnd,
}

struct ParamSpec {
    sysex: u8,
    ctl: Option<u8>,
    map: Option<fn(u8) -> u8>,
}

fn map_plus_one(value: u8) -> u8 {
    value + 1
}

fn map_times_64(value: u8) -> u8 {
    value * 64
}

fn map_times_42(value: u8) -> u8 {
    value * 42
}

fn map_step_length(value: u8) -> u8 {
    match value {
        4 => 0,
        8 => 30,
        16 => 60,
        32 => 90,
        _ => 0,
    }
}

fn map_special(value: u8) -> u8 {
    match value {
        0 => 0,
        1 => 43,
        2 => 87,
        _ => 0,
    }
}

fn param_spec(param: Param) -> ParamSpec {
    match param {
        Param::NotePriority => ParamSpec {
            sysex: 0x0B,
            ctl: Some(111),
            map: Some(map_special),
        },
        Param::VelResponse => ParamSpec {
            sysex: 0x11,
            ctl: Some(112),
            map: Some(map_special),
        },
        Param::LfoKeyRetrigger => ParamSpec {
            sysex: 0x0F,
            ctl: Some(110),
            map: Some(map_times_64),
        },
        Param::EnvelopeLegato => ParamSpec {
            sysex: 0x0D,
            ctl: Some(109),
            map: Some(map_times_64),
        },
        // The bend range travels as an RPN, not as a controller.
        Param::BendRange => ParamSpec {
            sysex: 0x2C,
            ctl: None,
            map: None,
        },
        Param::GateLength => ParamSpec {
            sysex: 0x36,
            ctl: Some(113),
            map: Some(map_times_42),
        },
        Param::Sync => ParamSpec {
            sysex: 0x3C,
            ctl: Some(108),
            map: Some(map_special),
        },
        Param::TxChannel => ParamSpec {
            sysex: 0x07,
            ctl: Some(103),
            map: Some(map_plus_one),
        },
        Param::RxChannel => ParamSpec {
            sysex: 0x05,
            ctl: Some(102),
            map: Some(map_plus_one),
        },
        Param::Retriggering => ParamSpec {
            sysex: 0x34,
            ctl: Some(104),
            map: Some(map_special),
        },
        Param::PlayOn => ParamSpec {
            sysex: 0x2E,
            ctl: Some(105),
            map: Some(map_times_64),
        },
        Param::NextSequence => ParamSpec {
            sysex: 0x32,
            ctl: Some(106),
            map: Some(map_special),
        },
        Param::StepOn => ParamSpec {
            sysex: 0x2A,
            ctl: Some(114),
            map: Some(map_times_64),
        },
        Param::StepLength => ParamSpec {
            sysex: 0x38,
            ctl: Some(107),
            map: Some(map_step_length),
        },
        Param::CalibPbCenter => ParamSpec {
            sysex: 0x21,
            ctl: None,
            map: None,
        },
        Param::CalibBothBottom => ParamSpec {
            sysex: 0x22,
            ctl: None,
            map: None,
        },
        Param::CalibBothTop => ParamSpec {
            sysex: 0x23,
            ctl: None,
            map: None,
        },
        Param::CalibEnd => ParamSpec {
            sysex: 0x24,
            ctl: None,
            map: None,
        },
    }
}

/// The 7-bit rolling message counter: 0…127, then 0 again.
#[derive(Debug, Default)]
pub(crate) struct MessageCounter(AtomicU8);

impl MessageCounter {
    fn next(&self) -> u8 {
        self.0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |value| {
                Some(if value == 0x7F { 0 } else { value + 1 })
            })
            .unwrap_or(0)
    }
}

/// The connector for the Arturia MicroBrute.
pub struct MicroBruteConnector;

impl Connector for MicroBruteConnector {
    fn name(&self) -> &'static str {
        "microbrute"
    }

    fn port_prefixes(&self) -> &'static [&'static str] {
        &["MicroBrute", "Arturia MicroBrute"]
    }

    fn matches(&self, info: &MidiInfo) -> bool {
        info.company == ARTURIA_ID && info.family == FAMILY_ID && info.model == MODEL_ID
    }

    fn handshake(&self, backend: &mut Backend) -> Result<()> {
        let counter = Arc::new(MessageCounter::default());
        let version = backend.midi_info().version;
        backend.set_identity(
            "Arturia MicroBrute".to_owned(),
            format!(
                "{}.{}.{}.{}",
                version[0], version[1], version[2], version[3]
            ),
            "Arturia MicroBrute".to_owned(),
        );
        backend.add_filesystem(Arc::new(SequenceFs {
            counter: Arc::clone(&counter),
        }));
        backend.set_extension(counter);
        Ok(())
    }
}

/// Device-parameter access. Obtained from a handshaken backend with
/// [`MicroBrute::attach`]; shares the message counter with the sequence
/// filesystem.
pub struct MicroBrute {
    counter: Arc<MessageCounter>,
}

impl MicroBrute {
    pub fn attach(backend: &Backend) -> Result<Self> {
        let extension = backend.extension().context(NotSupportedSnafu {
            operation: "microbrute-parameters",
        })?;
        let counter = Arc::clone(extension)
            .downcast::<MessageCounter>()
            .map_err(|_: Arc<dyn Any + Send + Sync>| {
                NotSupportedSnafu {
                    operation: "microbrute-parameters",
                }
                .build()
            })?;
        Ok(Self { counter })
    }

    /// Reads one parameter over SysEx. The reply must echo the counter, the
    /// client tag and the parameter opcode.
    pub fn get_parameter(&self, backend: &Backend, param: Param) -> Result<u8> {
        let op = param_spec(param).sysex;
        let counter = self.counter.next();
        let mut frame = GET_PARAM_MSG;
        frame[COUNTER_POS] = counter;
        frame[8] = op + 1;
        let reply = backend.tx_and_rx_sysex(&frame, None)?;
        let mut reader = ByteReader::new(&reply);
        reader.seek(COUNTER_POS);
        if reader.read_u8().context(ReplySnafu { site: site!() })? != counter {
            protocol!("bad counter byte in parameter reply");
        }
        if reader.read_u8().context(ReplySnafu { site: site!() })? != 1 {
            protocol!("bad client byte in parameter reply");
        }
        if reader.read_u8().context(ReplySnafu { site: site!() })? != op {
            protocol!("bad parameter byte in parameter reply");
        }
        Ok(reader.read_u8().context(ReplySnafu { site: site!() })?)
    }

    /// Writes one parameter, over SysEx or over the controller side channel.
    /// On the side channel the raw value passes through the parameter's
    /// value map; the bend range travels as RPN 0/0.
    pub fn set_parameter(
        &self,
        backend: &Backend,
        param: Param,
        value: u8,
        channel: u8,
        via_sysex: bool,
    ) -> Result<()> {
        if via_sysex {
            let spec = param_spec(param);
            let counter = self.counter.next();
            let mut frame = SET_PARAM_MSG;
            frame[COUNTER_POS] = counter;
            frame[8] = spec.sysex;
            frame[9] = value;
            let transfer = SysexTransfer::new(None);
            backend.tx_sysex(&transfer, &frame)?;
            return Ok(());
        }
        if param == Param::BendRange {
            return backend.send_rpn(channel, 0, 0, value, 0);
        }
        let spec = param_spec(param);
        match (spec.ctl, spec.map) {
            (Some(ctl), Some(map)) => backend.send_controller(channel, ctl, map(value)),
            _ => inval!("parameter {:?} has no controller mapping", param),
        }
    }
}

/// The eight-slot sequence filesystem.
struct SequenceFs {
    counter: Arc<MessageCounter>,
}

impl SequenceFs {
    fn sequence_request(&self, slot: u8, offset: u8) -> Vec<u8> {
        let mut frame = SEQ_REQ.to_vec();
        frame[COUNTER_POS] = self.counter.next();
        frame[SEQ_ID_POS] = slot;
        frame[SEQ_OFFSET_POS] = offset;
        frame
    }

    fn download_half(
        &self,
        backend: &Backend,
        slot: u8,
        offset: u8,
        text: &mut String,
    ) -> Result<()> {
        let request = self.sequence_request(slot, offset);
        let reply = backend.tx_and_rx_sysex(&request, None)?;
        for &step in reply.get(SEQ_DATA_POS..).unwrap_or(&[]) {
            if step == 0 || step == 0xF7 {
                break;
            }
            format_step(step, text);
        }
        Ok(())
    }
}

impl Filesystem for SequenceFs {
    fn id(&self) -> u32 {
        FS_SEQUENCE
    }

    fn name(&self) -> &'static str {
        "sequence"
    }

    fn options(&self) -> FsOptions {
        FsOptions {
            single_op: true,
            id_as_filename: true,
            slot_storage: true,
            sort_by_name: true,
            ..FsOptions::default()
        }
    }

    fn download_ext(&self) -> &'static str {
        "mbseq"
    }

    fn readdir(&self, _backend: &Backend, dir: &str) -> Result<ItemIterator> {
        if dir != "/" {
            return Err(crate::error::NotDirSnafu { path: dir }.build().into());
        }
        Ok(ItemIterator::new((1..=MAX_SEQS).map(
            |slot| -> crate::Result<Item> {
                Ok(Item {
                    name: slot.to_string(),
                    size: 0,
                    kind: ItemKind::File,
                    index: Some(slot),
                    attrs: ItemAttrs::default(),
                })
            },
        )))
    }

    /// Reads both 32-step halves of a slot and renders them as one
    /// `"N: aa bb x …"` text line.
    fn download(
        &self,
        backend: &Backend,
        path: &str,
        output: &mut Vec<u8>,
        control: &JobControl,
    ) -> Result<()> {
        let slot = parse_slot(path)?;
        control.report(0.0);
        let mut text = format!("{}:", slot + 1);
        self.download_half(backend, slot, 0, &mut text)?;
        control.report(0.5);
        self.download_half(backend, slot, 0x20, &mut text)?;
        if !control.is_active() {
            return Err(crate::error::LibError::Cancelled.into());
        }
        control.report(1.0);
        output.extend_from_slice(text.as_bytes());
        Ok(())
    }

    /// Parses a sequence text line and writes it back as two 32-step halves.
    fn upload(
        &self,
        backend: &Backend,
        path: &str,
        data: &[u8],
        control: &JobControl,
    ) -> Result<()> {
        let slot = parse_slot(path)?;
        let text = String::from_utf8_lossy(data);
        let steps = parse_steps(&text);
        if steps.is_empty() {
            inval!("'{}' holds no sequence steps", path);
        }
        control.report(0.0);
        let mut halves = steps.chunks(32);
        let first = halves.next().unwrap_or(&[]);
        self.upload_half(backend, slot, 0, first)?;
        if let Some(second) = halves.next() {
            control.report(0.5);
            self.upload_half(backend, slot, 0x20, second)?;
        }
        control.report(1.0);
        Ok(())
    }
}

impl SequenceFs {
    fn upload_half(&self, backend: &Backend, slot: u8, offset: u8, steps: &[u8]) -> Result<()> {
        let mut frame = SEQ_MSG.to_vec();
        frame[COUNTER_POS] = self.counter.next();
        frame[SEQ_ID_POS] = slot;
        frame[SEQ_OFFSET_POS] = offset;
        frame[SEQ_LEN_POS] = steps.len() as u8;
        frame[SEQ_DATA_POS..SEQ_DATA_POS + steps.len()].copy_from_slice(steps);
        let transfer = SysexTransfer::new(None);
        backend.tx_sysex(&transfer, &frame)?;
        Ok(())
    }
}

/// Extracts the zero-based slot number from a path like `/3`.
fn parse_slot(path: &str) -> LibResult<u8> {
    let (_, name) = split_path(path);
    let slot: u32 = match name.parse() {
        Ok(slot) => slot,
        Err(_) => inval!("'{}' is not a sequence slot", path),
    };
    if slot < 1 || slot > MAX_SEQS {
        inval!("sequence slot {} is out of range", slot);
    }
    Ok((slot - 1) as u8)
}

fn format_step(step: u8, text: &mut String) {
    if step == REST {
        text.push_str(" x");
    } else {
        text.push_str(&format!(" {:02}", step));
    }
}

/// Parses sequence text: whitespace-separated tokens, each a decimal note
/// value or `x` for a rest. A leading `N:` slot label is tolerated. Values
/// below the playable floor (zero included) become rests, as do values at or
/// above `0x7F`; tokens that are not numbers are skipped.
pub(crate) fn parse_steps(text: &str) -> Vec<u8> {
    let mut steps = Vec::new();
    for token in text.split_whitespace() {
        if token.ends_with(':') {
            continue;
        }
        if token.eq_ignore_ascii_case("x") {
            steps.push(REST);
            continue;
        }
        let value: u32 = match token.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("skipping unreadable step token '{}'", token);
                continue;
            }
        };
        let step = if value >= REST as u32 {
            REST
        } else if (value as u8) < MIN_NOTE {
            REST
        } else {
            value as u8
        };
        debug!("step: {:#04x}", step);
        steps.push(step);
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_wraps_at_128() {
        let counter = MessageCounter::default();
        for expected in 0..=0x7Fu8 {
            assert_eq!(counter.next(), expected);
        }
        assert_eq!(counter.next(), 0);
    }

    #[test]
    fn parse_steps_basic() {
        assert_eq!(
            parse_steps("1: 60 x 64 00 67"),
            vec![60, REST, 64, REST, 67]
        );
    }

    #[test]
    fn parse_steps_clamps_and_skips() {
        // 7 is below the playable floor, 130 above the wire ceiling
        assert_eq!(parse_steps("7 130 bogus 127 X 24"), vec![
            REST, REST, REST, REST, 24
        ]);
    }

    #[test]
    fn format_parse_round_trip() {
        let steps = vec![60, REST, 64, REST, 67, 12, 126];
        let mut text = String::from("4:");
        for &step in &steps {
            format_step(step, &mut text);
        }
        assert_eq!(parse_steps(&text), steps);
        // and the emitted text is stable
        let reparsed = parse_steps(&text);
        let mut text2 = String::from("4:");
        for &step in &reparsed {
            format_step(step, &mut text2);
        }
        assert_eq!(text, text2);
    }

    #[test]
    fn slot_parsing() {
        assert_eq!(parse_slot("/1").unwrap(), 0);
        assert_eq!(parse_slot("8").unwrap(), 7);
        assert!(parse_slot("/9").is_err());
        assert!(parse_slot("/drums").is_err());
    }

    #[test]
    fn value_maps() {
        assert_eq!(map_plus_one(4), 5);
        assert_eq!(map_times_64(1), 64);
        assert_eq!(map_times_42(2), 84);
        assert_eq!(map_step_length(16), 60);
        assert_eq!(map_step_length(5), 0);
        assert_eq!(map_special(2), 87);
        assert_eq!(map_special(7), 0);
    }
}
