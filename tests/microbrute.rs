mod utils;

use std::sync::{Arc, Mutex};
use syxfer::backend::Backend;
use syxfer::connector::{MicroBrute, MicroBruteParam, Registry};
use syxfer::fs::{Filesystem, ItemKind};
use syxfer::midi::virt::VirtualPort;
use syxfer::transfer::JobControl;
use syxfer::ErrorKind;
use utils::{enable_logging, identity_reply, IDENTITY_REQUEST};

/// A scripted MicroBrute: answers the identity inquiry and hands every other
/// frame to `custom`.
fn microbrute<F>(custom: F) -> (Backend, Arc<Mutex<Vec<Vec<u8>>>>)
where
    F: FnMut(&[u8]) -> Vec<Vec<u8>> + Send + 'static,
{
    enable_logging();
    let mut custom = custom;
    let port = VirtualPort::new(move |frame: &[u8]| {
        if frame == &IDENTITY_REQUEST[..] {
            return vec![identity_reply(
                [0x00, 0x20, 0x6B],
                [0x04, 0x00],
                [0x02, 0x01],
                [1, 0, 0, 4],
            )];
        }
        custom(frame)
    });
    let sent = port.sent();
    let backend = Backend::init(Box::new(port), &Registry::default()).unwrap();
    (backend, sent)
}

fn sequence_fs(backend: &Backend) -> Arc<dyn Filesystem> {
    Arc::clone(backend.filesystem_by_name("sequence").unwrap())
}

#[test]
fn handshake_and_slot_listing() {
    let (backend, _) = microbrute(|_| Vec::new());
    assert_eq!(backend.name(), "Arturia MicroBrute");
    assert_eq!(backend.version(), "1.0.0.4");
    let fs = sequence_fs(&backend);
    assert_eq!(fs.download_ext(), "mbseq");
    assert!(fs.options().slot_storage);
    let items: Vec<_> = fs
        .readdir(&backend, "/")
        .unwrap()
        .map(|item| item.unwrap())
        .collect();
    assert_eq!(items.len(), 8);
    assert_eq!(items[0].name, "1");
    assert_eq!(items[7].name, "8");
    assert!(items.iter().all(|item| item.kind == ItemKind::File));
    assert_eq!(fs.item_id(&items[2]), "3");

    let err = fs.readdir(&backend, "/sub").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotDir);
}

/// Builds a sequence-data reply: counter echo, opcode echo, then step bytes
/// at offset 12.
fn sequence_reply(counter: u8, slot: u8, offset: u8, steps: &[u8]) -> Vec<u8> {
    let mut frame = vec![
        0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, counter, 0x23, 0x3A, slot, offset,
        steps.len() as u8,
    ];
    frame.extend_from_slice(steps);
    frame.push(0x00);
    frame.push(0xF7);
    frame
}

#[test]
fn sequence_download_renders_text() {
    let (backend, _) = microbrute(|frame| {
        // sequence request: ... <counter> 03 3B <slot> <offset> 20 F7
        if frame.get(7..9) == Some(&[0x03, 0x3B][..]) {
            let counter = frame[6];
            let slot = frame[9];
            let offset = frame[10];
            assert_eq!(slot, 0);
            let steps: &[u8] = if offset == 0 {
                &[60, 62, 0x7F, 64]
            } else {
                &[]
            };
            return vec![sequence_reply(counter, slot, offset, steps)];
        }
        Vec::new()
    });
    let fs = sequence_fs(&backend);
    let mut output = Vec::new();
    fs.download(&backend, "/1", &mut output, &JobControl::new())
        .unwrap();
    assert_eq!(String::from_utf8(output).unwrap(), "1: 60 62 x 64");
}

#[test]
fn sequence_upload_parses_text() {
    let (backend, sent) = microbrute(|_| Vec::new());
    let fs = sequence_fs(&backend);
    fs.upload(
        &backend,
        "/1",
        b"1: 60 x 64 00 67",
        &JobControl::new(),
    )
    .unwrap();
    let sent = sent.lock().unwrap();
    let frames: Vec<&Vec<u8>> = sent
        .iter()
        .filter(|frame| frame.get(7..9) == Some(&[0x23, 0x3A][..]))
        .collect();
    assert_eq!(frames.len(), 1);
    let frame = frames[0];
    assert_eq!(frame[9], 0); // slot
    assert_eq!(frame[10], 0); // offset
    assert_eq!(frame[11], 5); // step count
    assert_eq!(&frame[12..17], &[60, 0x7F, 64, 0x7F, 67]);
}

#[test]
fn sequence_upload_splits_into_halves() {
    let (backend, sent) = microbrute(|_| Vec::new());
    let fs = sequence_fs(&backend);
    let text: String = (0..40).map(|i| format!("{} ", 24 + i)).collect();
    fs.upload(&backend, "/5", text.as_bytes(), &JobControl::new())
        .unwrap();
    let sent = sent.lock().unwrap();
    let frames: Vec<&Vec<u8>> = sent
        .iter()
        .filter(|frame| frame.get(7..9) == Some(&[0x23, 0x3A][..]))
        .collect();
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0][9], 4); // slot
    assert_eq!(frames[0][10], 0x00);
    assert_eq!(frames[0][11], 32);
    assert_eq!(frames[1][10], 0x20);
    assert_eq!(frames[1][11], 8);
    assert_eq!(frames[0][12], 24);
    assert_eq!(frames[1][12], 24 + 32);
    // the rolling counter advances between the halves
    assert_eq!(frames[1][6], frames[0][6] + 1);
}

#[test]
fn sequence_upload_rejects_bad_slot() {
    let (backend, _) = microbrute(|_| Vec::new());
    let fs = sequence_fs(&backend);
    let err = fs
        .upload(&backend, "/9", b"1: 60", &JobControl::new())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArg);
}

#[test]
fn parameter_get_checks_echoes() {
    let (backend, _) = microbrute(|frame| {
        if frame.len() == 10 && frame[7] == 0x00 {
            let counter = frame[6];
            let op = frame[8] - 1;
            return vec![vec![
                0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, counter, 0x01, op, 2, 0xF7,
            ]];
        }
        Vec::new()
    });
    let device = MicroBrute::attach(&backend).unwrap();
    let value = device
        .get_parameter(&backend, MicroBruteParam::Sync)
        .unwrap();
    assert_eq!(value, 2);
}

#[test]
fn parameter_get_rejects_counter_mismatch() {
    let (backend, _) = microbrute(|frame| {
        if frame.len() == 10 && frame[7] == 0x00 {
            let counter = frame[6].wrapping_add(1);
            let op = frame[8] - 1;
            return vec![vec![
                0xF0, 0x00, 0x20, 0x6B, 0x05, 0x01, counter, 0x01, op, 2, 0xF7,
            ]];
        }
        Vec::new()
    });
    let device = MicroBrute::attach(&backend).unwrap();
    let err = device
        .get_parameter(&backend, MicroBruteParam::Sync)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
}

#[test]
fn parameter_set_over_sysex() {
    let (backend, sent) = microbrute(|_| Vec::new());
    let device = MicroBrute::attach(&backend).unwrap();
    device
        .set_parameter(&backend, MicroBruteParam::Sync, 1, 0, true)
        .unwrap();
    let sent = sent.lock().unwrap();
    let frame = sent.last().unwrap();
    assert_eq!(frame.len(), 11);
    assert_eq!(frame[7], 0x01);
    assert_eq!(frame[8], 0x3C); // sync opcode
    assert_eq!(frame[9], 1);
}

#[test]
fn parameter_set_over_controller_uses_value_map() {
    let (backend, sent) = microbrute(|_| Vec::new());
    let device = MicroBrute::attach(&backend).unwrap();
    device
        .set_parameter(&backend, MicroBruteParam::GateLength, 2, 1, false)
        .unwrap();
    {
        let sent = sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().as_slice(), &[0xB1, 113, 84]);
    }
    device
        .set_parameter(&backend, MicroBruteParam::StepLength, 16, 0, false)
        .unwrap();
    {
        let sent = sent.lock().unwrap();
        assert_eq!(sent.last().unwrap().as_slice(), &[0xB0, 107, 60]);
    }
}

#[test]
fn bend_range_goes_out_as_rpn() {
    let (backend, sent) = microbrute(|_| Vec::new());
    let device = MicroBrute::attach(&backend).unwrap();
    device
        .set_parameter(&backend, MicroBruteParam::BendRange, 12, 0, false)
        .unwrap();
    let sent = sent.lock().unwrap();
    let tail: Vec<&Vec<u8>> = sent.iter().rev().take(4).collect();
    assert_eq!(tail[3].as_slice(), &[0xB0, 101, 0]);
    assert_eq!(tail[2].as_slice(), &[0xB0, 100, 0]);
    assert_eq!(tail[1].as_slice(), &[0xB0, 6, 12]);
    assert_eq!(tail[0].as_slice(), &[0xB0, 38, 0]);
}

#[test]
fn calibration_parameters_have_no_controller_path() {
    let (backend, _) = microbrute(|_| Vec::new());
    let device = MicroBrute::attach(&backend).unwrap();
    let err = device
        .set_parameter(&backend, MicroBruteParam::CalibEnd, 0, 0, false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArg);
}
