mod utils;

use syxfer::sevenbit::{decode, decoded_len, encode, encoded_len};
use utils::enable_logging;

#[test]
fn seven_byte_group_with_mixed_high_bits() {
    enable_logging();
    let input = [0x80, 0x01, 0x02, 0x7F, 0x81, 0xFF, 0x00];
    let encoded = encode(&input);
    assert_eq!(encoded.len(), 8);
    // The header byte carries the high bit of input byte k at bit 6 - k.
    assert_eq!(encoded[0], 0b100_0110);
    assert_eq!(&encoded[1..], &[0x00, 0x01, 0x02, 0x7F, 0x01, 0x7F, 0x00]);
    assert_eq!(decode(&encoded), input.to_vec());
}

#[test]
fn every_length_round_trips() {
    enable_logging();
    for n in 0..256usize {
        let input: Vec<u8> = (0..n).map(|i| (i as u8).wrapping_mul(101).wrapping_add(7)).collect();
        let encoded = encode(&input);
        assert_eq!(encoded.len(), n + (n + 6) / 7);
        assert_eq!(decoded_len(encoded.len()), n);
        assert!(encoded.iter().all(|&b| b < 0x80), "n = {}", n);
        assert_eq!(decode(&encoded), input, "n = {}", n);
    }
}

#[test]
fn all_byte_values_survive() {
    enable_logging();
    let input: Vec<u8> = (0..=255u8).collect();
    assert_eq!(decode(&encode(&input)), input);
}

#[test]
fn length_laws() {
    assert_eq!(encoded_len(0), 0);
    assert_eq!(encoded_len(7), 8);
    assert_eq!(encoded_len(8), 10);
    assert_eq!(decoded_len(8), 7);
    assert_eq!(decoded_len(10), 8);
}
