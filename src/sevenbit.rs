/*!
The `sevenbit` module packs arbitrary 8-bit payloads into the 7-bit bytes that
a SysEx body may carry, and unpacks them again.

Input bytes are processed in groups of seven. Each group emits a header byte
whose bit `6 - k` holds the high bit of input byte `k`, followed by the seven
low-7-bit values in order. The final group is short when the input length is
not a multiple of seven: header bits for absent inputs are zero and only the
present low bytes are emitted.
!*/

/// The number of bytes `encode` produces for an input of `len` bytes:
/// `len + ⌈len/7⌉`.
pub fn encoded_len(len: usize) -> usize {
    len + (len + 6) / 7
}

/// The number of bytes `decode` produces for an input of `len` bytes:
/// `len - ⌈len/8⌉`.
pub fn decoded_len(len: usize) -> usize {
    len - (len + 7) / 8
}

/// Packs `src` into 7-bit bytes.
pub fn encode(src: &[u8]) -> Vec<u8> {
    let mut dst = vec![0u8; encoded_len(src.len())];
    let mut i = 0;
    let mut j = 0;
    while j < src.len() {
        let mut accum = 0u8;
        for k in 0..7 {
            accum <<= 1;
            if j + k < src.len() {
                if src[j + k] & 0x80 != 0 {
                    accum |= 1;
                }
                dst[i + k + 1] = src[j + k] & 0x7f;
            }
        }
        dst[i] = accum;
        i += 8;
        j += 7;
    }
    dst
}

/// Unpacks 7-bit bytes produced by [`encode`] back into the original payload.
pub fn decode(src: &[u8]) -> Vec<u8> {
    let mut dst = vec![0u8; decoded_len(src.len())];
    let mut i = 0;
    let mut j = 0;
    while i < src.len() {
        let mut shift = 0x40u8;
        let mut k = 0;
        while k < 7 && i + k + 1 < src.len() {
            dst[j + k] = src[i + k + 1] | if src[i] & shift != 0 { 0x80 } else { 0 };
            shift >>= 1;
            k += 1;
        }
        i += 8;
        j += 7;
    }
    dst
}
