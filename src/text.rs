/*!
The `text` module transcodes path and name strings between the host's UTF-8
and the CP1252 encoding the devices use on the wire. A string that cannot be
represented in CP1252 fails the operation with an invalid-argument error; a
received name always decodes, since every byte is defined in the WHATWG
windows-1252 mapping.
!*/

use crate::error::LibResult;
use encoding_rs::WINDOWS_1252;

/// Encodes a host string for the wire.
pub(crate) fn to_cp1252(s: &str) -> LibResult<Vec<u8>> {
    let (bytes, _, had_errors) = WINDOWS_1252.encode(s);
    if had_errors {
        inval!("'{}' cannot be encoded as CP1252", s);
    }
    Ok(bytes.into_owned())
}

/// Decodes a wire string for the host.
pub(crate) fn from_cp1252(bytes: &[u8]) -> String {
    let (s, _, _) = WINDOWS_1252.decode(bytes);
    s.into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn ascii_round_trip() {
        let encoded = to_cp1252("kick 01").unwrap();
        assert_eq!(encoded, b"kick 01");
        assert_eq!(from_cp1252(&encoded), "kick 01");
    }

    #[test]
    fn latin_round_trip() {
        let encoded = to_cp1252("café").unwrap();
        assert_eq!(encoded, b"caf\xe9");
        assert_eq!(from_cp1252(&encoded), "café");
    }

    #[test]
    fn unmappable_is_invalid_argument() {
        let err = to_cp1252("雪").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArg);
    }
}
