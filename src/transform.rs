//! Byte transforms
//!
//! Character mappings applied between the local terminal and the device,
//! and the hexadecimal codec used in hex mode. Everything here is pure
//! per-byte logic; the session decides where the results go.
//!
//! Outbound order is fixed: DEL→BS and CR→LF are applied first, then
//! newline expansion, and hex decoding only for bytes that would otherwise
//! be written as they are.

use std::fmt;
use std::str::FromStr;

use crate::error::ConfigError;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const BS: u8 = 0x08;
const DEL: u8 = 0x7f;

/// Mapping flags parsed from a comma separated token list
///
/// `inlcr`, `igncr` and `icrnl` are handed to the device line discipline;
/// the others are applied by the session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Mappings {
    /// Map NL to CR on input (device)
    pub inlcr: bool,
    /// Ignore CR on input (device)
    pub igncr: bool,
    /// Map CR to NL on input (device)
    pub icrnl: bool,
    /// Map CR to NL on output
    pub ocrnl: bool,
    /// Map DEL to BS on output
    pub odelbs: bool,
    /// Map NL to CR-NL on input (display and log only)
    pub inlcrnl: bool,
    /// Map NL and CR to CR-NL on output
    pub onlcrnl: bool,
}

impl FromStr for Mappings {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut mappings = Mappings::default();
        for token in s.split(',').filter(|t| !t.is_empty()) {
            match token {
                "INLCR" => mappings.inlcr = true,
                "IGNCR" => mappings.igncr = true,
                "ICRNL" => mappings.icrnl = true,
                "OCRNL" => mappings.ocrnl = true,
                "ODELBS" => mappings.odelbs = true,
                "INLCRNL" => mappings.inlcrnl = true,
                "ONLCRNL" => mappings.onlcrnl = true,
                other => return Err(ConfigError::UnknownMapping(other.to_string())),
            }
        }
        Ok(mappings)
    }
}

impl fmt::Display for Mappings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags = [
            (self.inlcr, "INLCR"),
            (self.igncr, "IGNCR"),
            (self.icrnl, "ICRNL"),
            (self.ocrnl, "OCRNL"),
            (self.odelbs, "ODELBS"),
            (self.inlcrnl, "INLCRNL"),
            (self.onlcrnl, "ONLCRNL"),
        ];
        let names: Vec<&str> = flags.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect();
        f.write_str(&names.join(","))
    }
}

/// What an outbound byte turns into after mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outbound {
    /// A single byte, subject to hex decoding in hex mode
    Byte(u8),
    /// The two-byte sequence CR LF, always written as is
    CrLf,
}

impl Mappings {
    /// Apply the output mappings to a byte headed for the device
    pub fn map_outbound(&self, byte: u8) -> Outbound {
        let mut byte = byte;
        if byte == DEL && self.odelbs {
            byte = BS;
        }
        if byte == CR && self.ocrnl {
            byte = LF;
        }
        if (byte == LF || byte == CR) && self.onlcrnl {
            Outbound::CrLf
        } else {
            Outbound::Byte(byte)
        }
    }

    /// Apply the input mappings to a received byte for display and logging
    ///
    /// The returned slice is what the display sees; the device stream itself
    /// is never rewritten.
    pub fn map_inbound<'a>(&self, byte: &'a u8) -> &'a [u8] {
        if *byte == LF && self.inlcrnl {
            b"\r\n"
        } else {
            std::slice::from_ref(byte)
        }
    }
}

fn nibble(byte: u8) -> Option<u8> {
    match byte {
        b'0'..=b'9' => Some(byte - b'0'),
        b'a'..=b'f' => Some(byte - b'a' + 10),
        b'A'..=b'F' => Some(byte - b'A' + 10),
        _ => None,
    }
}

/// Render a byte as two uppercase hex digits followed by a space
pub fn encode_hex(byte: u8) -> [u8; 3] {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    [DIGITS[(byte >> 4) as usize], DIGITS[(byte & 0x0f) as usize], b' ']
}

/// A character that cannot be part of a hex pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Invalid hex character: '{0}' (0x{0:02x})")]
pub struct InvalidHex(pub u8);

/// Accumulates pairs of hex digits into bytes
///
/// A partial pair survives across reads but is thrown away on an invalid
/// character or a reset, so half a byte is never transmitted.
#[derive(Debug, Clone, Default)]
pub struct HexDecoder {
    high: u8,
    index: u8,
}

impl HexDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one character, returning a byte once a pair is complete
    pub fn push(&mut self, byte: u8) -> Result<Option<u8>, InvalidHex> {
        let Some(value) = nibble(byte) else {
            self.reset();
            return Err(InvalidHex(byte));
        };

        if self.index == 0 {
            self.high = value;
            self.index = 1;
            Ok(None)
        } else {
            let byte = self.high << 4 | value;
            self.reset();
            Ok(Some(byte))
        }
    }

    /// Discard a pending half pair
    pub fn reset(&mut self) {
        self.high = 0;
        self.index = 0;
    }

    /// Whether a half pair is waiting for its second digit
    pub fn is_pending(&self) -> bool {
        self.index != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_parse_mappings() {
        let m: Mappings = "ONLCRNL,ODELBS".parse().unwrap();
        assert!(m.onlcrnl);
        assert!(m.odelbs);
        assert!(!m.ocrnl);
        assert_eq!(m.to_string(), "ODELBS,ONLCRNL");

        assert_eq!("".parse::<Mappings>().unwrap(), Mappings::default());
    }

    #[test]
    fn test_parse_mappings_unknown_token() {
        let err = "INLCR,ONLRET".parse::<Mappings>().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownMapping(ref t) if t == "ONLRET"));
        // Tokens are case sensitive
        assert!("inlcr".parse::<Mappings>().is_err());
    }

    #[test]
    fn test_outbound_order() {
        let m = Mappings {
            ocrnl: true,
            odelbs: true,
            ..Default::default()
        };
        assert_eq!(m.map_outbound(DEL), Outbound::Byte(BS));
        assert_eq!(m.map_outbound(CR), Outbound::Byte(LF));
        assert_eq!(m.map_outbound(b'a'), Outbound::Byte(b'a'));

        // CR is turned into LF before newline expansion sees it
        let m = Mappings {
            ocrnl: true,
            onlcrnl: true,
            ..Default::default()
        };
        assert_eq!(m.map_outbound(CR), Outbound::CrLf);
        assert_eq!(m.map_outbound(LF), Outbound::CrLf);
    }

    #[test]
    fn test_no_mappings_is_identity() {
        let m = Mappings::default();
        for byte in 0..=255u8 {
            assert_eq!(m.map_outbound(byte), Outbound::Byte(byte));
            assert_eq!(m.map_inbound(&byte), &[byte]);
        }
    }

    #[test]
    fn test_inbound_lf_expansion() {
        let m = Mappings {
            inlcrnl: true,
            ..Default::default()
        };
        assert_eq!(m.map_inbound(&LF), b"\r\n");
        assert_eq!(m.map_inbound(&CR), b"\r");
    }

    #[test]
    fn test_encode_hex() {
        assert_eq!(&encode_hex(0xab), b"AB ");
        assert_eq!(&encode_hex(0x05), b"05 ");
    }

    #[test]
    fn test_hex_decode_pair() {
        let mut dec = HexDecoder::new();
        assert_eq!(dec.push(b'A'), Ok(None));
        assert!(dec.is_pending());
        assert_eq!(dec.push(b'B'), Ok(Some(0xab)));
        assert!(!dec.is_pending());

        assert_eq!(dec.push(b'0'), Ok(None));
        assert_eq!(dec.push(b'f'), Ok(Some(0x0f)));
    }

    #[test]
    fn test_hex_decode_invalid_resets() {
        let mut dec = HexDecoder::new();
        assert_eq!(dec.push(b'A'), Ok(None));
        assert_eq!(dec.push(b'!'), Err(InvalidHex(b'!')));
        assert!(!dec.is_pending());

        // The next pair starts fresh
        assert_eq!(dec.push(b'1'), Ok(None));
        assert_eq!(dec.push(b'2'), Ok(Some(0x12)));
    }

    proptest! {
        #[test]
        fn prop_hex_roundtrip(byte in any::<u8>()) {
            let encoded = encode_hex(byte);
            let mut dec = HexDecoder::new();
            prop_assert_eq!(dec.push(encoded[0]), Ok(None));
            prop_assert_eq!(dec.push(encoded[1]), Ok(Some(byte)));
        }

        #[test]
        fn prop_non_hex_never_emits(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
            let mut dec = HexDecoder::new();
            for byte in bytes {
                let result = dec.push(byte);
                if !byte.is_ascii_hexdigit() {
                    prop_assert_eq!(result, Err(InvalidHex(byte)));
                    prop_assert!(!dec.is_pending());
                }
            }
        }
    }
}
