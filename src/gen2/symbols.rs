//! Symbolic Gen2 command fields, bit-level encoders and link timing.
//!
//! All encoders produce big-endian bit strings ('0'/'1' characters), which
//! keeps frame assembly and the duration math (count of data-0 vs data-1
//! symbols) trivial to follow. Timing helpers implement the T1..T4 bounds
//! from the Gen2 link timing table.

use serde::Deserialize;
use std::fmt;

/// Frequency tolerance used to bound T1.
pub const FRT: f64 = 0.1;

/// Divide ratio relating TRcal to the backscatter link frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum DivideRatio {
    #[serde(rename = "8")]
    Dr8,
    #[serde(rename = "64/3")]
    Dr64_3,
}

impl DivideRatio {
    pub fn ratio(self) -> f64 {
        match self {
            DivideRatio::Dr8 => 8.0,
            DivideRatio::Dr64_3 => 64.0 / 3.0,
        }
    }

    pub fn encode(self) -> &'static str {
        match self {
            DivideRatio::Dr8 => "0",
            DivideRatio::Dr64_3 => "1",
        }
    }
}

impl fmt::Display for DivideRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DivideRatio::Dr8 => write!(f, "8"),
            DivideRatio::Dr64_3 => write!(f, "64/3"),
        }
    }
}

/// Tag-to-reader encoding factor M.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum TagEncoding {
    #[serde(rename = "FM0")]
    Fm0 = 1,
    M2 = 2,
    M4 = 4,
    M8 = 8,
}

impl TagEncoding {
    /// Symbols transmitted per data bit.
    pub fn symbols_per_bit(self) -> u32 {
        self as u32
    }

    pub fn encode(self) -> &'static str {
        match self {
            TagEncoding::Fm0 => "00",
            TagEncoding::M2 => "01",
            TagEncoding::M4 => "10",
            TagEncoding::M8 => "11",
        }
    }
}

impl fmt::Display for TagEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagEncoding::Fm0 => write!(f, "FM0"),
            TagEncoding::M2 => write!(f, "M2"),
            TagEncoding::M4 => write!(f, "M4"),
            TagEncoding::M8 => write!(f, "M8"),
        }
    }
}

/// Sel field of a Query: which selected-flag population is addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Sel {
    All,
    No,
    Yes,
}

impl Sel {
    pub fn encode(self) -> &'static str {
        match self {
            Sel::All => "00",
            Sel::No => "10",
            Sel::Yes => "11",
        }
    }
}

impl fmt::Display for Sel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sel::All => write!(f, "ALL"),
            Sel::No => write!(f, "NO"),
            Sel::Yes => write!(f, "YES"),
        }
    }
}

/// Inventory session S0..S3. Each session owns an independent inventoried
/// flag on the tag side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Session {
    S0 = 0,
    S1 = 1,
    S2 = 2,
    S3 = 3,
}

impl Session {
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn encode(self) -> &'static str {
        match self {
            Session::S0 => "00",
            Session::S1 => "01",
            Session::S2 => "10",
            Session::S3 => "11",
        }
    }
}

impl fmt::Display for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.index())
    }
}

/// Inventoried flag value, the A/B side of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum InventoryFlag {
    A,
    B,
}

impl InventoryFlag {
    pub fn invert(self) -> InventoryFlag {
        match self {
            InventoryFlag::A => InventoryFlag::B,
            InventoryFlag::B => InventoryFlag::A,
        }
    }

    pub fn encode(self) -> &'static str {
        match self {
            InventoryFlag::A => "0",
            InventoryFlag::B => "1",
        }
    }
}

impl fmt::Display for InventoryFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InventoryFlag::A => write!(f, "A"),
            InventoryFlag::B => write!(f, "B"),
        }
    }
}

/// Tag memory bank addressed by a Read command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryBank {
    Reserved = 0,
    Epc = 1,
    Tid = 2,
    User = 3,
}

impl MemoryBank {
    pub fn encode(self) -> &'static str {
        match self {
            MemoryBank::Reserved => "00",
            MemoryBank::Epc => "01",
            MemoryBank::Tid => "10",
            MemoryBank::User => "11",
        }
    }
}

impl fmt::Display for MemoryBank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryBank::Reserved => write!(f, "RESERVED"),
            MemoryBank::Epc => write!(f, "EPC"),
            MemoryBank::Tid => write!(f, "TID"),
            MemoryBank::User => write!(f, "USER"),
        }
    }
}

/// Encode an integer as a fixed-width big-endian bit string. Values wider
/// than `width` keep all their significant bits.
pub fn encode_bits(value: u32, width: usize) -> String {
    format!("{value:0width$b}")
}

/// Encode an integer as an Extensible Bit Vector: 7 data bits per block,
/// the leading bit of each block flags continuation (0 on the last block).
pub fn encode_ebv(value: u32) -> String {
    fn block(value: u32, first: bool) -> String {
        let prefix = if first { "0" } else { "1" };
        if value < 128 {
            format!("{prefix}{:07b}", value)
        } else {
            format!("{}{}", block(value >> 7, false), block(value % 128, first))
        }
    }
    block(value, true)
}

/// Decode an EBV from the head of `bits`. Returns the value and the number
/// of bits consumed.
pub fn decode_ebv(bits: &str) -> Option<(u32, usize)> {
    let bytes = bits.as_bytes();
    let mut value: u32 = 0;
    let mut consumed = 0;
    loop {
        if bytes.len() < consumed + 8 {
            return None;
        }
        let block = &bits[consumed..consumed + 8];
        let payload = u32::from_str_radix(&block[1..], 2).ok()?;
        value = (value << 7) | payload;
        consumed += 8;
        if block.as_bytes()[0] == b'0' {
            return Some((value, consumed));
        }
    }
}

/// Encode a hexadecimal string as bits, four per digit.
///
/// Panics on a non-hexadecimal character; payloads are validated at
/// configuration time.
pub fn encode_hex(hex: &str) -> String {
    hex.chars()
        .map(|c| {
            let digit = c.to_digit(16).unwrap_or_else(|| panic!("invalid hex digit '{c}' in payload"));
            encode_bits(digit, 4)
        })
        .collect()
}

/// Backscatter link frequency derived from the divide ratio and TRcal.
pub fn blf(dr: DivideRatio, trcal: f64) -> f64 {
    dr.ratio() / trcal
}

/// Nominal T1: time from interrogator transmission to tag response.
pub fn nominal_t1(rtcal: f64, blf: f64) -> f64 {
    rtcal.max(10.0 / blf)
}

pub fn min_t1(rtcal: f64, blf: f64) -> f64 {
    nominal_t1(rtcal, blf) * (1.0 - FRT) - 2e-6
}

pub fn max_t1(rtcal: f64, blf: f64) -> f64 {
    nominal_t1(rtcal, blf) * (1.0 + FRT) + 2e-6
}

/// Minimum T2: time from tag response to the next interrogator command.
pub fn min_t2(blf: f64) -> f64 {
    3.0 / blf
}

pub fn max_t2(blf: f64) -> f64 {
    20.0 / blf
}

/// T3: extra wait after T1 before the interrogator issues another command.
pub fn t3() -> f64 {
    0.0
}

/// T4: minimum gap between interrogator select-type commands.
pub fn t4(rtcal: f64) -> f64 {
    2.0 * rtcal
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_encodings() {
        assert_eq!(DivideRatio::Dr8.encode(), "0");
        assert_eq!(DivideRatio::Dr64_3.encode(), "1");
        assert_eq!(TagEncoding::Fm0.encode(), "00");
        assert_eq!(TagEncoding::M2.encode(), "01");
        assert_eq!(TagEncoding::M8.encode(), "11");
        assert_eq!(Sel::All.encode(), "00");
        assert_eq!(Sel::No.encode(), "10");
        assert_eq!(Session::S2.encode(), "10");
        assert_eq!(InventoryFlag::B.encode(), "1");
        assert_eq!(MemoryBank::User.encode(), "11");
    }

    #[test]
    fn fixed_width_bits() {
        assert_eq!(encode_bits(0, 5), "00000");
        assert_eq!(encode_bits(4, 4), "0100");
        assert_eq!(encode_bits(0xAAAA, 16), "1010101010101010");
    }

    #[test]
    fn ebv_single_and_multi_block() {
        assert_eq!(encode_ebv(0), "00000000");
        assert_eq!(encode_ebv(127), "01111111");
        // 128 = 1 << 7: continuation block then terminal block
        assert_eq!(encode_ebv(128), "1000000100000000");
        assert_eq!(decode_ebv(&encode_ebv(0)), Some((0, 8)));
        assert_eq!(decode_ebv(&encode_ebv(127)), Some((127, 8)));
        assert_eq!(decode_ebv(&encode_ebv(128)), Some((128, 16)));
        assert_eq!(decode_ebv(&encode_ebv(300)), Some((300, 16)));
        assert_eq!(decode_ebv("1000000"), None); // truncated
    }

    #[test]
    fn hex_payload_bits() {
        assert_eq!(encode_hex("A5"), "10100101");
        assert_eq!(encode_hex("0F"), "00001111");
        assert_eq!(encode_hex("ABCD").len(), 16);
    }

    #[test]
    fn link_timing() {
        let blf = blf(DivideRatio::Dr8, 20.0e-6); // 400 kHz
        assert!((blf - 400_000.0).abs() < 1e-6);

        let rtcal = 15.0e-6;
        let t1 = nominal_t1(rtcal, blf);
        // 10 / 400kHz = 25 us dominates RTcal = 15 us
        assert!((t1 - 25.0e-6).abs() < 1e-12);
        assert!((min_t1(rtcal, blf) - (25.0e-6 * 0.9 - 2e-6)).abs() < 1e-12);
        assert!((max_t1(rtcal, blf) - (25.0e-6 * 1.1 + 2e-6)).abs() < 1e-12);
        assert!((min_t2(blf) - 7.5e-6).abs() < 1e-12);
        assert!((max_t2(blf) - 50.0e-6).abs() < 1e-12);
        assert_eq!(t3(), 0.0);
        assert!((t4(rtcal) - 30.0e-6).abs() < 1e-12);
    }
}
