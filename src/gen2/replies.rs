//! Tag replies, backscatter preambles and on-air tag frames.
//!
//! A tag frame is the backscatter preamble (selected by the M encoding and
//! the TRext flag), the reply payload bits and a trailing end-of-signaling
//! symbol. Every symbol lasts M periods of the backscatter link frequency.

use std::fmt;

use super::symbols::{TagEncoding, encode_bits, encode_hex};

/// The four tag replies of the inventory and access sequence.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Rn16 { rn: u16 },
    Epc { pc: u16, epc: String, crc16: u16 },
    Handle { rn: u16, crc16: u16 },
    Data { header: u8, words: String, rn: u16, crc16: u16 },
}

impl Reply {
    pub fn rn16() -> Reply {
        Reply::Rn16 { rn: 0xAAAA }
    }

    /// EPC reply with the default zero PC and CRC fields. `epc` is the tag
    /// identifier as a hexadecimal string.
    pub fn epc(epc: String) -> Reply {
        Reply::Epc { pc: 0x0000, epc, crc16: 0x0000 }
    }

    pub fn handle() -> Reply {
        Reply::Handle { rn: 0xAAAA, crc16: 0x0000 }
    }

    /// Data reply carrying the hexadecimal `words` read from user memory.
    pub fn data(words: String) -> Reply {
        Reply::Data { header: 0, words, rn: 0, crc16: 0 }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Reply::Rn16 { .. } => "RN16",
            Reply::Epc { .. } => "EPCID",
            Reply::Handle { .. } => "HANDLE",
            Reply::Data { .. } => "DATA",
        }
    }

    /// Encode the reply payload to its bit string.
    pub fn encode(&self) -> String {
        match self {
            Reply::Rn16 { rn } => encode_bits(*rn as u32, 16),
            Reply::Epc { pc, epc, crc16 } => {
                let mut bits = encode_bits(*pc as u32, 16);
                bits.push_str(&encode_hex(epc));
                bits.push_str(&encode_bits(*crc16 as u32, 16));
                bits
            }
            Reply::Handle { rn, crc16 } => {
                let mut bits = encode_bits(*rn as u32, 16);
                bits.push_str(&encode_bits(*crc16 as u32, 16));
                bits
            }
            Reply::Data { header, words, rn, crc16 } => {
                let mut bits = encode_bits(*header as u32, 1);
                bits.push_str(&encode_hex(words));
                bits.push_str(&encode_bits(*rn as u32, 16));
                bits.push_str(&encode_bits(*crc16 as u32, 16));
                bits
            }
        }
    }

    /// Payload length in bits.
    pub fn bitlen(&self) -> usize {
        match self {
            Reply::Rn16 { .. } => 16,
            Reply::Epc { epc, .. } => 16 + epc.len() * 4 + 16,
            Reply::Handle { .. } => 32,
            Reply::Data { words, .. } => 1 + words.len() * 4 + 32,
        }
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reply::Rn16 { rn } => write!(f, "RN16[RN:{rn:04X}]"),
            Reply::Epc { pc, epc, crc16 } => write!(f, "EPCID[PC:{pc:04X} EPC:{epc} CRC:{crc16:04X}]"),
            Reply::Handle { rn, crc16 } => write!(f, "HANDLE[RN:{rn:04X} CRC:{crc16:04X}]"),
            Reply::Data { header, words, rn, crc16 } => {
                write!(f, "DATA[H:{header:01X} Words:{words} RN:{rn:04X} CRC:{crc16:04X}]")
            }
        }
    }
}

/// Backscatter preamble. The bit pattern depends on the M encoding and the
/// TRext (pilot tone) flag; 'v' marks the FM0 violation bit.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TagPreamble {
    m: TagEncoding,
    trext: bool,
    blf: f64,
    bits: &'static str,
}

impl TagPreamble {
    pub fn new(m: TagEncoding, trext: bool, blf: f64) -> Self {
        let bits = match (m, trext) {
            (TagEncoding::Fm0, false) => "1010v1",
            (TagEncoding::Fm0, true) => "0000000000001010v1",
            (_, true) => "0000000000000000010111",
            (_, false) => "0000010111",
        };
        TagPreamble { m, trext, blf, bits }
    }

    pub fn m(&self) -> TagEncoding {
        self.m
    }

    pub fn trext(&self) -> bool {
        self.trext
    }

    pub fn blf(&self) -> f64 {
        self.blf
    }

    pub fn encoded(&self) -> &'static str {
        self.bits
    }

    pub fn bitlen(&self) -> usize {
        self.bits.len()
    }

    pub fn duration(&self) -> f64 {
        self.bitlen() as f64 * (self.m.symbols_per_bit() as f64 / self.blf)
    }
}

impl fmt::Display for TagPreamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits)
    }
}

/// A reply with its preamble and end-of-signaling bit, encoded once.
#[derive(Debug, Clone, PartialEq)]
pub struct TagFrame {
    preamble: TagPreamble,
    reply: Reply,
    encoded: String,
    reply_bitlen: usize,
    duration: f64,
}

impl TagFrame {
    pub fn new(preamble: TagPreamble, reply: Reply) -> Self {
        let encoded = format!("{}{}e", preamble.encoded(), reply.encode());
        let reply_bitlen = reply.bitlen();
        let bit_time = preamble.m().symbols_per_bit() as f64 / preamble.blf();
        let duration = encoded.len() as f64 * bit_time;
        TagFrame { preamble, reply, encoded, reply_bitlen, duration }
    }

    pub fn preamble(&self) -> &TagPreamble {
        &self.preamble
    }

    pub fn reply(&self) -> &Reply {
        &self.reply
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    /// Length of the reply payload alone, the part exposed to bit errors.
    pub fn reply_bitlen(&self) -> usize {
        self.reply_bitlen
    }

    /// Total frame length: preamble, payload and the end-of-signaling bit.
    pub fn bitlen(&self) -> usize {
        self.encoded.len()
    }

    /// On-air duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }
}

impl fmt::Display for TagFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagFrame{{P:{}; R:{}}}", self.preamble, self.reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLF: f64 = 400_000.0;

    #[test]
    fn reply_bit_lengths() {
        assert_eq!(Reply::rn16().bitlen(), 16);
        assert_eq!(Reply::handle().bitlen(), 32);
        // 6 words of EPC: 16 (PC) + 96 + 16 (CRC)
        let epc = Reply::epc("A5".repeat(12));
        assert_eq!(epc.bitlen(), 128);
        assert_eq!(epc.encode().len(), 128);
        // 4 words of data: 1 (header) + 64 + 32 (RN + CRC)
        let data = Reply::data("ABCD".repeat(4));
        assert_eq!(data.bitlen(), 97);
        assert_eq!(data.encode().len(), 97);
    }

    #[test]
    fn preamble_patterns() {
        assert_eq!(TagPreamble::new(TagEncoding::Fm0, false, BLF).encoded(), "1010v1");
        assert_eq!(TagPreamble::new(TagEncoding::Fm0, true, BLF).encoded(), "0000000000001010v1");
        assert_eq!(TagPreamble::new(TagEncoding::M2, false, BLF).encoded(), "0000010111");
        assert_eq!(
            TagPreamble::new(TagEncoding::M4, true, BLF).encoded(),
            "0000000000000000010111"
        );
    }

    #[test]
    fn frame_duration_scales_with_m() {
        let rn16 = Reply::rn16();
        let fm0 = TagFrame::new(TagPreamble::new(TagEncoding::Fm0, false, BLF), rn16.clone());
        // preamble 6 + payload 16 + end bit
        assert_eq!(fm0.bitlen(), 23);
        assert!((fm0.duration() - 23.0 / BLF).abs() < 1e-15);

        let m2 = TagFrame::new(TagPreamble::new(TagEncoding::M2, false, BLF), rn16);
        // preamble 10 + payload 16 + end bit, two symbols per bit
        assert_eq!(m2.bitlen(), 27);
        assert!((m2.duration() - 27.0 * 2.0 / BLF).abs() < 1e-15);
    }

    #[test]
    fn reply_bitlen_excludes_preamble() {
        let frame = TagFrame::new(
            TagPreamble::new(TagEncoding::Fm0, false, BLF),
            Reply::epc("A5".repeat(12)),
        );
        assert_eq!(frame.reply_bitlen(), 128);
        assert_eq!(frame.bitlen(), 6 + 128 + 1);
    }
}
