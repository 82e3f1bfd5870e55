//! Interrogator commands, preambles and on-air reader frames.
//!
//! A reader frame is a preamble (SYNC, or the full preamble with TRcal for
//! Query) followed by a pulse-interval-encoded command. Frame durations
//! depend on the bit mix: a data-0 lasts one Tari, a data-1 lasts
//! RTcal - Tari.

use std::fmt;

use super::symbols::{
    DivideRatio, InventoryFlag, MemoryBank, Sel, Session, TagEncoding, decode_ebv, encode_bits,
    encode_ebv,
};

/// Delimiter that starts every reader preamble.
pub const DELIM: f64 = 12.5e-6;

/// Pulse-interval-encoding preamble prepended to every reader command.
/// `trcal` is present only on the full preamble used with Query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReaderPreamble {
    delim: f64,
    tari: f64,
    rtcal: f64,
    trcal: Option<f64>,
}

impl ReaderPreamble {
    /// SYNC preamble: delimiter, Tari, RTcal.
    pub fn sync(tari: f64, rtcal: f64) -> Self {
        ReaderPreamble { delim: DELIM, tari, rtcal, trcal: None }
    }

    /// Full preamble: delimiter, Tari, RTcal, TRcal. Required for Query.
    pub fn full(tari: f64, rtcal: f64, trcal: f64) -> Self {
        ReaderPreamble { delim: DELIM, tari, rtcal, trcal: Some(trcal) }
    }

    pub fn tari(&self) -> f64 {
        self.tari
    }

    pub fn rtcal(&self) -> f64 {
        self.rtcal
    }

    pub fn trcal(&self) -> Option<f64> {
        self.trcal
    }

    /// Duration of a data-0 symbol.
    pub fn data0(&self) -> f64 {
        self.tari
    }

    /// Duration of a data-1 symbol.
    pub fn data1(&self) -> f64 {
        self.rtcal - self.tari
    }

    pub fn duration(&self) -> f64 {
        self.delim + self.tari + self.rtcal + self.trcal.unwrap_or(0.0)
    }
}

impl fmt::Display for ReaderPreamble {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.trcal {
            Some(trcal) => write!(
                f,
                "PREAMBLE{{delim={:.2}us tari={:.2}us rtcal={:.2}us trcal={:.2}us}}",
                self.delim * 1e6,
                self.tari * 1e6,
                self.rtcal * 1e6,
                trcal * 1e6
            ),
            None => write!(
                f,
                "SYNC{{delim={:.2}us tari={:.2}us rtcal={:.2}us}}",
                self.delim * 1e6,
                self.tari * 1e6,
                self.rtcal * 1e6
            ),
        }
    }
}

/// The five interrogator commands used during an inventory round.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Query {
        dr: DivideRatio,
        m: TagEncoding,
        trext: bool,
        sel: Sel,
        session: Session,
        target: InventoryFlag,
        q: u8,
        crc5: u8,
    },
    QueryRep {
        session: Session,
    },
    Ack {
        rn: u16,
    },
    ReqRn {
        rn: u16,
        crc16: u16,
    },
    Read {
        bank: MemoryBank,
        wordptr: u32,
        wordcnt: u8,
        rn: u16,
        crc16: u16,
    },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Query { .. } => "Query",
            Command::QueryRep { .. } => "QueryRep",
            Command::Ack { .. } => "ACK",
            Command::ReqRn { .. } => "ReqRN",
            Command::Read { .. } => "Read",
        }
    }

    /// Fixed bit prefix identifying the command on air.
    pub fn prefix(&self) -> &'static str {
        match self {
            Command::Query { .. } => "1000",
            Command::QueryRep { .. } => "00",
            Command::Ack { .. } => "01",
            Command::ReqRn { .. } => "11000001",
            Command::Read { .. } => "11000010",
        }
    }

    /// Encode the command to its full on-air bit string, prefix included.
    pub fn encode(&self) -> String {
        let mut bits = String::from(self.prefix());
        match *self {
            Command::Query { dr, m, trext, sel, session, target, q, crc5 } => {
                bits.push_str(dr.encode());
                bits.push_str(m.encode());
                bits.push_str(if trext { "1" } else { "0" });
                bits.push_str(sel.encode());
                bits.push_str(session.encode());
                bits.push_str(target.encode());
                bits.push_str(&encode_bits(q as u32, 4));
                bits.push_str(&encode_bits(crc5 as u32, 5));
            }
            Command::QueryRep { session } => {
                bits.push_str(session.encode());
            }
            Command::Ack { rn } => {
                bits.push_str(&encode_bits(rn as u32, 16));
            }
            Command::ReqRn { rn, crc16 } => {
                bits.push_str(&encode_bits(rn as u32, 16));
                bits.push_str(&encode_bits(crc16 as u32, 16));
            }
            Command::Read { bank, wordptr, wordcnt, rn, crc16 } => {
                bits.push_str(bank.encode());
                bits.push_str(&encode_ebv(wordptr));
                bits.push_str(&encode_bits(wordcnt as u32, 8));
                bits.push_str(&encode_bits(rn as u32, 16));
                bits.push_str(&encode_bits(crc16 as u32, 16));
            }
        }
        bits
    }

    /// Decode a full command bit string back into field values.
    pub fn decode(bits: &str) -> Result<Command, DecodeError> {
        if bits.bytes().any(|b| b != b'0' && b != b'1') {
            return Err(DecodeError::BadDigit);
        }
        // Longest prefixes first so "11000001" is not mistaken for "11...".
        if let Some(body) = bits.strip_prefix("11000001") {
            let mut r = BitReader::new(body);
            let rn = r.take(16)? as u16;
            let crc16 = r.take(16)? as u16;
            r.finish()?;
            return Ok(Command::ReqRn { rn, crc16 });
        }
        if let Some(body) = bits.strip_prefix("11000010") {
            let mut r = BitReader::new(body);
            let bank = match r.take(2)? {
                0 => MemoryBank::Reserved,
                1 => MemoryBank::Epc,
                2 => MemoryBank::Tid,
                _ => MemoryBank::User,
            };
            let wordptr = r.take_ebv()?;
            let wordcnt = r.take(8)? as u8;
            let rn = r.take(16)? as u16;
            let crc16 = r.take(16)? as u16;
            r.finish()?;
            return Ok(Command::Read { bank, wordptr, wordcnt, rn, crc16 });
        }
        if let Some(body) = bits.strip_prefix("1000") {
            let mut r = BitReader::new(body);
            let dr = if r.take(1)? == 0 { DivideRatio::Dr8 } else { DivideRatio::Dr64_3 };
            let m = match r.take(2)? {
                0 => TagEncoding::Fm0,
                1 => TagEncoding::M2,
                2 => TagEncoding::M4,
                _ => TagEncoding::M8,
            };
            let trext = r.take(1)? == 1;
            let sel = match r.take(2)? {
                0 | 1 => Sel::All,
                2 => Sel::No,
                _ => Sel::Yes,
            };
            let session = match r.take(2)? {
                0 => Session::S0,
                1 => Session::S1,
                2 => Session::S2,
                _ => Session::S3,
            };
            let target = if r.take(1)? == 0 { InventoryFlag::A } else { InventoryFlag::B };
            let q = r.take(4)? as u8;
            let crc5 = r.take(5)? as u8;
            r.finish()?;
            return Ok(Command::Query { dr, m, trext, sel, session, target, q, crc5 });
        }
        if let Some(body) = bits.strip_prefix("01") {
            let mut r = BitReader::new(body);
            let rn = r.take(16)? as u16;
            r.finish()?;
            return Ok(Command::Ack { rn });
        }
        if let Some(body) = bits.strip_prefix("00") {
            let mut r = BitReader::new(body);
            let session = match r.take(2)? {
                0 => Session::S0,
                1 => Session::S1,
                2 => Session::S2,
                _ => Session::S3,
            };
            r.finish()?;
            return Ok(Command::QueryRep { session });
        }
        Err(DecodeError::UnknownPrefix)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Command::Query { dr, m, trext, sel, session, target, q, crc5 } => write!(
                f,
                "Query[Q:{q} M:{m} DR:{dr} TRext:{} Session:{session} Sel:{sel} Target:{target} CRC5:{crc5}]",
                if trext { 1 } else { 0 }
            ),
            Command::QueryRep { session } => write!(f, "QueryRep[Session:{session}]"),
            Command::Ack { rn } => write!(f, "ACK[RN:{rn:04X}]"),
            Command::ReqRn { rn, crc16 } => write!(f, "ReqRN[RN:{rn:04X} CRC:{crc16:04X}]"),
            Command::Read { bank, wordptr, wordcnt, rn, crc16 } => write!(
                f,
                "Read[Bank:{bank} WordPtr:{wordptr:X} WordCnt:{wordcnt} RN:{rn:04X} CRC:{crc16:04X}]"
            ),
        }
    }
}

/// Command decoding failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    UnknownPrefix,
    Truncated,
    TrailingBits,
    BadDigit,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::UnknownPrefix => write!(f, "unrecognized command prefix"),
            DecodeError::Truncated => write!(f, "bit string shorter than the command layout"),
            DecodeError::TrailingBits => write!(f, "unconsumed bits after the command"),
            DecodeError::BadDigit => write!(f, "bit string contains characters other than 0/1"),
        }
    }
}

impl std::error::Error for DecodeError {}

struct BitReader<'a> {
    bits: &'a str,
    pos: usize,
}

impl<'a> BitReader<'a> {
    fn new(bits: &'a str) -> Self {
        BitReader { bits, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<u32, DecodeError> {
        if self.pos + n > self.bits.len() {
            return Err(DecodeError::Truncated);
        }
        let slice = &self.bits[self.pos..self.pos + n];
        self.pos += n;
        u32::from_str_radix(slice, 2).map_err(|_| DecodeError::BadDigit)
    }

    fn take_ebv(&mut self) -> Result<u32, DecodeError> {
        let (value, consumed) = decode_ebv(&self.bits[self.pos..]).ok_or(DecodeError::Truncated)?;
        self.pos += consumed;
        Ok(value)
    }

    fn finish(&self) -> Result<(), DecodeError> {
        if self.pos == self.bits.len() { Ok(()) } else { Err(DecodeError::TrailingBits) }
    }
}

/// A command together with its preamble, encoded once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct ReaderFrame {
    preamble: ReaderPreamble,
    command: Command,
    encoded: String,
    duration: f64,
}

impl ReaderFrame {
    pub fn new(preamble: ReaderPreamble, command: Command) -> Self {
        let encoded = command.encode();
        let zeros = encoded.bytes().filter(|&b| b == b'0').count() as f64;
        let ones = encoded.bytes().filter(|&b| b == b'1').count() as f64;
        let duration = preamble.duration() + zeros * preamble.data0() + ones * preamble.data1();
        ReaderFrame { preamble, command, encoded, duration }
    }

    pub fn preamble(&self) -> &ReaderPreamble {
        &self.preamble
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn bitlen(&self) -> usize {
        self.encoded.len()
    }

    /// On-air duration in seconds.
    pub fn duration(&self) -> f64 {
        self.duration
    }
}

impl fmt::Display for ReaderFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame{{P:{}; C:{}}}", self.preamble, self.command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query() -> Command {
        Command::Query {
            dr: DivideRatio::Dr8,
            m: TagEncoding::M2,
            trext: false,
            sel: Sel::All,
            session: Session::S0,
            target: InventoryFlag::A,
            q: 4,
            crc5: 0,
        }
    }

    #[test]
    fn query_body_encoding() {
        let bits = query().encode();
        // DR(1) M(2) TRext(1) Sel(2) Session(2) Target(1) Q(4) CRC5(5)
        assert_eq!(bits, format!("1000{}", "001000000010000000"));
        assert_eq!(bits.len(), 22);
    }

    #[test]
    fn command_prefixes() {
        assert_eq!(query().prefix(), "1000");
        assert_eq!(Command::QueryRep { session: Session::S0 }.prefix(), "00");
        assert_eq!(Command::Ack { rn: 0 }.prefix(), "01");
        assert_eq!(Command::ReqRn { rn: 0, crc16: 0 }.prefix(), "11000001");
        assert_eq!(
            Command::Read { bank: MemoryBank::User, wordptr: 0, wordcnt: 4, rn: 0, crc16: 0 }.prefix(),
            "11000010"
        );
    }

    #[test]
    fn decode_inverts_encode() {
        let commands = vec![
            query(),
            Command::QueryRep { session: Session::S3 },
            Command::Ack { rn: 0xAAAA },
            Command::ReqRn { rn: 0x1234, crc16: 0xBEEF },
            Command::Read { bank: MemoryBank::User, wordptr: 300, wordcnt: 4, rn: 0xAAAA, crc16: 0xAAAA },
        ];
        for cmd in commands {
            let decoded = Command::decode(&cmd.encode()).expect("decode");
            assert_eq!(decoded, cmd);
        }
    }

    #[test]
    fn decode_rejects_garbage() {
        assert_eq!(Command::decode("1111"), Err(DecodeError::UnknownPrefix));
        assert_eq!(Command::decode("0101"), Err(DecodeError::Truncated));
        assert_eq!(Command::decode("10x0"), Err(DecodeError::BadDigit));
        let mut bits = query().encode();
        bits.push('0');
        assert_eq!(Command::decode(&bits), Err(DecodeError::TrailingBits));
    }

    #[test]
    fn frame_duration_counts_bit_mix() {
        let tari = 6.25e-6;
        let rtcal = 15.0e-6;
        let trcal = 20.0e-6;
        let frame = ReaderFrame::new(ReaderPreamble::full(tari, rtcal, trcal), query());
        let zeros = frame.encoded().bytes().filter(|&b| b == b'0').count() as f64;
        let ones = frame.encoded().bytes().filter(|&b| b == b'1').count() as f64;
        let expected = (DELIM + tari + rtcal + trcal) + zeros * tari + ones * (rtcal - tari);
        assert!((frame.duration() - expected).abs() < 1e-15);

        // SYNC preamble is shorter by exactly TRcal for the same command.
        let sync_frame = ReaderFrame::new(ReaderPreamble::sync(tari, rtcal), query());
        assert!((frame.duration() - sync_frame.duration() - trcal).abs() < 1e-15);
    }
}
