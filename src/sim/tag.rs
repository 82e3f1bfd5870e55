//! Passive tag state: power and protocol state machine data, prebuilt
//! reply frames, session flags and traffic counters.

use rand::Rng;
use rand::rngs::SmallRng;
use std::fmt;

use crate::des::EventId;
use crate::gen2::commands::ReaderFrame;
use crate::gen2::replies::{Reply, TagFrame, TagPreamble};
use crate::gen2::symbols::{self, InventoryFlag, Session};
use crate::geometry::Vec3;
use crate::sim::config::{ReaderConfig, TagConfig};

/// Power and inventory state of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagState {
    Off,
    Ready,
    Arbitrate,
    Reply,
    Acknowledged,
}

impl fmt::Display for TagState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TagState::Off => write!(f, "OFF"),
            TagState::Ready => write!(f, "READY"),
            TagState::Arbitrate => write!(f, "ARBITRATE"),
            TagState::Reply => write!(f, "REPLY"),
            TagState::Acknowledged => write!(f, "ACKNOWLEDGED"),
        }
    }
}

/// The four reply frames, built once so handlers only clone them.
#[derive(Debug, Clone)]
pub struct ReplySet {
    pub rn16: TagFrame,
    pub epcid: TagFrame,
    pub handle: TagFrame,
    pub data: TagFrame,
}

/// A random hexadecimal identifier of `n` digits.
pub fn rand_hex_string(rng: &mut SmallRng, n: usize) -> String {
    const DIGITS: &[u8] = b"0123456789ABCDEF";
    (0..n).map(|_| DIGITS[rng.gen_range(0..16)] as char).collect()
}

#[derive(Debug)]
pub struct Tag {
    // Placement and RF characteristics.
    pub position: Vec3,
    pub sensitivity: f64,
    pub modulation_loss: f64,
    pub epcid_wordcnt: usize,
    pub data_wordcnt: usize,
    pub switch_target: bool,

    // Derived at construction from the reader's link parameters.
    pub epc: String,
    pub data: String,
    pub t1: f64,
    pub num_slots: u32,
    pub replies: ReplySet,

    // Protocol state.
    pub state: TagState,
    /// Slot counter, decremented modulo 2^16 by QueryRep.
    pub counter: u32,
    /// Inventoried flag per session, reset to A on power-up.
    pub session_flags: [InventoryFlag; 4],
    /// Session of the round the tag last joined; selects the flag that
    /// `switch_target` inverts.
    pub round_session: Session,

    // Front-end state.
    pub tx_frame: Option<TagFrame>,
    pub rx_frame: Option<ReaderFrame>,
    pub rx_ends_at: f64,
    pub tx_ends_at: f64,

    // Pending event handles.
    pub tx_start_event: Option<EventId>,
    pub tx_end_event: Option<EventId>,
    pub rx_end_event: Option<EventId>,

    // Traffic counters.
    pub num_epcid_sent: u32,
    pub num_epcid_received: u32,
    pub num_data_sent: u32,
    pub num_data_received: u32,
}

impl Tag {
    pub fn new(config: &TagConfig, reader_config: &ReaderConfig, rng: &mut SmallRng) -> Self {
        let epc = match &config.epc {
            Some(epc) => epc.to_uppercase(),
            None => rand_hex_string(rng, config.epcid_wordcnt * 4),
        };
        let data = rand_hex_string(rng, reader_config.wordcnt * 4);

        let blf = symbols::blf(reader_config.dr, reader_config.trcal);
        let t1 = symbols::nominal_t1(reader_config.rtcal, blf);
        let num_slots = 1u32 << reader_config.q;

        let preamble = TagPreamble::new(reader_config.m, reader_config.trext, blf);
        let replies = ReplySet {
            rn16: TagFrame::new(preamble, Reply::rn16()),
            epcid: TagFrame::new(preamble, Reply::epc(epc.clone())),
            handle: TagFrame::new(preamble, Reply::handle()),
            data: TagFrame::new(preamble, Reply::data(data.clone())),
        };

        Tag {
            position: config.position,
            sensitivity: config.sensitivity,
            modulation_loss: config.modulation_loss,
            epcid_wordcnt: config.epcid_wordcnt,
            data_wordcnt: reader_config.wordcnt,
            switch_target: config.switch_target,
            epc,
            data,
            t1,
            num_slots,
            replies,
            state: TagState::Off,
            counter: 0xFFFF,
            session_flags: [InventoryFlag::A; 4],
            round_session: Session::S0,
            tx_frame: None,
            rx_frame: None,
            rx_ends_at: 0.0,
            tx_ends_at: 0.0,
            tx_start_event: None,
            tx_end_event: None,
            rx_end_event: None,
            num_epcid_sent: 0,
            num_epcid_received: 0,
            num_data_sent: 0,
            num_data_received: 0,
        }
    }

    pub fn powered(&self) -> bool {
        self.state != TagState::Off
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen2::symbols::{DivideRatio, Sel, TagEncoding};
    use rand::SeedableRng;

    fn reader_config() -> ReaderConfig {
        ReaderConfig {
            position: Vec3::new(0.0, 0.0, 10.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            q: 2,
            m: TagEncoding::Fm0,
            sel: Sel::All,
            trext: false,
            dr: DivideRatio::Dr8,
            tari: 6.25e-6,
            rtcal: 15.0e-6,
            trcal: 20.0e-6,
            session: Session::S0,
            target: InventoryFlag::A,
            wordcnt: 4,
            tx_power: 31.5,
            circulator_noise: -80.0,
            record_read_timestamps: false,
        }
    }

    fn tag_config() -> TagConfig {
        TagConfig {
            position: Vec3::ZERO,
            sensitivity: -18.0,
            epcid_wordcnt: 6,
            modulation_loss: -10.0,
            epc: None,
            switch_target: false,
        }
    }

    #[test]
    fn derived_payloads_and_timing() {
        let mut rng = SmallRng::seed_from_u64(7);
        let tag = Tag::new(&tag_config(), &reader_config(), &mut rng);

        assert_eq!(tag.epc.len(), 24);
        assert!(tag.epc.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(tag.data.len(), 16);
        assert_eq!(tag.num_slots, 4);
        assert_eq!(tag.state, TagState::Off);
        assert_eq!(tag.counter, 0xFFFF);
        assert_eq!(tag.session_flags, [InventoryFlag::A; 4]);

        // 400 kHz link: T1 = max(15 us, 25 us).
        assert!((tag.t1 - 25.0e-6).abs() < 1e-12);

        // Reply frames embed the generated payloads.
        assert_eq!(tag.replies.epcid.reply_bitlen(), 16 + 24 * 4 + 16);
        assert_eq!(tag.replies.data.reply_bitlen(), 1 + 16 * 4 + 32);
    }

    #[test]
    fn explicit_epc_is_respected() {
        let mut rng = SmallRng::seed_from_u64(7);
        let mut config = tag_config();
        config.epc = Some("a5".repeat(12));
        let tag = Tag::new(&config, &reader_config(), &mut rng);
        assert_eq!(tag.epc, "A5".repeat(12));
    }

    #[test]
    fn seeded_generation_is_deterministic() {
        let mut rng_a = SmallRng::seed_from_u64(123);
        let mut rng_b = SmallRng::seed_from_u64(123);
        let a = Tag::new(&tag_config(), &reader_config(), &mut rng_a);
        let b = Tag::new(&tag_config(), &reader_config(), &mut rng_b);
        assert_eq!(a.epc, b.epc);
        assert_eq!(a.data, b.data);
    }
}
