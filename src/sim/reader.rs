//! Reader (interrogator) state: inventory parameters, prebuilt command
//! frames, the TX/RX bookkeeping used by the event handlers and the
//! per-round statistics log.

use serde::Serialize;
use std::fmt;

use crate::des::EventId;
use crate::gen2::commands::{Command, ReaderFrame, ReaderPreamble};
use crate::gen2::replies::{Reply, TagFrame};
use crate::gen2::symbols::{self, DivideRatio, InventoryFlag, MemoryBank, Sel, Session, TagEncoding};
use crate::geometry::Vec3;
use crate::sim::config::ReaderConfig;

/// Logical state of the reader front end.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Idle,
    Rx,
    Tx,
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReaderState::Idle => write!(f, "IDLE"),
            ReaderState::Rx => write!(f, "RX"),
            ReaderState::Tx => write!(f, "TX"),
        }
    }
}

/// A single reception operation at the reader. Overlapping operations are
/// collisions and mark each other broken.
#[derive(Debug, Clone)]
pub struct RxOp {
    pub frame: TagFrame,
    pub tag_index: usize,
    pub started_at: f64,
    pub finish_at: f64,
    pub broken: bool,
}

/// The five command frames, built once so handlers only clone them.
#[derive(Debug, Clone)]
pub struct CommandSet {
    pub query: ReaderFrame,
    pub query_rep: ReaderFrame,
    pub ack: ReaderFrame,
    pub req_rn: ReaderFrame,
    pub read: ReaderFrame,
}

/// What the reader does after successfully receiving a reply.
#[derive(Debug, Clone)]
pub enum NextCommand {
    /// The inventory round is exhausted; begin the next one.
    NewRound,
    /// Continue the exchange with this command frame.
    Send(ReaderFrame),
}

/// Statistics of one inventory round.
#[derive(Debug, Clone, Serialize)]
pub struct RoundLog {
    pub index: u32,
    pub t_start: f64,
    pub t_finish: f64,
    pub duration: f64,
    /// Tags powered when the round began.
    pub tags_on: Vec<usize>,
    /// Tags that lost power during the round.
    pub tags_turned_off: Vec<usize>,
    /// Tags whose EPC was received during the round.
    pub tags_read: Vec<usize>,
}

#[derive(Debug)]
pub struct Reader {
    // Inventory parameters.
    pub position: Vec3,
    pub velocity: Vec3,
    pub q: u8,
    pub m: TagEncoding,
    pub sel: Sel,
    pub trext: bool,
    pub dr: DivideRatio,
    pub tari: f64,
    pub rtcal: f64,
    pub trcal: f64,
    pub session: Session,
    pub target: InventoryFlag,
    pub wordcnt: usize,
    pub tx_power: f64,
    pub circulator_noise: f64,

    // Derived once at construction.
    pub blf: f64,
    pub inter_command_interval: f64,
    pub num_slots: u32,
    pub commands: CommandSet,

    // Round state.
    pub state: ReaderState,
    pub slot: u32,
    pub num_rounds: u32,
    pub position_updated_at: f64,

    // Front-end state.
    pub tx_frame: Option<ReaderFrame>,
    pub rxops: Vec<RxOp>,
    pub rx_ends_at: f64,

    // Pending event handles.
    pub end_of_tx_event: Option<EventId>,
    pub end_of_rx_event: Option<EventId>,
    pub no_reply_event: Option<EventId>,

    // Statistics.
    pub num_collisions: u32,
    pub num_queries_sent: u32,
    pub num_query_reps_sent: u32,
    pub rounds: Vec<RoundLog>,
    pub read_timestamps: Vec<f64>,
    pub record_read_timestamps: bool,
}

impl Reader {
    pub fn new(config: &ReaderConfig) -> Self {
        let blf = symbols::blf(config.dr, config.trcal);
        let inter_command_interval = symbols::max_t1(config.rtcal, blf) + symbols::t3();
        let num_slots = 1u32 << config.q;

        let preamble = ReaderPreamble::full(config.tari, config.rtcal, config.trcal);
        let sync = ReaderPreamble::sync(config.tari, config.rtcal);

        let commands = CommandSet {
            query: ReaderFrame::new(
                preamble,
                Command::Query {
                    dr: config.dr,
                    m: config.m,
                    trext: config.trext,
                    sel: config.sel,
                    session: config.session,
                    target: config.target,
                    q: config.q,
                    crc5: 0,
                },
            ),
            query_rep: ReaderFrame::new(sync, Command::QueryRep { session: config.session }),
            ack: ReaderFrame::new(sync, Command::Ack { rn: 0xAAAA }),
            req_rn: ReaderFrame::new(sync, Command::ReqRn { rn: 0xAAAA, crc16: 0xAAAA }),
            read: ReaderFrame::new(
                sync,
                Command::Read {
                    bank: MemoryBank::User,
                    wordptr: 0,
                    wordcnt: config.wordcnt as u8,
                    rn: 0xAAAA,
                    crc16: 0xAAAA,
                },
            ),
        };

        Reader {
            position: config.position,
            velocity: config.velocity,
            q: config.q,
            m: config.m,
            sel: config.sel,
            trext: config.trext,
            dr: config.dr,
            tari: config.tari,
            rtcal: config.rtcal,
            trcal: config.trcal,
            session: config.session,
            target: config.target,
            wordcnt: config.wordcnt,
            tx_power: config.tx_power,
            circulator_noise: config.circulator_noise,
            blf,
            inter_command_interval,
            num_slots,
            commands,
            state: ReaderState::Idle,
            slot: 0,
            num_rounds: 0,
            position_updated_at: 0.0,
            tx_frame: None,
            rxops: Vec::new(),
            rx_ends_at: 0.0,
            end_of_tx_event: None,
            end_of_rx_event: None,
            no_reply_event: None,
            num_collisions: 0,
            num_queries_sent: 0,
            num_query_reps_sent: 0,
            rounds: Vec::new(),
            read_timestamps: Vec::new(),
            record_read_timestamps: config.record_read_timestamps,
        }
    }

    /// Advance the position along the velocity vector up to `time`.
    pub fn update_position(&mut self, time: f64) {
        self.position = self.position + self.velocity * (time - self.position_updated_at);
        self.position_updated_at = time;
    }

    /// Begin a new inventory round. The reader must be idle.
    pub fn start_round(&mut self) {
        assert!(
            self.state == ReaderState::Idle,
            "round start while {} (tx_frame: {:?}, rxops: {}, slot: {})",
            self.state,
            self.tx_frame.as_ref().map(|f| f.command().name()),
            self.rxops.len(),
            self.slot
        );
        self.slot = 1;
        self.num_rounds += 1;
    }

    /// Move to the next slot within the current round.
    pub fn start_slot(&mut self) {
        assert!(self.slot < self.num_slots, "slot overflow: {} of {}", self.slot, self.num_slots);
        self.slot += 1;
    }

    pub fn has_next_slot(&self) -> bool {
        self.slot < self.num_slots
    }

    /// Decide the follow-up to a successfully received reply.
    pub fn next_command(&self, reply: &Reply) -> NextCommand {
        match reply {
            Reply::Rn16 { .. } => NextCommand::Send(self.commands.ack.clone()),
            Reply::Epc { .. } => NextCommand::Send(self.commands.req_rn.clone()),
            Reply::Handle { .. } => NextCommand::Send(self.commands.read.clone()),
            Reply::Data { .. } => {
                if self.slot >= self.num_slots {
                    NextCommand::NewRound
                } else {
                    NextCommand::Send(self.commands.query_rep.clone())
                }
            }
        }
    }

    /// Open a round log entry, closing the previous one at `now`.
    pub fn open_round_log(&mut self, now: f64, tags_on: Vec<usize>) {
        self.close_round_log(now);
        self.rounds.push(RoundLog {
            index: self.num_rounds,
            t_start: now,
            t_finish: now,
            duration: 0.0,
            tags_on,
            tags_turned_off: Vec::new(),
            tags_read: Vec::new(),
        });
    }

    /// Stamp the finish time of the round in progress, if any.
    pub fn close_round_log(&mut self, now: f64) {
        if let Some(last) = self.rounds.last_mut() {
            last.t_finish = now;
            last.duration = now - last.t_start;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gen2::replies::TagPreamble;

    fn config() -> ReaderConfig {
        ReaderConfig {
            position: Vec3::new(0.0, 0.0, 10.0),
            velocity: Vec3::new(1.0, 0.0, 0.0),
            q: 2,
            m: TagEncoding::M2,
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

    #[test]
    fn derived_values() {
        let reader = Reader::new(&config());
        // DR 8 over TRcal 20 us yields a 400 kHz link.
        assert!((reader.blf - 400_000.0).abs() < 1e-6);
        assert_eq!(reader.num_slots, 4);
        let expected = symbols::max_t1(15.0e-6, reader.blf) + symbols::t3();
        assert!((reader.inter_command_interval - expected).abs() < 1e-15);
        // Query carries the full preamble, the rest run on SYNC.
        assert!(reader.commands.query.preamble().trcal().is_some());
        assert!(reader.commands.query_rep.preamble().trcal().is_none());
    }

    #[test]
    fn round_and_slot_progression() {
        let mut reader = Reader::new(&config());
        reader.start_round();
        assert_eq!((reader.slot, reader.num_rounds), (1, 1));
        assert!(reader.has_next_slot());
        reader.start_slot();
        reader.start_slot();
        reader.start_slot();
        assert_eq!(reader.slot, 4);
        assert!(!reader.has_next_slot());
    }

    #[test]
    #[should_panic(expected = "round start while")]
    fn round_start_requires_idle() {
        let mut reader = Reader::new(&config());
        reader.state = ReaderState::Tx;
        reader.start_round();
    }

    #[test]
    fn reply_to_command_mapping() {
        let mut reader = Reader::new(&config());
        reader.start_round();

        let next = |reader: &Reader, reply: &Reply| match reader.next_command(reply) {
            NextCommand::Send(frame) => Some(frame.command().name()),
            NextCommand::NewRound => None,
        };

        assert_eq!(next(&reader, &Reply::rn16()), Some("ACK"));
        assert_eq!(next(&reader, &Reply::epc("A5".repeat(12))), Some("ReqRN"));
        assert_eq!(next(&reader, &Reply::handle()), Some("Read"));
        // Mid-round the exchange falls back to QueryRep after Data.
        assert_eq!(next(&reader, &Reply::data("ABCD".repeat(4))), Some("QueryRep"));
        // On the last slot it wraps into a new round instead.
        reader.slot = reader.num_slots;
        assert_eq!(next(&reader, &Reply::data("ABCD".repeat(4))), None);
    }

    #[test]
    fn round_log_bookkeeping() {
        let mut reader = Reader::new(&config());
        reader.start_round();
        reader.open_round_log(0.5, vec![0, 2]);
        reader.num_rounds += 1;
        reader.open_round_log(1.25, vec![0]);
        reader.close_round_log(2.0);

        assert_eq!(reader.rounds.len(), 2);
        assert_eq!(reader.rounds[0].tags_on, vec![0, 2]);
        assert_eq!(reader.rounds[1].index, 2);
        assert!((reader.rounds[0].t_finish - 1.25).abs() < 1e-12);
        assert!((reader.rounds[0].duration - 0.75).abs() < 1e-12);
        assert!((reader.rounds[1].duration - 0.75).abs() < 1e-12);
    }

    #[test]
    fn rxop_duration_fields() {
        let reader = Reader::new(&config());
        let frame = TagFrame::new(TagPreamble::new(reader.m, reader.trext, reader.blf), Reply::rn16());
        let rxop = RxOp { frame: frame.clone(), tag_index: 0, started_at: 1.0, finish_at: 1.0 + frame.duration(), broken: false };
        assert!(rxop.finish_at > rxop.started_at);
        assert!(!rxop.broken);
    }
}
