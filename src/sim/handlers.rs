//! Event vocabulary and handlers of the inventory simulation.
//!
//! Handlers mutate the scene and post follow-up events; nothing else in the
//! crate touches simulation state while a pass runs. The flow of a round:
//!
//! 1. `UPDATE_POSITIONS` advances the reader, refreshes every channel and
//!    flips tag power states.
//! 2. `START_ROUND` emits Query; replies travel as `READER_RX_START` events
//!    after the propagation delay, commands as `TAG_RX_START` events.
//! 3. RX windows that overlap at the reader collide; surviving frames drive
//!    the Ack/ReqRN/Read exchange, timeouts advance the slot.
//! 4. `READER_LEFT` raises the stop latch once every tag is out of range
//!    (or the round budget is exhausted).

use log::{Level, debug, trace};
use rand::Rng;

use crate::des::Context;
use crate::gen2::commands::{Command, ReaderFrame};
use crate::gen2::replies::{Reply, TagFrame};
use crate::gen2::symbols::{InventoryFlag, min_t2};
use crate::sim::config::SimulationConfig;
use crate::sim::reader::{NextCommand, ReaderState, RxOp};
use crate::sim::scene::Scene;
use crate::sim::tag::TagState;

/// The closed set of event kinds driving a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    UpdatePositions,
    StartRound,
    SendCommand,
    ReaderTxEnd,
    ReaderRxStart,
    ReaderRxEnd,
    ReaderAbortRx,
    ReaderNoReply,
    ReaderLeft,
    TagRxStart,
    TagRxEnd,
    SendReply,
    TagTxEnd,
    TagPowerOn,
    TagPowerOff,
}

/// Frame payload attached to transmission events.
#[derive(Debug, Clone)]
pub enum Frame {
    Reader(ReaderFrame),
    Tag(TagFrame),
}

/// Context type every handler in this module receives.
pub type SimContext<'a> = Context<'a, EventKind, Frame, Scene, SimulationConfig>;

/// Seed the clock: first position update and first round both fire at t=0.
pub fn initialize(ctx: &mut SimContext<'_>) {
    ctx.sim.schedule(0.0, EventKind::UpdatePositions, -1, None);
    ctx.sim.schedule(0.0, EventKind::StartRound, -1, None);
}

/// The reader is out of range of every tag: close the books and stop.
pub fn reader_left(ctx: &mut SimContext<'_>) {
    let now = ctx.sim.time();
    debug!("[{now:.6}] ==== reader left ====");
    ctx.state.reader.close_round_log(now);
    ctx.sim.stop();
}

/// Periodic geometry and power refresh.
pub fn update_positions(ctx: &mut SimContext<'_>) {
    let now = ctx.sim.time();
    trace!("[{now:.6}] update_positions");

    let mut turn_on = Vec::new();
    let mut turn_off = Vec::new();
    let all_out;
    {
        let scene = &mut *ctx.state;
        scene.reader.update_position(now);
        trace!("    reader position: {}", scene.reader.position);

        all_out = scene
            .tags
            .iter()
            .all(|tag| scene.reader.position.distance(tag.position) >= scene.max_distance);

        if !all_out {
            let Scene { reader, tags, channels, .. } = scene;
            for (i, (tag, channel)) in tags.iter().zip(channels.iter_mut()).enumerate() {
                channel.update_power(now, reader, tag);
                channel.log_state(Level::Trace);
                let tag_rx_power = channel.tag_rx_power_map.last();
                if !tag.powered() && tag_rx_power >= tag.sensitivity {
                    turn_on.push(i);
                } else if tag.powered() && tag_rx_power < tag.sensitivity {
                    turn_off.push(i);
                }
            }
        }
    }

    if all_out {
        ctx.sim.schedule(now, EventKind::ReaderLeft, -1, None);
    } else {
        for i in turn_on {
            tag_power_on(ctx, i as i64);
        }
        for i in turn_off {
            tag_power_off(ctx, i as i64);
        }
    }

    let dt = ctx.state.position_update_interval;
    ctx.sim.schedule(now + dt, EventKind::UpdatePositions, -1, None);
}

/// Begin an inventory round, or end the pass once the round budget is spent.
pub fn reader_start_round(ctx: &mut SimContext<'_>) {
    let now = ctx.sim.time();
    let max_num_rounds = ctx.state.max_num_rounds;
    if max_num_rounds > 0 && ctx.state.reader.num_rounds >= max_num_rounds as u32 {
        ctx.sim.schedule(now, EventKind::ReaderLeft, -1, None);
        return;
    }

    let tags_on = ctx.state.powered_tags();
    let reader = &mut ctx.state.reader;
    reader.start_round();
    reader.open_round_log(now, tags_on);
    debug!("[{now:.6}] ==== round #{} ====", reader.num_rounds);

    let frame = Frame::Reader(reader.commands.query.clone());
    send_command(ctx, &frame);
}

/// Transmit a command frame: hold TX for its duration and deliver it to
/// every tag after the per-link propagation delay.
pub fn send_command(ctx: &mut SimContext<'_>, frame: &Frame) {
    let Frame::Reader(frame) = frame else {
        panic!("SEND_COMMAND at t={:.9} expects a reader frame", ctx.sim.time());
    };
    let now = ctx.sim.time();
    trace!("[{now:.6}] send_command: {frame} [D:{:.6}s]", frame.duration());

    {
        let reader = &mut ctx.state.reader;
        reader.state = ReaderState::Tx;
        reader.tx_frame = Some(frame.clone());
        match frame.command() {
            Command::Query { .. } => reader.num_queries_sent += 1,
            Command::QueryRep { .. } => reader.num_query_reps_sent += 1,
            _ => {}
        }
    }
    let id = ctx.sim.schedule(now + frame.duration(), EventKind::ReaderTxEnd, -1, None);
    ctx.state.reader.end_of_tx_event = Some(id);

    for i in 0..ctx.state.tags.len() {
        let prop = ctx.state.channels[i]
            .propagation_delay(ctx.state.reader.position, ctx.state.tags[i].position);
        ctx.sim.schedule(now + prop, EventKind::TagRxStart, i as i64, Some(Frame::Reader(frame.clone())));
    }
}

/// Command transmission finished: go idle and arm the no-reply timeout.
pub fn reader_tx_end(ctx: &mut SimContext<'_>) {
    let now = ctx.sim.time();
    let reader = &mut ctx.state.reader;
    trace!("[{now:.6}] reader_tx_end: state := IDLE, slot = {}", reader.slot);

    reader.state = ReaderState::Idle;
    reader.tx_frame = None;
    reader.end_of_tx_event = None;

    let t_no_reply = now + reader.inter_command_interval;
    reader.no_reply_event = Some(ctx.sim.schedule(t_no_reply, EventKind::ReaderNoReply, -1, None));
}

/// Nothing usable arrived in time: advance the slot or wrap the round.
pub fn reader_no_reply(ctx: &mut SimContext<'_>) {
    let now = ctx.sim.time();
    trace!("[{now:.6}] no_reply");
    ctx.state.reader.no_reply_event = None;

    if ctx.state.reader.has_next_slot() {
        ctx.state.reader.start_slot();
        let frame = Frame::Reader(ctx.state.reader.commands.query_rep.clone());
        send_command(ctx, &frame);
    } else {
        reader_start_round(ctx);
    }
}

/// A tag reply reaches the reader antenna. Overlap with a transmission in
/// progress or another reception is a collision and breaks every operation
/// involved.
pub fn reader_rx_start(ctx: &mut SimContext<'_>, index: i64, frame: &Frame) {
    let Frame::Tag(frame) = frame else {
        panic!("READER_RX_START at t={:.9} expects a tag frame", ctx.sim.time());
    };
    let now = ctx.sim.time();
    trace!("[{now:.6}] reader_rx_start: {frame} [D:{:.6}s]", frame.duration());

    let reader = &mut ctx.state.reader;
    let has_rxops = !reader.rxops.is_empty();
    let broken = reader.state == ReaderState::Tx || has_rxops;
    if broken {
        for rxop in &mut reader.rxops {
            rxop.broken = true;
        }
        reader.num_collisions += 1;
        debug!("[{now:.6}] COLLISION");
    }

    reader.rxops.push(RxOp {
        frame: frame.clone(),
        tag_index: index as usize,
        started_at: now,
        finish_at: now + frame.duration(),
        broken,
    });

    let rx_ends_at = reader
        .rxops
        .iter()
        .fold(f64::NEG_INFINITY, |acc, rxop| acc.max(rxop.finish_at));
    if !has_rxops || reader.rx_ends_at < rx_ends_at {
        if let Some(id) = reader.end_of_rx_event.take() {
            ctx.sim.cancel(id);
        }
        reader.end_of_rx_event = Some(ctx.sim.schedule(rx_ends_at, EventKind::ReaderRxEnd, -1, None));
        reader.rx_ends_at = rx_ends_at;
    }

    if reader.state == ReaderState::Idle {
        reader.state = ReaderState::Rx;
        if let Some(id) = reader.no_reply_event.take() {
            ctx.sim.cancel(id);
        }
    }
}

/// All reception operations finished. A lone unbroken frame rolls against
/// the bit error rate; anything else counts as a timeout.
pub fn reader_rx_end(ctx: &mut SimContext<'_>) {
    let now = ctx.sim.time();
    trace!("[{now:.6}] reader_rx_end");

    let received: Option<(TagFrame, usize)>;
    {
        let Scene { reader, channels, rng, .. } = &mut *ctx.state;
        reader.state = ReaderState::Idle;

        received = if let [rxop] = reader.rxops.as_slice() {
            if rxop.broken {
                None
            } else {
                let channel = &channels[rxop.tag_index];
                let rx_power = channel.reader_rx_power_map.get_min(rxop.started_at, rxop.finish_at);
                let ber = channel.ber_map.get(rxop.finish_at);
                let p_success = (1.0 - ber).powi(rxop.frame.reply_bitlen() as i32);
                let survived = rng.gen_range(0.0..1.0) <= p_success;
                trace!(
                    "    frame: {}, rx_power = {rx_power:.2} dBm, ber = {ber:.6}, p_success = {p_success:.6}",
                    rxop.frame
                );
                survived.then(|| (rxop.frame.clone(), rxop.tag_index))
            }
        } else {
            None
        };

        reader.rxops.clear();
        reader.end_of_rx_event = None;
    }

    let t_send = now + min_t2(ctx.state.reader.blf);
    match received {
        None => {
            debug!("[{now:.6}] >> broken");
            ctx.state.reader.no_reply_event =
                Some(ctx.sim.schedule(t_send, EventKind::ReaderNoReply, -1, None));
        }
        Some((frame, tag_index)) => {
            debug!("[{now:.6}] >> received {}", frame.reply().name());
            match frame.reply() {
                Reply::Epc { .. } => {
                    ctx.state.tags[tag_index].num_epcid_received += 1;
                    let reader = &mut ctx.state.reader;
                    if reader.record_read_timestamps {
                        reader.read_timestamps.push(now);
                    }
                    if let Some(round) = reader.rounds.last_mut() {
                        round.tags_read.push(tag_index);
                    }
                }
                Reply::Data { .. } => {
                    ctx.state.tags[tag_index].num_data_received += 1;
                }
                _ => {}
            }

            match ctx.state.reader.next_command(frame.reply()) {
                NextCommand::NewRound => {
                    ctx.sim.schedule(t_send, EventKind::StartRound, -1, None);
                }
                NextCommand::Send(next) => {
                    ctx.sim.schedule(t_send, EventKind::SendCommand, -1, Some(Frame::Reader(next)));
                }
            }
        }
    }
}

/// The sending tag lost power mid-reply: force its reception operation to
/// end broken right now.
pub fn reader_abort_rx(ctx: &mut SimContext<'_>, index: i64) {
    let now = ctx.sim.time();
    trace!("[{now:.6}] reader_abort_rx: tag {index}");

    let reader = &mut ctx.state.reader;
    let Some(pos) = reader.rxops.iter().position(|rxop| rxop.tag_index == index as usize) else {
        return;
    };
    reader.rxops[pos].broken = true;
    reader.rxops[pos].finish_at = now;

    if let Some(id) = reader.end_of_rx_event.take() {
        ctx.sim.cancel(id);
    }
    let rx_ends_at = reader
        .rxops
        .iter()
        .fold(f64::NEG_INFINITY, |acc, rxop| acc.max(rxop.finish_at));
    reader.rx_ends_at = rx_ends_at;

    if rx_ends_at <= now {
        reader_rx_end(ctx);
    } else {
        ctx.state.reader.end_of_rx_event =
            Some(ctx.sim.schedule(rx_ends_at, EventKind::ReaderRxEnd, -1, None));
    }
}

/// Received power crossed the sensitivity threshold upwards.
pub fn tag_power_on(ctx: &mut SimContext<'_>, index: i64) {
    let now = ctx.sim.time();
    debug!("[{now:.6}] (^) tag {index} power on");

    let tag = &mut ctx.state.tags[index as usize];
    tag.state = TagState::Ready;
    tag.session_flags = [InventoryFlag::A; 4];
}

/// Received power dropped below sensitivity (or power-off was forced).
/// Pending operations are torn down; a transmission in flight aborts the
/// reader's reception after the propagation delay.
pub fn tag_power_off(ctx: &mut SimContext<'_>, index: i64) {
    let i = index as usize;
    let now = ctx.sim.time();
    debug!("[{now:.6}] (x) tag {i} power off");

    let Scene { reader, tags, channels, .. } = &mut *ctx.state;
    let tag = &mut tags[i];
    let was_powered = tag.powered();

    if let Some(id) = tag.tx_start_event.take() {
        ctx.sim.cancel(id);
    }
    if let Some(id) = tag.rx_end_event.take() {
        debug_assert!(tag.rx_frame.is_some());
        ctx.sim.cancel(id);
        tag.rx_frame = None;
    }
    if let Some(id) = tag.tx_end_event.take() {
        ctx.sim.cancel(id);
        tag.tx_frame = None;
        let prop = channels[i].propagation_delay(reader.position, tag.position);
        ctx.sim.schedule(now + prop, EventKind::ReaderAbortRx, index, None);
    }

    tag.state = TagState::Off;
    if was_powered {
        if let Some(round) = reader.rounds.last_mut() {
            round.tags_turned_off.push(i);
        }
    }
}

/// A command frame reaches a tag. Unpowered tags drop it silently.
pub fn tag_rx_start(ctx: &mut SimContext<'_>, index: i64, frame: &Frame) {
    let Frame::Reader(frame) = frame else {
        panic!("TAG_RX_START at t={:.9} expects a reader frame", ctx.sim.time());
    };
    let now = ctx.sim.time();

    let tag = &mut ctx.state.tags[index as usize];
    if tag.state == TagState::Off {
        return;
    }
    trace!("[{now:.6}] tag_rx_start: {frame} [D:{:.6}s]", frame.duration());

    assert!(tag.rx_frame.is_none(), "tag {index} already receiving at t={now:.9}");
    tag.rx_ends_at = now + frame.duration();
    tag.rx_frame = Some(frame.clone());
    tag.rx_end_event = Some(ctx.sim.schedule(tag.rx_ends_at, EventKind::TagRxEnd, index, None));
}

/// A command frame has been fully received; commands always decode cleanly
/// on a powered tag.
pub fn tag_rx_end(ctx: &mut SimContext<'_>, index: i64) {
    let now = ctx.sim.time();
    let Scene { tags, rng, .. } = &mut *ctx.state;
    let tag = &mut tags[index as usize];
    tag.rx_end_event = None;

    let state = tag.state;
    let Some(frame) = tag.rx_frame.take() else {
        panic!("tag {index} RX end without a frame at t={now:.9}");
    };
    if state == TagState::Off {
        return;
    }
    trace!("[{now:.6}] tag_rx_end: {}", frame.command().name());

    match *frame.command() {
        Command::Query { q, session, target, .. } => {
            if target == tag.session_flags[session.index()] {
                tag.round_session = session;
                tag.counter = rng.gen_range(0..(1u32 << q));
                if tag.counter == 0 {
                    tag.state = TagState::Reply;
                    tag.tx_start_event = Some(ctx.sim.schedule(
                        now + tag.t1,
                        EventKind::SendReply,
                        index,
                        Some(Frame::Tag(tag.replies.rn16.clone())),
                    ));
                } else {
                    tag.state = TagState::Arbitrate;
                }
            } else {
                tag.state = TagState::Ready;
            }
            trace!("    counter := {}, state := {}, t1 = {:.6}", tag.counter, tag.state, tag.t1);
        }
        Command::QueryRep { .. } => {
            tag.counter = tag.counter.checked_sub(1).unwrap_or(0xFFFF);
            if tag.counter == 0 && state == TagState::Arbitrate {
                tag.state = TagState::Reply;
                tag.tx_start_event = Some(ctx.sim.schedule(
                    now + tag.t1,
                    EventKind::SendReply,
                    index,
                    Some(Frame::Tag(tag.replies.rn16.clone())),
                ));
            } else if state != TagState::Ready && state != TagState::Arbitrate {
                tag.state = TagState::Arbitrate;
            }
            trace!("    counter := {}, state := {}", tag.counter, tag.state);
        }
        Command::Ack { .. } if state == TagState::Reply => {
            tag.state = TagState::Acknowledged;
            tag.tx_start_event = Some(ctx.sim.schedule(
                now + tag.t1,
                EventKind::SendReply,
                index,
                Some(Frame::Tag(tag.replies.epcid.clone())),
            ));
        }
        Command::ReqRn { .. } if state == TagState::Acknowledged => {
            tag.tx_start_event = Some(ctx.sim.schedule(
                now + tag.t1,
                EventKind::SendReply,
                index,
                Some(Frame::Tag(tag.replies.handle.clone())),
            ));
        }
        Command::Read { .. } if state == TagState::Acknowledged => {
            tag.tx_start_event = Some(ctx.sim.schedule(
                now + tag.t1,
                EventKind::SendReply,
                index,
                Some(Frame::Tag(tag.replies.data.clone())),
            ));
        }
        // Singulation traffic addressed to another tag passes by tags that
        // sit the exchange out in READY or ARBITRATE.
        Command::Ack { .. } | Command::ReqRn { .. } | Command::Read { .. }
            if state == TagState::Ready || state == TagState::Arbitrate =>
        {
            trace!("    {} ignored in state {state}", frame.command().name());
        }
        ref command => {
            panic!("unsupported command {command} in tag state {state} at t={now:.9}")
        }
    }
}

/// Backscatter a reply: hold TX for its duration and deliver the frame to
/// the reader after the propagation delay.
pub fn send_reply(ctx: &mut SimContext<'_>, index: i64, frame: &Frame) {
    let Frame::Tag(frame) = frame else {
        panic!("SEND_REPLY at t={:.9} expects a tag frame", ctx.sim.time());
    };
    let now = ctx.sim.time();
    trace!("[{now:.6}] send_reply: {frame} [D:{:.6}s]", frame.duration());

    let i = index as usize;
    let Scene { reader, tags, channels, .. } = &mut *ctx.state;
    let tag = &mut tags[i];

    tag.tx_start_event = None;
    tag.tx_frame = Some(frame.clone());
    match frame.reply() {
        Reply::Epc { .. } => tag.num_epcid_sent += 1,
        Reply::Data { .. } => tag.num_data_sent += 1,
        _ => {}
    }

    tag.tx_ends_at = now + frame.duration();
    tag.tx_end_event = Some(ctx.sim.schedule(tag.tx_ends_at, EventKind::TagTxEnd, index, None));

    let prop = channels[i].propagation_delay(reader.position, tag.position);
    ctx.sim.schedule(now + prop, EventKind::ReaderRxStart, index, Some(Frame::Tag(frame.clone())));
}

/// Reply transmission complete. A finished EPC transmission inverts the
/// session's inventoried flag when the tag runs with `switch_target`.
pub fn tag_tx_end(ctx: &mut SimContext<'_>, index: i64) {
    let now = ctx.sim.time();
    trace!("[{now:.6}] tag_tx_end: tag {index}");

    let tag = &mut ctx.state.tags[index as usize];
    tag.tx_end_event = None;
    if let Some(frame) = tag.tx_frame.take() {
        if tag.switch_target && matches!(frame.reply(), Reply::Epc { .. }) {
            let s = tag.round_session.index();
            tag.session_flags[s] = tag.session_flags[s].invert();
        }
    }
}
