//! EPC Class-1 Generation-2 air interface codec.
//!
//! - `symbols`: symbolic command fields, bit-level encoders and the T1..T4
//!   link timing constants
//! - `commands`: reader preambles, the five interrogator commands and their
//!   on-air frames
//! - `replies`: tag preambles, the four tag replies and their on-air frames
//!
//! Frames are encoded once at construction and carry their encoded bit
//! string and on-air duration, so the simulation only ever reads cached
//! values on the hot path.

pub mod commands;
pub mod replies;
pub mod symbols;

pub use commands::{Command, DecodeError, ReaderFrame, ReaderPreamble};
pub use replies::{Reply, TagFrame, TagPreamble};
pub use symbols::{DivideRatio, InventoryFlag, MemoryBank, Sel, Session, TagEncoding};
