//! Per-event matching queues and the rooms they produce.

pub mod engine;
mod queue;
pub mod types;

pub use engine::MatchingEngine;
pub use types::{
    EngineConfig, EntryState, EventStats, LeaveOutcome, QueueChange, QueueEntry, Room, RoomState,
};
