//! World-space probe clipmap: toroidal grid topology, per-probe lifecycle, and budgeted update scheduling.

pub mod error;
pub mod events;
pub mod level;
pub mod scheduler;
pub mod selection;
pub mod topology;

pub use error::ClipmapError;
pub use events::{AnchorShiftEvent, ShiftListeners, SubscriptionId};
pub use level::{ClipmapLevel, LevelPlacement, LevelStats, ProbeState};
pub use scheduler::{
    ClipmapStats, DEFAULT_ESTIMATED_BYTES_PER_PROBE, MAX_LEVEL_COUNT, SchedulerConfig,
    UpdateBudget, WorldProbeScheduler,
};
pub use selection::{BoundedBestList, SelectionKey, UpdateRequest};
