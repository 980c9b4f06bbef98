//! Domain models for the sync engine

mod backfill;
mod credential;
mod record;
pub(crate) mod timestamp;
mod window;

pub use backfill::BackfillState;
pub use credential::Credential;
pub use record::{Record, SegmentId};
pub use window::TimeWindow;
