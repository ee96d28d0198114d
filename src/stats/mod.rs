pub mod snapshot;
pub mod store;

pub use snapshot::{ActivityEntry, ActivityRecord, StatsSnapshot};
pub use store::StatsStore;
