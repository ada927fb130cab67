pub mod drain;
pub mod queue;

pub use drain::DrainCycle;
pub use queue::{build_queue, dedup_by_url, priority_score};
