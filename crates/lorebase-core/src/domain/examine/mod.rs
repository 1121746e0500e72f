//! Moderation of proposed entity changes

#[allow(clippy::module_inception)]
mod examine;
mod workflow;

pub use examine::{ExamineCategory, ExamineRecord, ExamineStatus};
pub use workflow::{BASE_KEYS, ExamineWorkflow};
