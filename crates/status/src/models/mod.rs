mod record;
mod row;

pub use self::record::{Attempt, FileRecord, ReplicaState, TargetSummary};
pub(crate) use self::row::{FileRow, ReplicaRow, to_millis};
