//! The client's view of the cluster: members and partition ownership.

mod member;
mod partition_table;

pub use member::Member;
pub use partition_table::PartitionTable;
