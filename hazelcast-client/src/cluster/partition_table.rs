use std::collections::HashMap;

use uuid::Uuid;

/// Partition id to owner mapping, replaced wholesale by newer versions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartitionTable {
    version: i32,
    owners: HashMap<i32, Uuid>,
    partition_count: i32,
}

impl PartitionTable {
    /// Creates an empty table. Until the first update no partition has an
    /// owner.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from owner to owned partitions, as the cluster sends it.
    pub fn from_owners(version: i32, assignments: &[(Uuid, Vec<i32>)]) -> Self {
        let mut owners = HashMap::new();
        for (owner, partitions) in assignments {
            for partition_id in partitions {
                owners.insert(*partition_id, *owner);
            }
        }
        let partition_count = owners.keys().max().map_or(0, |max| max + 1);
        Self {
            version,
            owners,
            partition_count,
        }
    }

    /// Returns the version of this table.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Returns the number of partitions, or 0 if unknown.
    pub fn partition_count(&self) -> i32 {
        self.partition_count
    }

    /// Returns the owner of `partition_id`, if known.
    pub fn owner(&self, partition_id: i32) -> Option<Uuid> {
        self.owners.get(&partition_id).copied()
    }

    /// Replaces this table with `newer` if its version is higher.
    ///
    /// Returns true if the table changed.
    pub fn apply(&mut self, newer: PartitionTable) -> bool {
        if !self.owners.is_empty() && newer.version <= self.version {
            return false;
        }
        *self = newer;
        true
    }
}
