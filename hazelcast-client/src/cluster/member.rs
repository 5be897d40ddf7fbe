use std::net::SocketAddr;

use uuid::Uuid;

/// A member of the Hazelcast cluster.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Member {
    uuid: Uuid,
    address: SocketAddr,
    lite_member: bool,
}

impl Member {
    /// Creates a data member.
    pub fn new(uuid: Uuid, address: SocketAddr) -> Self {
        Self {
            uuid,
            address,
            lite_member: false,
        }
    }

    /// Creates a lite member, which owns no partitions.
    pub fn lite(uuid: Uuid, address: SocketAddr) -> Self {
        Self {
            uuid,
            address,
            lite_member: true,
        }
    }

    /// Returns the member's UUID.
    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Returns the member's network address.
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    /// Returns whether this is a lite member.
    pub fn is_lite_member(&self) -> bool {
        self.lite_member
    }
}

impl std::fmt::Display for Member {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Member[uuid={}, address={}]", self.uuid, self.address)?;
        if self.lite_member {
            write!(f, " lite")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_member_display() {
        let uuid = Uuid::from_u64_pair(0, 1);
        let address = SocketAddr::from(([10, 0, 0, 1], 5701));

        let member = Member::new(uuid, address);
        assert_eq!(
            member.to_string(),
            "Member[uuid=00000000-0000-0000-0000-000000000001, address=10.0.0.1:5701]"
        );
        assert!(Member::lite(uuid, address).to_string().ends_with(" lite"));
    }
}
