//! Event type codes. The numeric space is partitioned into a reserved
//! (system) range and a user range; the core reserves the six type codes
//! the group cache and its protocol engine need.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(pub u64);

/// First type code available to user code. Everything below this is
/// reserved for the core.
pub const USER_RANGE_START: u64 = 1000;

impl EventType {
    pub const PEER_CACHE_ENTRIES: EventType = EventType(1);
    pub const GROUP_REVOKE_FROM_SP: EventType = EventType(2);
    pub const GROUP_REVOKE_TO_RANK: EventType = EventType(3);
    pub const SP_DATA_TO_HOST: EventType = EventType(4);
    pub const META_EVENT: EventType = EventType(5);
    pub const TERM: EventType = EventType(6);

    pub fn is_reserved(&self) -> bool {
        self.0 < USER_RANGE_START
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test]
    fn reserved_types_are_below_user_range() {
        for ty in [
            EventType::PEER_CACHE_ENTRIES,
            EventType::GROUP_REVOKE_FROM_SP,
            EventType::GROUP_REVOKE_TO_RANK,
            EventType::SP_DATA_TO_HOST,
            EventType::META_EVENT,
            EventType::TERM,
        ] {
            assert!(ty.is_reserved());
        }
        assert!(!EventType(USER_RANGE_START).is_reserved());
    }
}
