use quiesce_net::NodeId;
use serde::{Deserialize, Serialize};
use std::fmt;

// Bit layout, frozen across all nodes (MSB -> LSB):
//
//   [ rooted:1 | category:2 | root_node:20 | generation:32 | user:9 ]
//
// 1 + 2 + 20 + 32 + 9 == 64, so the whole thing packs into one u64 with no
// padding. root_node gives headroom for >1M ranks; generation is a
// per-(creator,category) counter that is a fatal/logged condition to wrap,
// never specially handled (see SPEC_FULL.md §7).
const USER_BITS: u32 = 9;
const GENERATION_BITS: u32 = 32;
const ROOT_NODE_BITS: u32 = 20;
const CATEGORY_BITS: u32 = 2;

const USER_SHIFT: u32 = 0;
const GENERATION_SHIFT: u32 = USER_SHIFT + USER_BITS;
const ROOT_NODE_SHIFT: u32 = GENERATION_SHIFT + GENERATION_BITS;
const CATEGORY_SHIFT: u32 = ROOT_NODE_SHIFT + ROOT_NODE_BITS;
const ROOTED_SHIFT: u32 = CATEGORY_SHIFT + CATEGORY_BITS;

const USER_MASK: u64 = (1u64 << USER_BITS) - 1;
const GENERATION_MASK: u64 = (1u64 << GENERATION_BITS) - 1;
const ROOT_NODE_MASK: u64 = (1u64 << ROOT_NODE_BITS) - 1;
const CATEGORY_MASK: u64 = (1u64 << CATEGORY_BITS) - 1;

/// Which termination-detection algorithm an epoch is tracked with.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Category {
    Default = 0,
    Ds = 1,
    Wave = 2,
    UserDefined = 3,
}

impl Category {
    const fn from_bits(bits: u64) -> Category {
        match bits {
            0 => Category::Default,
            1 => Category::Ds,
            2 => Category::Wave,
            _ => Category::UserDefined,
        }
    }

    const fn to_bits(self) -> u64 {
        self as u64
    }
}

/// A fixed-width, opaque epoch identifier. Two epochs compare equal iff
/// bitwise equal; the creator node of a rooted epoch is recoverable from the
/// id alone, with no lookup into any table.
#[derive(Clone, Copy, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[repr(transparent)]
pub struct EpochId(pub u64);

impl EpochId {
    /// Sentinel meaning "no epoch". Never produced by `make_collective`/`make_rooted`.
    pub const NO_EPOCH: EpochId = EpochId(0);

    /// Reserved, globally-known epoch pinned open for the lifetime of the
    /// runtime: a produce at startup and a matching consume at shutdown keep
    /// it from ever looking quiescent prematurely during initialization.
    pub const ANY_EPOCH: EpochId = EpochId(u64::MAX);

    pub const fn from_bits(bits: u64) -> EpochId {
        EpochId(bits)
    }

    pub const fn to_bits(self) -> u64 {
        self.0
    }

    fn pack(rooted: bool, category: Category, root_node: u32, generation: u32, user: u32) -> u64 {
        debug_assert!((root_node as u64) <= ROOT_NODE_MASK, "root_node overflows its field");
        debug_assert!((user as u64) <= USER_MASK, "user bits overflow their field");
        ((rooted as u64) << ROOTED_SHIFT)
            | (category.to_bits() << CATEGORY_SHIFT)
            | (((root_node as u64) & ROOT_NODE_MASK) << ROOT_NODE_SHIFT)
            | (((generation as u64) & GENERATION_MASK) << GENERATION_SHIFT)
            | ((user as u64) & USER_MASK)
    }

    /// Construct a collective epoch: all nodes must call this with the same
    /// `category`/`generation` pair in lockstep (the generation counter is
    /// advanced identically on every node by the caller, typically
    /// `EpochManager`, which is what makes this "collective" rather than a
    /// plain local allocation).
    pub fn make_collective(category: Category, generation: u32) -> EpochId {
        EpochId::from_bits(EpochId::pack(false, category, 0, generation, 0))
    }

    /// Construct a rooted epoch local to `creator`; no communication needed.
    pub fn make_rooted(creator: NodeId, category: Category, generation: u32) -> EpochId {
        EpochId::from_bits(EpochId::pack(true, category, creator.as_u32(), generation, 0))
    }

    /// Same id with the generation field incremented by one, all other
    /// fields preserved. Collisions (generation wraparound) are a logged,
    /// fatal condition elsewhere, not handled here.
    pub fn next(self) -> EpochId {
        let next_gen = (self.generation().wrapping_add(1)) as u64 & GENERATION_MASK;
        EpochId::from_bits((self.0 & !(GENERATION_MASK << GENERATION_SHIFT)) | (next_gen << GENERATION_SHIFT))
    }

    pub const fn is_rooted(self) -> bool {
        (self.0 >> ROOTED_SHIFT) & 1 == 1
    }

    pub const fn category(self) -> Category {
        Category::from_bits((self.0 >> CATEGORY_SHIFT) & CATEGORY_MASK)
    }

    pub const fn root_node_bits(self) -> u32 {
        ((self.0 >> ROOT_NODE_SHIFT) & ROOT_NODE_MASK) as u32
    }

    /// The creator node, meaningful only for rooted epochs.
    pub const fn creator(self) -> NodeId {
        NodeId::new(self.root_node_bits())
    }

    pub const fn generation(self) -> u32 {
        ((self.0 >> GENERATION_SHIFT) & GENERATION_MASK) as u32
    }

    pub const fn user_bits(self) -> u32 {
        (self.0 & USER_MASK) as u32
    }

    /// The (creator, category) lane this epoch's generation counter and
    /// window membership belong to. Collective epochs use node 0 as a
    /// nominal creator, since they have no single creator node.
    pub fn lane(self) -> (u32, Category) {
        (self.root_node_bits(), self.category())
    }
}

impl fmt::Debug for EpochId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if *self == EpochId::NO_EPOCH {
            return write!(f, "EpochId(NoEpoch)");
        }
        if *self == EpochId::ANY_EPOCH {
            return write!(f, "EpochId(AnyEpoch)");
        }
        write!(
            f,
            "EpochId(rooted={}, cat={:?}, creator={}, gen={}, user={}, bits={:#018x})",
            self.is_rooted(),
            self.category(),
            self.root_node_bits(),
            self.generation(),
            self.user_bits(),
            self.0
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_rooted_fields() {
        let id = EpochId::make_rooted(NodeId::new(5), Category::Ds, 42);
        assert!(id.is_rooted());
        assert_eq!(id.category(), Category::Ds);
        assert_eq!(id.creator(), NodeId::new(5));
        assert_eq!(id.generation(), 42);
    }

    #[test]
    fn round_trips_collective_fields() {
        let id = EpochId::make_collective(Category::Wave, 7);
        assert!(!id.is_rooted());
        assert_eq!(id.category(), Category::Wave);
        assert_eq!(id.generation(), 7);
        assert_eq!(id.root_node_bits(), 0);
    }

    #[test]
    fn next_bumps_only_generation() {
        let id = EpochId::make_rooted(NodeId::new(3), Category::Ds, 10);
        let nxt = id.next();
        assert_eq!(nxt.generation(), 11);
        assert_eq!(nxt.creator(), id.creator());
        assert_eq!(nxt.category(), id.category());
        assert_eq!(nxt.is_rooted(), id.is_rooted());
    }

    #[test]
    fn sentinels_are_distinguishable() {
        assert_ne!(EpochId::NO_EPOCH, EpochId::ANY_EPOCH);
        let id = EpochId::make_rooted(NodeId::new(0), Category::Default, 0);
        assert_ne!(id, EpochId::NO_EPOCH);
    }

    #[test]
    fn equality_is_bitwise() {
        let a = EpochId::make_rooted(NodeId::new(9), Category::Wave, 3);
        let b = EpochId::from_bits(a.to_bits());
        assert_eq!(a, b);
    }
}
