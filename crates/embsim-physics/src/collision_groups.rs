//! Collision group membership and the masks that decide which groups collide.

use rapier3d::geometry::{Group, InteractionGroups};

/// Collision group of a collider. Each group is a single bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum CollisionGroup {
    /// Default group for objects without a motion-specific group.
    Default = 1,
    /// Immovable geometry: the stage and fixed aggregate bodies.
    Static = 1 << 1,
    /// Kinematically driven objects.
    Kinematic = 1 << 2,
    /// Simulated objects.
    Dynamic = 1 << 3,
    /// Links of articulated objects.
    Robot = 1 << 4,
    /// Never collides with anything.
    Noncollidable = 1 << 5,
    /// First of the groups reserved for callers.
    UserGroup0 = 1 << 6,
    /// Second user group.
    UserGroup1 = 1 << 7,
    /// Third user group.
    UserGroup2 = 1 << 8,
    /// Fourth user group.
    UserGroup3 = 1 << 9,
}

const ALL_GROUPS: u32 = u32::MAX;

impl CollisionGroup {
    /// Bit pattern of this group.
    pub fn bits(self) -> u32 {
        self as u32
    }

    /// Groups this group is allowed to collide with.
    pub fn mask(self) -> u32 {
        let non = CollisionGroup::Noncollidable.bits();
        match self {
            CollisionGroup::Noncollidable => 0,
            CollisionGroup::Static => ALL_GROUPS & !(CollisionGroup::Static.bits() | non),
            CollisionGroup::Kinematic => {
                ALL_GROUPS
                    & !(CollisionGroup::Static.bits() | CollisionGroup::Kinematic.bits() | non)
            }
            _ => ALL_GROUPS & !non,
        }
    }

    /// Membership and filter as rapier interaction groups.
    pub fn interaction_groups(self) -> InteractionGroups {
        InteractionGroups::new(
            Group::from_bits_truncate(self.bits()),
            Group::from_bits_truncate(self.mask()),
        )
    }

    /// True if colliders of `self` and `other` may touch.
    pub fn collides_with(self, other: CollisionGroup) -> bool {
        self.mask() & other.bits() != 0 && other.mask() & self.bits() != 0
    }
}
