// area.rs - Surface origin classification carried by every span
//
// The raw byte doubles as the area id handed to the geometry engine, so a
// value of zero is the engine's null (non-walkable) area.

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

/// Bitmask over the origin of a surface
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AreaFlags(u8);

impl AreaFlags {
    /// Null area: the span is not walkable
    pub const NONE: AreaFlags = AreaFlags(0);
    pub const TERRAIN: AreaFlags = AreaFlags(0x01);
    pub const LIQUID: AreaFlags = AreaFlags(0x02);
    pub const BUILDING: AreaFlags = AreaFlags(0x04);
    pub const OBJECT: AreaFlags = AreaFlags(0x08);

    /// Liquid embedded in a building
    pub const BUILDING_LIQUID: AreaFlags = AreaFlags(0x04 | 0x02);
    /// Decorative object attached to a building
    pub const BUILDING_OBJECT: AreaFlags = AreaFlags(0x04 | 0x08);

    const ALL: u8 = 0x0F;

    pub const fn from_bits(bits: u8) -> AreaFlags {
        AreaFlags(bits & Self::ALL)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn union(self, other: AreaFlags) -> AreaFlags {
        AreaFlags(self.0 | other.0)
    }

    pub const fn contains(self, other: AreaFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: AreaFlags) {
        self.0 |= other.0;
    }

    /// Mark non-walkable
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    pub const fn is_walkable(self) -> bool {
        self.0 != 0
    }

    pub const fn is_terrain(self) -> bool {
        self.0 & Self::TERRAIN.0 != 0
    }

    pub const fn is_liquid(self) -> bool {
        self.0 & Self::LIQUID.0 != 0
    }

    pub const fn is_building(self) -> bool {
        self.0 & Self::BUILDING.0 != 0
    }

    pub const fn is_object(self) -> bool {
        self.0 & Self::OBJECT.0 != 0
    }

    /// Liquid that is not part of a building (lakes, rivers, sea)
    pub const fn is_free_liquid(self) -> bool {
        self.is_liquid() && !self.is_building()
    }

    /// Liquid inside a building (pools, fountains)
    pub const fn is_building_liquid(self) -> bool {
        self.contains(Self::BUILDING_LIQUID)
    }
}

impl BitOr for AreaFlags {
    type Output = AreaFlags;

    fn bitor(self, rhs: AreaFlags) -> AreaFlags {
        self.union(rhs)
    }
}

impl BitOrAssign for AreaFlags {
    fn bitor_assign(&mut self, rhs: AreaFlags) {
        self.insert(rhs);
    }
}

impl fmt::Debug for AreaFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.is_walkable() {
            return f.write_str("NONE");
        }
        let names = [
            (Self::TERRAIN, "TERRAIN"),
            (Self::LIQUID, "LIQUID"),
            (Self::BUILDING, "BUILDING"),
            (Self::OBJECT, "OBJECT"),
        ];
        let mut first = true;
        for (flag, name) in names {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}
