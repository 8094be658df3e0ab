//! World coordinates and arena boundaries.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A point in a (possibly unnamed) world.
///
/// `world` is `None` when the caller relies on the arena's configured world.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location3D {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world: Option<String>,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Location3D {
    pub fn new(world: Option<String>, x: f64, y: f64, z: f64) -> Self {
        Self { world, x, y, z }
    }

    pub fn in_world(world: impl Into<String>, x: f64, y: f64, z: f64) -> Self {
        Self::new(Some(world.into()), x, y, z)
    }

    /// The block cell containing this point.
    pub fn block_pos(&self) -> BlockPos {
        BlockPos {
            x: floor_i32(self.x),
            y: floor_i32(self.y),
            z: floor_i32(self.z),
        }
    }

    /// World of this location, or `default` when unspecified.
    pub fn world_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.world.as_deref().unwrap_or(default)
    }
}

impl fmt::Display for Location3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.world {
            Some(world) => write!(f, "{world}@({}, {}, {})", self.x, self.y, self.z),
            None => write!(f, "({}, {}, {})", self.x, self.y, self.z),
        }
    }
}

fn floor_i32(v: f64) -> i32 {
    // `as` saturates on overflow and maps NaN to 0.
    v.floor() as i32
}

/// Integer block coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn to_location(self, world: impl Into<String>) -> Location3D {
        Location3D::in_world(world, self.x.into(), self.y.into(), self.z.into())
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Axis-aligned, inclusive region of an arena.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Boundary {
    world: Option<String>,
    lower: [f64; 3],
    upper: [f64; 3],
}

impl Boundary {
    /// Builds a boundary from two arbitrary opposite corners.
    pub fn new(world: Option<String>, a: (f64, f64, f64), b: (f64, f64, f64)) -> Self {
        Self {
            world,
            lower: [a.0.min(b.0), a.1.min(b.1), a.2.min(b.2)],
            upper: [a.0.max(b.0), a.1.max(b.1), a.2.max(b.2)],
        }
    }

    pub fn world(&self) -> Option<&str> {
        self.world.as_deref()
    }

    pub fn lower(&self) -> (f64, f64, f64) {
        (self.lower[0], self.lower[1], self.lower[2])
    }

    pub fn upper(&self) -> (f64, f64, f64) {
        (self.upper[0], self.upper[1], self.upper[2])
    }

    /// A location with an explicit world only matches a boundary of the same
    /// world; an unnamed location is compared by coordinates alone.
    pub fn contains(&self, location: &Location3D) -> bool {
        if let (Some(mine), Some(theirs)) = (self.world.as_deref(), location.world.as_deref())
            && mine != theirs
        {
            return false;
        }
        let point = [location.x, location.y, location.z];
        point
            .iter()
            .zip(self.lower.iter().zip(self.upper.iter()))
            .all(|(p, (lo, hi))| lo <= p && p <= hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_pos_floors_negative_coordinates() {
        let loc = Location3D::in_world("w", -0.5, 64.99, -17.0);
        assert_eq!(loc.block_pos(), BlockPos::new(-1, 64, -17));
    }

    #[test]
    fn boundary_normalizes_corners() {
        let b = Boundary::new(None, (10.0, 0.0, 5.0), (-10.0, 20.0, -5.0));
        assert_eq!(b.lower(), (-10.0, 0.0, -5.0));
        assert_eq!(b.upper(), (10.0, 20.0, 5.0));
        assert!(b.contains(&Location3D::new(None, 10.0, 20.0, 5.0)));
        assert!(!b.contains(&Location3D::new(None, 10.1, 0.0, 0.0)));
    }

    #[test]
    fn boundary_rejects_other_worlds() {
        let b = Boundary::new(Some("arena".into()), (0.0, 0.0, 0.0), (5.0, 5.0, 5.0));
        assert!(b.contains(&Location3D::in_world("arena", 1.0, 1.0, 1.0)));
        assert!(!b.contains(&Location3D::in_world("lobby", 1.0, 1.0, 1.0)));
        assert!(b.contains(&Location3D::new(None, 1.0, 1.0, 1.0)));
    }

    mod prop {
        use super::*;
        use proptest::prelude::*;

        fn corner() -> impl Strategy<Value = (f64, f64, f64)> {
            (-1000.0..1000.0f64, -64.0..320.0f64, -1000.0..1000.0f64)
        }

        proptest! {
            #[test]
            fn corner_order_does_not_matter(a in corner(), b in corner(), p in corner()) {
                let forward = Boundary::new(None, a, b);
                let backward = Boundary::new(None, b, a);
                let loc = Location3D::new(None, p.0, p.1, p.2);
                prop_assert_eq!(forward.contains(&loc), backward.contains(&loc));
                prop_assert!(forward.contains(&Location3D::new(None, a.0, a.1, a.2)));
            }

            #[test]
            fn block_pos_stays_within_one_block(x in -1.0e6..1.0e6f64) {
                let pos = Location3D::new(None, x, 0.0, 0.0).block_pos();
                let origin = f64::from(pos.x);
                prop_assert!(origin <= x && x < origin + 1.0);
            }
        }
    }
}
