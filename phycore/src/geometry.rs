use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

use crate::units::Length;

/// Position of an antenna in metres.
///
/// Only the horizontal plane matters for obstacle intersection, the
/// height is included in distances.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Default)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coord {
    pub const ZERO: Coord = Coord {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f64, y: f64, z: f64) -> Coord {
        Coord { x, y, z }
    }

    pub const fn planar(x: f64, y: f64) -> Coord {
        Coord { x, y, z: 0.0 }
    }

    pub fn sqr_distance(self, other: Coord) -> f64 {
        let d = self - other;
        d.x * d.x + d.y * d.y + d.z * d.z
    }

    pub fn distance(self, other: Coord) -> Length {
        Length::from_metres(self.sqr_distance(other).sqrt())
    }

    /// Squared distance on a playground that wraps around at its borders.
    /// The shortest of the wrapped offsets is used on every axis.
    pub fn sqr_torus_distance(self, other: Coord, playground: Coord) -> f64 {
        let wrapped = |a: f64, b: f64, size: f64| {
            let direct = (a - b).abs();
            if size > 0.0 {
                direct.min(size - direct)
            } else {
                direct
            }
        };

        let dx = wrapped(self.x, other.x, playground.x);
        let dy = wrapped(self.y, other.y, playground.y);
        let dz = wrapped(self.z, other.z, playground.z);

        dx * dx + dy * dy + dz * dz
    }

    pub fn point_lerp(self, lerp: f64, other: Coord) -> Coord {
        self * (1.0 - lerp) + other * lerp
    }
}

impl Sub for Coord {
    type Output = Coord;

    fn sub(self, rhs: Self) -> Self::Output {
        Coord {
            x: self.x - rhs.x,
            y: self.y - rhs.y,
            z: self.z - rhs.z,
        }
    }
}

impl Add for Coord {
    type Output = Coord;

    fn add(self, rhs: Self) -> Self::Output {
        Coord {
            x: self.x + rhs.x,
            y: self.y + rhs.y,
            z: self.z + rhs.z,
        }
    }
}

impl Mul<f64> for Coord {
    type Output = Coord;

    fn mul(self, rhs: f64) -> Self::Output {
        Coord {
            x: self.x * rhs,
            y: self.y * rhs,
            z: self.z * rhs,
        }
    }
}

/// Returns where along `p1 -> p2` (as a fraction in `[0, 1]`) the segment
/// crosses `p3 -> p4` in the horizontal plane, or `None` if it doesn't.
pub fn segments_intersect_at(p1: Coord, p2: Coord, p3: Coord, p4: Coord) -> Option<f64> {
    let p1_to_p2 = p2 - p1;
    let p3_to_p4 = p4 - p3;

    let denominator = p3_to_p4.y * p1_to_p2.x - p3_to_p4.x * p1_to_p2.y;

    // parallel (or degenerate) segments never count as a crossing
    if denominator == 0.0 {
        return None;
    }

    let p3_to_p1 = p1 - p3;
    let along_first = (p3_to_p4.x * p3_to_p1.y - p3_to_p4.y * p3_to_p1.x) / denominator;
    if !(0.0..=1.0).contains(&along_first) {
        return None;
    }

    let along_second = (p1_to_p2.x * p3_to_p1.y - p1_to_p2.y * p3_to_p1.x) / denominator;
    if !(0.0..=1.0).contains(&along_second) {
        return None;
    }

    Some(along_first)
}

/// Even-odd rule point in polygon test in the horizontal plane.
pub fn point_in_polygon(point: Coord, shape: &[Coord]) -> bool {
    let mut inside = false;
    let mut j = shape.len().wrapping_sub(1);

    for (i, a) in shape.iter().enumerate() {
        let b = shape[j];
        if (a.y > point.y) != (b.y > point.y)
            && point.x < (b.x - a.x) * (point.y - a.y) / (b.y - a.y) + a.x
        {
            inside = !inside;
        }
        j = i;
    }

    inside
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assert_close;

    #[test]
    fn distance_includes_height() {
        let a = Coord::new(0.0, 0.0, 0.0);
        let b = Coord::new(3.0, 4.0, 12.0);
        assert_close(a.distance(b).metres(), 13.0);
        assert_close(a.sqr_distance(b), 169.0);
    }

    #[test]
    fn torus_distance_wraps() {
        let playground = Coord::new(100.0, 100.0, 0.0);
        let a = Coord::planar(5.0, 50.0);
        let b = Coord::planar(95.0, 50.0);
        assert_close(a.sqr_torus_distance(b, playground), 100.0);
        assert_close(a.sqr_distance(b), 8100.0);
    }

    #[test]
    fn crossing_segments() {
        let at = segments_intersect_at(
            Coord::planar(0.0, 0.0),
            Coord::planar(10.0, 0.0),
            Coord::planar(2.5, -1.0),
            Coord::planar(2.5, 1.0),
        );
        assert_close(at.unwrap(), 0.25);

        let miss = segments_intersect_at(
            Coord::planar(0.0, 0.0),
            Coord::planar(10.0, 0.0),
            Coord::planar(12.0, -1.0),
            Coord::planar(12.0, 1.0),
        );
        assert!(miss.is_none());
    }

    #[test]
    fn polygon_containment() {
        let square = [
            Coord::planar(0.0, 0.0),
            Coord::planar(10.0, 0.0),
            Coord::planar(10.0, 10.0),
            Coord::planar(0.0, 10.0),
        ];
        assert!(point_in_polygon(Coord::planar(5.0, 5.0), &square));
        assert!(!point_in_polygon(Coord::planar(15.0, 5.0), &square));
    }
}
