//! Geometry primitives shared across the pipeline.
//!
//! Mirrors the simulator's left-handed coordinate frame: x forward,
//! y right, z up. All distances in metres.

use serde::{Deserialize, Serialize};

/// A point in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Location {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Euclidean distance to another location.
    pub fn distance(&self, other: Location) -> f32 {
        self.distance_squared(other).sqrt()
    }

    /// Squared distance; cheaper when only comparing.
    pub fn distance_squared(&self, other: Location) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        dx * dx + dy * dy + dz * dz
    }
}

impl std::ops::Add<Vector3D> for Location {
    type Output = Location;

    fn add(self, v: Vector3D) -> Location {
        Location::new(self.x + v.x, self.y + v.y, self.z + v.z)
    }
}

impl std::ops::Sub<Location> for Location {
    type Output = Vector3D;

    fn sub(self, other: Location) -> Vector3D {
        Vector3D::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// A free vector in world space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vector3D {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3D {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn length(&self) -> f32 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// Unit vector in the same direction. Zero-length input returns zero.
    pub fn unit(&self) -> Vector3D {
        let len = self.length();
        if len > f32::EPSILON {
            Vector3D::new(self.x / len, self.y / len, self.z / len)
        } else {
            Vector3D::default()
        }
    }

    pub fn dot(&self, other: Vector3D) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// z-component of the cross product; sign gives left/right of heading
    /// in the ground plane.
    pub fn cross_z(&self, other: Vector3D) -> f32 {
        self.x * other.y - self.y * other.x
    }

    /// Perpendicular in the ground plane (rotated +90° in a left-handed frame).
    pub fn perpendicular(&self) -> Vector3D {
        Vector3D::new(-self.y, self.x, 0.0)
    }
}

impl std::ops::Mul<f32> for Vector3D {
    type Output = Vector3D;

    fn mul(self, s: f32) -> Vector3D {
        Vector3D::new(self.x * s, self.y * s, self.z * s)
    }
}

impl std::ops::Neg for Vector3D {
    type Output = Vector3D;

    fn neg(self) -> Vector3D {
        Vector3D::new(-self.x, -self.y, -self.z)
    }
}

impl std::ops::Add for Vector3D {
    type Output = Vector3D;

    fn add(self, other: Vector3D) -> Vector3D {
        Vector3D::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }
}

impl std::ops::Sub for Vector3D {
    type Output = Vector3D;

    fn sub(self, other: Vector3D) -> Vector3D {
        Vector3D::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }
}

/// Orientation as pitch/yaw/roll in degrees.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotation {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rotation {
    /// Forward unit vector for this orientation.
    pub fn forward_vector(&self) -> Vector3D {
        let pitch = self.pitch.to_radians();
        let yaw = self.yaw.to_radians();
        Vector3D::new(
            pitch.cos() * yaw.cos(),
            pitch.cos() * yaw.sin(),
            pitch.sin(),
        )
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub location: Location,
    pub rotation: Rotation,
}

impl Transform {
    pub fn forward_vector(&self) -> Vector3D {
        self.rotation.forward_vector()
    }
}

/// Axis-aligned half-extents of an actor, in its local frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Half-length along the heading.
    pub extent_x: f32,
    /// Half-width.
    pub extent_y: f32,
    /// Half-height.
    pub extent_z: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distance() {
        let a = Location::new(0.0, 0.0, 0.0);
        let b = Location::new(3.0, 4.0, 0.0);
        assert_eq!(a.distance(b), 5.0);
        assert_eq!(a.distance_squared(b), 25.0);
    }

    #[test]
    fn test_unit_vector() {
        let v = Vector3D::new(10.0, 0.0, 0.0);
        assert_eq!(v.unit(), Vector3D::new(1.0, 0.0, 0.0));
        assert_eq!(Vector3D::default().unit(), Vector3D::default());
    }

    #[test]
    fn test_forward_vector_yaw() {
        let r = Rotation {
            pitch: 0.0,
            yaw: 90.0,
            roll: 0.0,
        };
        let f = r.forward_vector();
        assert!(f.x.abs() < 1e-6);
        assert!((f.y - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cross_z_sign() {
        let heading = Vector3D::new(1.0, 0.0, 0.0);
        let left = Vector3D::new(0.0, -1.0, 0.0);
        let right = Vector3D::new(0.0, 1.0, 0.0);
        assert!(heading.cross_z(right) > 0.0);
        assert!(heading.cross_z(left) < 0.0);
    }
}
