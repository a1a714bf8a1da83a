use nalgebra::{Matrix3, Point2, Point3, Rotation3, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Pinhole intrinsics without skew.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    pub fn matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    /// Row-major 3x3 camera matrix.
    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.fx, 0.0, self.cx],
            [0.0, self.fy, self.cy],
            [0.0, 0.0, 1.0],
        ]
    }

    #[inline]
    pub fn to_pixel(&self, n: Vector2<f64>) -> Point2<f64> {
        Point2::new(self.fx * n.x + self.cx, self.fy * n.y + self.cy)
    }

    #[inline]
    pub fn to_normalized(&self, p: Point2<f64>) -> Vector2<f64> {
        Vector2::new((p.x - self.cx) / self.fx, (p.y - self.cy) / self.fy)
    }

    pub fn is_valid(&self) -> bool {
        [self.fx, self.fy, self.cx, self.cy]
            .iter()
            .all(|v| v.is_finite())
            && self.fx > 0.0
            && self.fy > 0.0
    }
}

/// Brown-Conrady distortion in OpenCV's five-coefficient order
/// `(k1, k2, p1, p2, k3)`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Distortion {
    pub k1: f64,
    pub k2: f64,
    pub p1: f64,
    pub p2: f64,
    pub k3: f64,
}

impl Distortion {
    pub fn to_array(&self) -> [f64; 5] {
        [self.k1, self.k2, self.p1, self.p2, self.k3]
    }

    pub fn from_array(c: [f64; 5]) -> Self {
        Self {
            k1: c[0],
            k2: c[1],
            p1: c[2],
            p2: c[3],
            k3: c[4],
        }
    }

    pub fn is_zero(&self) -> bool {
        self.to_array().iter().all(|&c| c == 0.0)
    }

    /// Map an ideal normalized point to its distorted position.
    #[inline]
    pub fn distort(&self, n: Vector2<f64>) -> Vector2<f64> {
        let (x, y) = (n.x, n.y);
        let r2 = x * x + y * y;
        let radial = 1.0 + r2 * (self.k1 + r2 * (self.k2 + r2 * self.k3));
        let xy2 = 2.0 * x * y;
        Vector2::new(
            x * radial + self.p1 * xy2 + self.p2 * (r2 + 2.0 * x * x),
            y * radial + self.p1 * (r2 + 2.0 * y * y) + self.p2 * xy2,
        )
    }
}

/// Board-to-camera transform as a Rodrigues vector and a translation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewPose {
    pub rotation: [f64; 3],
    pub translation: [f64; 3],
}

impl ViewPose {
    pub fn from_parts(rotation: &Rotation3<f64>, translation: Vector3<f64>) -> Self {
        let r = rotation.scaled_axis();
        Self {
            rotation: [r.x, r.y, r.z],
            translation: [translation.x, translation.y, translation.z],
        }
    }

    pub fn rotation(&self) -> Rotation3<f64> {
        Rotation3::new(Vector3::from(self.rotation))
    }

    pub fn translation(&self) -> Vector3<f64> {
        Vector3::from(self.translation)
    }
}

/// Project a board point through pose, distortion and intrinsics.
pub fn project_point(
    intr: &Intrinsics,
    dist: &Distortion,
    rotation: &Rotation3<f64>,
    translation: &Vector3<f64>,
    object: &Point3<f64>,
) -> Point2<f64> {
    let pc = rotation * object.coords + translation;
    let n = Vector2::new(pc.x / pc.z, pc.y / pc.z);
    intr.to_pixel(dist.distort(n))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn zero_distortion_is_identity() {
        let d = Distortion::default();
        assert!(d.is_zero());
        let n = Vector2::new(0.3, -0.2);
        assert_eq!(d.distort(n), n);
    }

    #[test]
    fn radial_and_tangential_terms() {
        let d = Distortion {
            k1: 0.1,
            k2: 0.01,
            p1: 0.001,
            p2: -0.002,
            k3: 0.0,
        };
        let (x, y) = (0.5, 0.25);
        let r2: f64 = x * x + y * y;
        let radial = 1.0 + 0.1 * r2 + 0.01 * r2 * r2;
        let ex = x * radial + 2.0 * 0.001 * x * y + -0.002 * (r2 + 2.0 * x * x);
        let ey = y * radial + 0.001 * (r2 + 2.0 * y * y) + 2.0 * -0.002 * x * y;
        let got = d.distort(Vector2::new(x, y));
        assert_relative_eq!(got.x, ex, epsilon = 1e-12);
        assert_relative_eq!(got.y, ey, epsilon = 1e-12);
    }

    #[test]
    fn pose_round_trips_rodrigues() {
        let rot = Rotation3::from_euler_angles(0.2, -0.1, 0.4);
        let pose = ViewPose::from_parts(&rot, Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(pose.rotation().matrix(), rot.matrix(), epsilon = 1e-12);
        assert_eq!(pose.translation(), Vector3::new(1.0, 2.0, 3.0));
    }
}
