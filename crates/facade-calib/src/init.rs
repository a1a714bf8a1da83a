//! Closed-form initial guesses: intrinsics from plane homographies and
//! per-view poses.

use log::debug;
use nalgebra::{DMatrix, DVector, Matrix3, Rotation3, SVector, Vector3};

use crate::camera::{Intrinsics, ViewPose};
use crate::error::CalibrationError;

fn v_ij(h: &Matrix3<f64>, i: usize, j: usize) -> SVector<f64, 6> {
    let hi = h.column(i);
    let hj = h.column(j);
    SVector::<f64, 6>::from_row_slice(&[
        hi[0] * hj[0],
        hi[0] * hj[1] + hi[1] * hj[0],
        hi[1] * hj[1],
        hi[2] * hj[0] + hi[0] * hj[2],
        hi[2] * hj[1] + hi[1] * hj[2],
        hi[2] * hj[2],
    ])
}

/// Zhang's closed-form intrinsics from three or more plane homographies.
///
/// Skew is estimated by the linear system and then dropped.
pub fn zhang_intrinsics(homographies: &[Matrix3<f64>]) -> Result<Intrinsics, CalibrationError> {
    if homographies.len() < 3 {
        return Err(CalibrationError::DegenerateIntrinsics("need at least 3 views"));
    }

    let mut v = DMatrix::<f64>::zeros(2 * homographies.len(), 6);
    for (k, h) in homographies.iter().enumerate() {
        // Column scale does not matter; normalise for conditioning.
        let h = h / h.norm();
        v.row_mut(2 * k).copy_from(&v_ij(&h, 0, 1).transpose());
        v.row_mut(2 * k + 1)
            .copy_from(&(v_ij(&h, 0, 0) - v_ij(&h, 1, 1)).transpose());
    }

    let svd = v.svd(false, true);
    let vt = svd
        .v_t
        .ok_or(CalibrationError::DegenerateIntrinsics("SVD failed"))?;
    let (min_idx, _) = svd
        .singular_values
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.total_cmp(b.1))
        .ok_or(CalibrationError::DegenerateIntrinsics("SVD failed"))?;
    let b = vt.row(min_idx);
    let (b11, b12, b22, b13, b23, b33) = (b[0], b[1], b[2], b[3], b[4], b[5]);

    let denom = b11 * b22 - b12 * b12;
    if denom.abs() <= 1e-12 * (b11 * b11 + b22 * b22) || b11.abs() < f64::MIN_POSITIVE {
        return Err(CalibrationError::DegenerateIntrinsics(
            "singular absolute conic",
        ));
    }

    let cy = (b12 * b13 - b11 * b23) / denom;
    let lambda = b33 - (b13 * b13 + cy * (b12 * b13 - b11 * b23)) / b11;
    if lambda / b11 <= 0.0 || lambda * b11 / denom <= 0.0 {
        return Err(CalibrationError::DegenerateIntrinsics("inconsistent signs"));
    }

    let fx = (lambda / b11).sqrt();
    let fy = (lambda * b11 / denom).sqrt();
    let skew = -b12 * fx * fx * fy / lambda;
    let cx = skew * cy / fy - b13 * fx * fx / lambda;

    let intr = Intrinsics { fx, fy, cx, cy };
    if !intr.is_valid() {
        return Err(CalibrationError::DegenerateIntrinsics("non-finite focal length"));
    }
    debug!("zhang init fx={fx:.2} fy={fy:.2} cx={cx:.2} cy={cy:.2} skew={skew:.3e}");
    Ok(intr)
}

/// Focal lengths from vanishing-point orthogonality with the principal
/// point fixed at the image centre. Works from a single view.
pub fn centered_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: (u32, u32),
) -> Result<Intrinsics, CalibrationError> {
    if homographies.is_empty() {
        return Err(CalibrationError::NoViews);
    }
    let cx = (image_size.0 as f64 - 1.0) * 0.5;
    let cy = (image_size.1 as f64 - 1.0) * 0.5;
    let shift = Matrix3::new(1.0, 0.0, -cx, 0.0, 1.0, -cy, 0.0, 0.0, 1.0);

    let n = homographies.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 2);
    let mut rhs = DVector::<f64>::zeros(2 * n);
    for (k, h) in homographies.iter().enumerate() {
        let h = shift * h;
        let c0: Vector3<f64> = h.column(0).into_owned();
        let c1: Vector3<f64> = h.column(1).into_owned();
        let dirs = [c0, c1, (c0 + c1) * 0.5, (c0 - c1) * 0.5].map(|d| {
            let norm = d.norm();
            if norm > 0.0 {
                d / norm
            } else {
                d
            }
        });
        for (row, (p, q)) in [(0, (0, 1)), (1, (2, 3))] {
            let (p, q) = (&dirs[p], &dirs[q]);
            a[(2 * k + row, 0)] = p.x * q.x;
            a[(2 * k + row, 1)] = p.y * q.y;
            rhs[2 * k + row] = -p.z * q.z;
        }
    }

    let f = a
        .svd(true, true)
        .solve(&rhs, 1e-15)
        .map_err(CalibrationError::DegenerateIntrinsics)?;
    let fx = (1.0 / f[0]).abs().sqrt();
    let fy = (1.0 / f[1]).abs().sqrt();
    let intr = Intrinsics { fx, fy, cx, cy };
    if !intr.is_valid() {
        return Err(CalibrationError::DegenerateIntrinsics(
            "vanishing points are parallel",
        ));
    }
    debug!("centered init fx={fx:.2} fy={fy:.2}");
    Ok(intr)
}

/// Zhang when possible; otherwise the centred-principal-point solve.
pub fn initial_intrinsics(
    homographies: &[Matrix3<f64>],
    image_size: (u32, u32),
) -> Result<Intrinsics, CalibrationError> {
    let (w, h) = (image_size.0 as f64, image_size.1 as f64);
    match zhang_intrinsics(homographies) {
        Ok(intr) if intr.cx > 0.0 && intr.cx < w && intr.cy > 0.0 && intr.cy < h => Ok(intr),
        Ok(intr) => {
            debug!(
                "zhang principal point ({:.1}, {:.1}) outside the image, using centre",
                intr.cx, intr.cy
            );
            centered_intrinsics(homographies, image_size)
        }
        Err(err) => {
            debug!("zhang init unavailable ({err}), using centre");
            centered_intrinsics(homographies, image_size)
        }
    }
}

/// Decompose `H ~ K [r1 r2 t]` for a board on `z = 0`.
///
/// The sign is chosen so the board lies in front of the camera and the
/// rotation is projected onto SO(3).
pub fn pose_from_homography(intr: &Intrinsics, h: &Matrix3<f64>) -> Option<ViewPose> {
    let k_inv = intr.matrix().try_inverse()?;
    let m = k_inv * h;
    let (m1, m2, m3) = (
        m.column(0).into_owned(),
        m.column(1).into_owned(),
        m.column(2).into_owned(),
    );
    let scale = 0.5 * (m1.norm() + m2.norm());
    if scale <= f64::EPSILON {
        return None;
    }
    let mut lambda = 1.0 / scale;
    if m3.z * lambda < 0.0 {
        lambda = -lambda;
    }

    let r1 = m1 * lambda;
    let r2 = m2 * lambda;
    let r3 = r1.cross(&r2);
    let approx = Matrix3::from_columns(&[r1, r2, r3]);

    let svd = approx.svd(true, true);
    let (u, vt) = (svd.u?, svd.v_t?);
    let mut r = u * vt;
    if r.determinant() < 0.0 {
        let mut u = u;
        u.column_mut(2).neg_mut();
        r = u * vt;
    }
    let rotation = Rotation3::from_matrix_unchecked(r);
    Some(ViewPose::from_parts(&rotation, m3 * lambda))
}
