//! Levenberg-Marquardt refinement of intrinsics, distortion and per-view
//! poses by reprojection error.
//!
//! The parameter vector is `[fx, fy, cx, cy, k1, k2, p1, p2]`, then `k3`
//! unless it is fixed, then `[rx, ry, rz, tx, ty, tz]` per view. Each view's
//! residuals depend only on the shared block and its own pose block, so the
//! Jacobian is filled view by view from central differences.

use levenberg_marquardt::{LeastSquaresProblem, LevenbergMarquardt};
use log::debug;
use nalgebra::{storage::Owned, DMatrix, DVector, Dyn, Point2, Point3, Rotation3, Vector3};
use serde::{Deserialize, Serialize};

use crate::camera::{project_point, Distortion, Intrinsics, ViewPose};

const N_SHARED: usize = 9;
const N_POSE: usize = 6;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RefineParams {
    /// Solver patience; the evaluation budget is this times the parameter
    /// count plus one.
    pub max_iters: usize,
    /// Stop when the relative cost decrease falls below this.
    pub cost_tolerance: f64,
    /// Stop when the step is this small relative to the parameters.
    pub step_tolerance: f64,
    /// Stop when the residuals are this close to orthogonal to the Jacobian.
    pub gradient_tolerance: f64,
    /// Keep `k3` at zero.
    pub fix_k3: bool,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            max_iters: 100,
            cost_tolerance: 1e-12,
            step_tolerance: 1e-12,
            gradient_tolerance: 0.0,
            fix_k3: false,
        }
    }
}

/// One view's observations.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewCorrespondence {
    pub object: Vec<Point3<f64>>,
    pub image: Vec<Point2<f64>>,
}

#[derive(Clone, Debug)]
pub struct RefineOutcome {
    pub intrinsics: Intrinsics,
    pub distortion: Distortion,
    pub poses: Vec<ViewPose>,
    /// Sum of squared residuals at the solution.
    pub cost: f64,
    /// Residual evaluations spent by the solver.
    pub iterations: usize,
    pub converged: bool,
}

fn shared_block(intr: &Intrinsics, dist: &Distortion) -> [f64; N_SHARED] {
    [
        intr.fx, intr.fy, intr.cx, intr.cy, dist.k1, dist.k2, dist.p1, dist.p2, dist.k3,
    ]
}

fn unpack_shared(x: &[f64]) -> (Intrinsics, Distortion) {
    (
        Intrinsics {
            fx: x[0],
            fy: x[1],
            cx: x[2],
            cy: x[3],
        },
        Distortion {
            k1: x[4],
            k2: x[5],
            p1: x[6],
            p2: x[7],
            k3: x[8],
        },
    )
}

fn view_residuals(shared: &[f64], pose: &[f64], view: &ViewCorrespondence, out: &mut [f64]) {
    let (intr, dist) = unpack_shared(shared);
    let rotation = Rotation3::new(Vector3::new(pose[0], pose[1], pose[2]));
    let translation = Vector3::new(pose[3], pose[4], pose[5]);
    for (k, (obj, img)) in view.object.iter().zip(&view.image).enumerate() {
        let p = project_point(&intr, &dist, &rotation, &translation, obj);
        out[2 * k] = p.x - img.x;
        out[2 * k + 1] = p.y - img.y;
    }
}

fn step_size(v: f64) -> f64 {
    1e-6 * v.abs().max(1.0)
}

/// Central-difference Jacobian of one view against `[shared | pose]`.
fn view_jacobian(shared: &[f64], pose: &[f64], view: &ViewCorrespondence) -> DMatrix<f64> {
    let m = 2 * view.object.len();
    let mut jac = DMatrix::<f64>::zeros(m, N_SHARED + N_POSE);
    let mut plus = vec![0.0; m];
    let mut minus = vec![0.0; m];

    let mut s = shared.to_vec();
    for c in 0..N_SHARED {
        let h = step_size(s[c]);
        let orig = s[c];
        s[c] = orig + h;
        view_residuals(&s, pose, view, &mut plus);
        s[c] = orig - h;
        view_residuals(&s, pose, view, &mut minus);
        s[c] = orig;
        for r in 0..m {
            jac[(r, c)] = (plus[r] - minus[r]) / (2.0 * h);
        }
    }

    let mut p = pose.to_vec();
    for c in 0..N_POSE {
        let h = step_size(p[c]);
        let orig = p[c];
        p[c] = orig + h;
        view_residuals(shared, &p, view, &mut plus);
        p[c] = orig - h;
        view_residuals(shared, &p, view, &mut minus);
        p[c] = orig;
        for r in 0..m {
            jac[(r, N_SHARED + c)] = (plus[r] - minus[r]) / (2.0 * h);
        }
    }
    jac
}

/// Stacked reprojection residuals of all views.
struct ReprojectionProblem<'a> {
    views: &'a [ViewCorrespondence],
    fix_k3: bool,
    params: DVector<f64>,
}

impl<'a> ReprojectionProblem<'a> {
    fn new(
        views: &'a [ViewCorrespondence],
        intrinsics: &Intrinsics,
        distortion: &Distortion,
        poses: &[ViewPose],
        fix_k3: bool,
    ) -> Self {
        let n_shared = if fix_k3 { N_SHARED - 1 } else { N_SHARED };
        let mut params = DVector::<f64>::zeros(n_shared + N_POSE * views.len());
        let shared = shared_block(intrinsics, distortion);
        params.as_mut_slice()[..n_shared].copy_from_slice(&shared[..n_shared]);
        for (v, pose) in poses.iter().enumerate() {
            let start = n_shared + N_POSE * v;
            let slot = &mut params.as_mut_slice()[start..start + N_POSE];
            slot[..3].copy_from_slice(&pose.rotation);
            slot[3..].copy_from_slice(&pose.translation);
        }
        Self {
            views,
            fix_k3,
            params,
        }
    }

    fn n_shared(&self) -> usize {
        if self.fix_k3 {
            N_SHARED - 1
        } else {
            N_SHARED
        }
    }

    fn n_residuals(&self) -> usize {
        self.views.iter().map(|v| 2 * v.object.len()).sum()
    }

    /// Full shared block, with a fixed `k3` restored as zero.
    fn shared(&self) -> [f64; N_SHARED] {
        let mut out = [0.0; N_SHARED];
        let n = self.n_shared();
        out[..n].copy_from_slice(&self.params.as_slice()[..n]);
        out
    }

    fn pose(&self, v: usize) -> &[f64] {
        let start = self.n_shared() + N_POSE * v;
        &self.params.as_slice()[start..start + N_POSE]
    }

    fn outcome(&self, cost: f64, iterations: usize, converged: bool) -> RefineOutcome {
        let (intrinsics, distortion) = unpack_shared(&self.shared());
        let poses = (0..self.views.len())
            .map(|v| {
                let p = self.pose(v);
                ViewPose {
                    rotation: [p[0], p[1], p[2]],
                    translation: [p[3], p[4], p[5]],
                }
            })
            .collect();
        RefineOutcome {
            intrinsics,
            distortion,
            poses,
            cost,
            iterations,
            converged,
        }
    }
}

impl LeastSquaresProblem<f64, Dyn, Dyn> for ReprojectionProblem<'_> {
    type ResidualStorage = Owned<f64, Dyn>;
    type JacobianStorage = Owned<f64, Dyn, Dyn>;
    type ParameterStorage = Owned<f64, Dyn>;

    fn set_params(&mut self, x: &DVector<f64>) {
        self.params.clone_from(x);
    }

    fn params(&self) -> DVector<f64> {
        self.params.clone()
    }

    fn residuals(&self) -> Option<DVector<f64>> {
        let shared = self.shared();
        let mut out = DVector::<f64>::zeros(self.n_residuals());
        let mut row = 0;
        for (v, view) in self.views.iter().enumerate() {
            let m = 2 * view.object.len();
            view_residuals(&shared, self.pose(v), view, &mut out.as_mut_slice()[row..row + m]);
            row += m;
        }
        out.iter().all(|r| r.is_finite()).then_some(out)
    }

    fn jacobian(&self) -> Option<DMatrix<f64>> {
        let shared = self.shared();
        let n_shared = self.n_shared();
        let mut jac = DMatrix::<f64>::zeros(self.n_residuals(), self.params.len());
        let mut row = 0;
        for (v, view) in self.views.iter().enumerate() {
            let local = view_jacobian(&shared, self.pose(v), view);
            let m = local.nrows();
            jac.view_mut((row, 0), (m, n_shared))
                .copy_from(&local.view((0, 0), (m, n_shared)));
            jac.view_mut((row, n_shared + N_POSE * v), (m, N_POSE))
                .copy_from(&local.view((0, N_SHARED), (m, N_POSE)));
            row += m;
        }
        jac.iter().all(|j| j.is_finite()).then_some(jac)
    }
}

/// Minimise reprojection error starting from the given estimates.
pub fn refine_calibration(
    views: &[ViewCorrespondence],
    intrinsics: Intrinsics,
    distortion: Distortion,
    poses: &[ViewPose],
    params: &RefineParams,
) -> RefineOutcome {
    let problem = ReprojectionProblem::new(views, &intrinsics, &distortion, poses, params.fix_k3);
    let lm = LevenbergMarquardt::new()
        .with_ftol(params.cost_tolerance)
        .with_xtol(params.step_tolerance)
        .with_gtol(params.gradient_tolerance)
        .with_patience(params.max_iters.max(1));

    let (problem, report) = lm.minimize(problem);
    let cost = problem
        .residuals()
        .map_or(f64::INFINITY, |r| r.norm_squared());
    let converged = report.termination.was_successful();
    debug!(
        "lm finished after {} evaluations ({:?}), cost {cost:.6e}",
        report.number_of_evaluations, report.termination
    );
    problem.outcome(cost, report.number_of_evaluations, converged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn view(intr: &Intrinsics, dist: &Distortion, pose: &ViewPose) -> ViewCorrespondence {
        let object: Vec<Point3<f64>> = (0..6)
            .flat_map(|r| (0..9).map(move |c| Point3::new(c as f64 * 30.0, r as f64 * 30.0, 0.0)))
            .collect();
        let image = object
            .iter()
            .map(|o| project_point(intr, dist, &pose.rotation(), &pose.translation(), o))
            .collect();
        ViewCorrespondence { object, image }
    }

    #[test]
    fn recovers_perturbed_parameters() {
        let intr = Intrinsics {
            fx: 800.0,
            fy: 790.0,
            cx: 320.0,
            cy: 240.0,
        };
        let dist = Distortion {
            k1: -0.1,
            k2: 0.02,
            ..Distortion::default()
        };
        let poses = [
            ((0.2, -0.1, 0.05), Vector3::new(-120.0, -80.0, 700.0)),
            ((-0.15, 0.2, -0.1), Vector3::new(-100.0, -60.0, 650.0)),
            ((0.05, 0.25, 0.2), Vector3::new(-140.0, -90.0, 800.0)),
        ]
        .map(|((r, p, y), t)| ViewPose::from_parts(&Rotation3::from_euler_angles(r, p, y), t));
        let views: Vec<_> = poses.iter().map(|p| view(&intr, &dist, p)).collect();

        let start = Intrinsics {
            fx: 770.0,
            fy: 770.0,
            cx: 330.0,
            cy: 230.0,
        };
        let start_poses: Vec<ViewPose> = poses
            .iter()
            .map(|p| ViewPose {
                rotation: [p.rotation[0] + 0.01, p.rotation[1] - 0.01, p.rotation[2]],
                translation: [p.translation[0] + 3.0, p.translation[1], p.translation[2] - 10.0],
            })
            .collect();

        let out = refine_calibration(
            &views,
            start,
            Distortion::default(),
            &start_poses,
            &RefineParams {
                fix_k3: true,
                ..RefineParams::default()
            },
        );
        assert!(out.cost < 1e-8, "cost {}", out.cost);
        assert_relative_eq!(out.intrinsics.fx, 800.0, epsilon = 1e-2);
        assert_relative_eq!(out.intrinsics.fy, 790.0, epsilon = 1e-2);
        assert_relative_eq!(out.intrinsics.cx, 320.0, epsilon = 1e-2);
        assert_relative_eq!(out.intrinsics.cy, 240.0, epsilon = 1e-2);
        assert_relative_eq!(out.distortion.k1, -0.1, epsilon = 1e-4);
        assert_eq!(out.distortion.k3, 0.0);
        assert!(out.converged);
    }

    #[test]
    fn jacobian_has_one_pose_block_per_view() {
        let intr = Intrinsics {
            fx: 600.0,
            fy: 600.0,
            cx: 320.0,
            cy: 240.0,
        };
        let dist = Distortion::default();
        let poses = [
            ViewPose::from_parts(&Rotation3::identity(), Vector3::new(-120.0, -75.0, 600.0)),
            ViewPose::from_parts(
                &Rotation3::from_euler_angles(0.1, -0.2, 0.0),
                Vector3::new(-100.0, -70.0, 700.0),
            ),
        ];
        let views: Vec<_> = poses.iter().map(|p| view(&intr, &dist, p)).collect();

        let fixed = ReprojectionProblem::new(&views, &intr, &dist, &poses, true);
        let jac = fixed.jacobian().expect("finite jacobian");
        assert_eq!(jac.shape(), (4 * 54, 8 + 2 * N_POSE));
        // View 0 rows never touch view 1's pose columns.
        assert!(jac.view((0, 8 + N_POSE), (108, N_POSE)).iter().all(|&j| j == 0.0));
        assert!(jac.view((108, 8), (108, N_POSE)).iter().all(|&j| j == 0.0));
        assert!(fixed.residuals().expect("residuals").norm() < 1e-9);

        let free = ReprojectionProblem::new(&views, &intr, &dist, &poses, false);
        assert_eq!(free.params().len(), N_SHARED + 2 * N_POSE);
        assert_eq!(free.jacobian().expect("finite jacobian").ncols(), N_SHARED + 2 * N_POSE);
    }
}
