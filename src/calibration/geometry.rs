//! # Projective geometry
//!
//! Pinhole projection with radial-tangential distortion, homography estimation, closed form
//! initialisation of intrinsics and poses, and a dense Levenberg-Marquardt solver used to refine
//! them.
//!
//! Distortion coefficients are always ordered `(k1, k2, p1, p2, k3)`.

// -----------------------------------------------------------------------------------------------
// IMPORTS
// -----------------------------------------------------------------------------------------------

use nalgebra::{
    DMatrix, DVector, Matrix3, Point2, Point3, Rotation3, SMatrix, SymmetricEigen, Vector2,
    Vector3, Vector5
};

use crate::chessboard::TermCriteria;

// -----------------------------------------------------------------------------------------------
// CONSTANTS
// -----------------------------------------------------------------------------------------------

/// Fixed point iterations used to invert the distortion model.
const UNDISTORT_ITERATIONS: usize = 20;

// -----------------------------------------------------------------------------------------------
// DATA STRUCTURES
// -----------------------------------------------------------------------------------------------

/// Rigid transform from board to camera coordinates, rotation as a Rodrigues vector.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pose {
    pub rvec: Vector3<f64>,
    pub tvec: Vector3<f64>
}

// -----------------------------------------------------------------------------------------------
// IMPLEMENTATIONS
// -----------------------------------------------------------------------------------------------

impl Pose {
    pub fn new(rvec: Vector3<f64>, tvec: Vector3<f64>) -> Self {
        Pose { rvec, tvec }
    }

    pub fn rotation(&self) -> Matrix3<f64> {
        rodrigues(&self.rvec)
    }

    /// Transform a board point into camera coordinates.
    pub fn transform(&self, p: &Point3<f64>) -> Vector3<f64> {
        self.rotation() * p.coords + self.tvec
    }

    /// Write the pose into six consecutive parameters.
    pub(crate) fn write_params(&self, params: &mut DVector<f64>, offset: usize) {
        for i in 0..3 {
            params[offset + i] = self.rvec[i];
            params[offset + 3 + i] = self.tvec[i];
        }
    }

    pub(crate) fn from_params(params: &DVector<f64>, offset: usize) -> Self {
        Pose {
            rvec: Vector3::new(params[offset], params[offset + 1], params[offset + 2]),
            tvec: Vector3::new(params[offset + 3], params[offset + 4], params[offset + 5])
        }
    }
}

// -----------------------------------------------------------------------------------------------
// FUNCTIONS
// -----------------------------------------------------------------------------------------------

/// Rotation matrix of a Rodrigues (axis times angle) vector.
pub fn rodrigues(rvec: &Vector3<f64>) -> Matrix3<f64> {
    Rotation3::new(*rvec).into_inner()
}

/// Rodrigues vector of a rotation matrix. The matrix is projected onto the closest rotation
/// first.
pub fn rodrigues_inverse(rot: &Matrix3<f64>) -> Vector3<f64> {
    Rotation3::from_matrix(rot).scaled_axis()
}

/// Skew symmetric cross product matrix `[v]x`.
pub fn cross_matrix(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(0.0, -v.z, v.y, v.z, 0.0, -v.x, -v.y, v.x, 0.0)
}

/// Apply lens distortion to normalised image coordinates.
pub fn distort(p: &Vector2<f64>, dist: &Vector5<f64>) -> Vector2<f64> {
    let (k1, k2, p1, p2, k3) = (dist[0], dist[1], dist[2], dist[3], dist[4]);
    let (x, y) = (p.x, p.y);
    let r2 = x * x + y * y;
    let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
    Vector2::new(
        x * radial + 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x),
        y * radial + p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y
    )
}

/// Remove lens distortion from normalised image coordinates by fixed point iteration.
pub fn undistort_normalised(p: &Vector2<f64>, dist: &Vector5<f64>) -> Vector2<f64> {
    let (k1, k2, p1, p2, k3) = (dist[0], dist[1], dist[2], dist[3], dist[4]);
    let (x0, y0) = (p.x, p.y);
    let (mut x, mut y) = (x0, y0);

    for _ in 0..UNDISTORT_ITERATIONS {
        let r2 = x * x + y * y;
        let icdist = 1.0 / (1.0 + r2 * (k1 + r2 * (k2 + r2 * k3)));
        let dx = 2.0 * p1 * x * y + p2 * (r2 + 2.0 * x * x);
        let dy = p1 * (r2 + 2.0 * y * y) + 2.0 * p2 * x * y;
        x = (x0 - dx) * icdist;
        y = (y0 - dy) * icdist;
    }

    Vector2::new(x, y)
}

/// Project a board point through a pose, the distortion model and the camera matrix.
pub fn project_point(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    pose: &Pose,
    point: &Point3<f64>
) -> Point2<f64> {
    let pc = pose.transform(point);
    let normalised = Vector2::new(pc.x / pc.z, pc.y / pc.z);
    pixel_from_normalised(camera, &distort(&normalised, dist))
}

pub fn project_points(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    pose: &Pose,
    points: &[Point3<f64>]
) -> Vec<Point2<f64>> {
    points
        .iter()
        .map(|p| project_point(camera, dist, pose, p))
        .collect()
}

pub fn pixel_from_normalised(camera: &Matrix3<f64>, p: &Vector2<f64>) -> Point2<f64> {
    Point2::new(
        camera[(0, 0)] * p.x + camera[(0, 1)] * p.y + camera[(0, 2)],
        camera[(1, 1)] * p.y + camera[(1, 2)]
    )
}

pub fn normalised_from_pixel(camera: &Matrix3<f64>, p: &Point2<f64>) -> Vector2<f64> {
    let y = (p.y - camera[(1, 2)]) / camera[(1, 1)];
    let x = (p.x - camera[(0, 2)] - camera[(0, 1)] * y) / camera[(0, 0)];
    Vector2::new(x, y)
}

/// Camera matrix from focal lengths and principal point.
pub fn camera_matrix(fx: f64, fy: f64, cx: f64, cy: f64) -> Matrix3<f64> {
    Matrix3::new(fx, 0.0, cx, 0.0, fy, cy, 0.0, 0.0, 1.0)
}

/// Homography mapping `src` onto `dst` by the normalised direct linear transform.
pub fn find_homography(src: &[Point2<f64>], dst: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    if src.len() != dst.len() || src.len() < 4 {
        return None;
    }

    let t_src = normalising_transform(src)?;
    let t_dst = normalising_transform(dst)?;

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (s, d) in src.iter().zip(dst.iter()) {
        let s = t_src * Vector3::new(s.x, s.y, 1.0);
        let d = t_dst * Vector3::new(d.x, d.y, 1.0);
        let (x, y) = (s.x, s.y);
        let (u, v) = (d.x, d.y);

        let rows = [
            [-x, -y, -1.0, 0.0, 0.0, 0.0, u * x, u * y, u],
            [0.0, 0.0, 0.0, -x, -y, -1.0, v * x, v * y, v]
        ];
        for row in rows.iter() {
            for i in 0..9 {
                for j in 0..9 {
                    ata[(i, j)] += row[i] * row[j];
                }
            }
        }
    }

    let eigen = SymmetricEigen::new(ata);
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))?;
    let h = eigen.eigenvectors.column(min_idx);

    let hn = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);
    let hm = t_dst.try_inverse()? * hn * t_src;

    let scale = hm[(2, 2)];
    if scale.abs() < f64::EPSILON {
        return None;
    }
    Some(hm / scale)
}

/// Similarity moving the centroid to the origin with mean distance `sqrt(2)`.
fn normalising_transform(points: &[Point2<f64>]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;
    if mean_dist < f64::EPSILON {
        return None;
    }
    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

/// Initial camera matrix from board homographies, with the principal point fixed at the image
/// centre and focal lengths solved from the orthogonality of the rotation columns.
pub fn init_camera_matrix(
    homographies: &[Matrix3<f64>],
    image_size: (u32, u32)
) -> Option<Matrix3<f64>> {
    if homographies.is_empty() {
        return None;
    }

    let cx = (image_size.0 as f64 - 1.0) * 0.5;
    let cy = (image_size.1 as f64 - 1.0) * 0.5;

    let mut a = DMatrix::<f64>::zeros(2 * homographies.len(), 2);
    let mut b = DVector::<f64>::zeros(2 * homographies.len());

    for (k, hom) in homographies.iter().enumerate() {
        let mut hm = *hom;
        for c in 0..3 {
            hm[(0, c)] -= hm[(2, c)] * cx;
            hm[(1, c)] -= hm[(2, c)] * cy;
        }

        let h = hm.column(0).into_owned();
        let v = hm.column(1).into_owned();
        let d1 = (h + v) * 0.5;
        let d2 = (h - v) * 0.5;
        let h = h.normalize();
        let v = v.normalize();
        let d1 = d1.normalize();
        let d2 = d2.normalize();

        a[(2 * k, 0)] = h[0] * v[0];
        a[(2 * k, 1)] = h[1] * v[1];
        b[2 * k] = -h[2] * v[2];
        a[(2 * k + 1, 0)] = d1[0] * d2[0];
        a[(2 * k + 1, 1)] = d1[1] * d2[1];
        b[2 * k + 1] = -d1[2] * d2[2];
    }

    let f = a.svd(true, true).solve(&b, 1e-12).ok()?;
    if f[0].abs() < f64::EPSILON || f[1].abs() < f64::EPSILON {
        return None;
    }
    let fx = (1.0 / f[0]).abs().sqrt();
    let fy = (1.0 / f[1]).abs().sqrt();
    if !fx.is_finite() || !fy.is_finite() {
        return None;
    }

    Some(camera_matrix(fx, fy, cx, cy))
}

/// Board pose from the homography between board plane and pixel coordinates.
pub fn pose_from_homography(camera: &Matrix3<f64>, hom: &Matrix3<f64>) -> Option<Pose> {
    let m = camera.try_inverse()? * hom;
    let n1 = m.column(0).norm();
    let n2 = m.column(1).norm();
    if n1 < f64::EPSILON || n2 < f64::EPSILON {
        return None;
    }

    let mut scale = 2.0 / (n1 + n2);
    if m[(2, 2)] * scale < 0.0 {
        scale = -scale;
    }

    let r1 = m.column(0) * scale;
    let r2 = m.column(1) * scale;
    let t = m.column(2) * scale;
    let r3 = r1.cross(&r2);

    let rot = Matrix3::from_columns(&[r1, r2, r3]);
    Some(Pose::new(rodrigues_inverse(&rot), t))
}

/// Pose of a planar board seen by a calibrated camera: homography initialisation refined on the
/// reprojection error.
pub fn solve_planar_pose(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    object: &[Point3<f64>],
    image: &[Point2<f64>]
) -> Option<Pose> {
    let plane: Vec<Point2<f64>> = object.iter().map(|p| Point2::new(p.x, p.y)).collect();
    let undistorted: Vec<Point2<f64>> = image
        .iter()
        .map(|p| {
            let n = undistort_normalised(&normalised_from_pixel(camera, p), dist);
            Point2::new(n.x, n.y)
        })
        .collect();

    let hom = find_homography(&plane, &undistorted)?;
    let initial = pose_from_homography(&Matrix3::identity(), &hom)?;

    let mut params = DVector::zeros(6);
    initial.write_params(&mut params, 0);

    let criteria = TermCriteria {
        max_iter: 20,
        epsilon: 1e-10
    };
    let (params, _) = levenberg_marquardt(params, criteria, |p| {
        let pose = Pose::from_params(p, 0);
        reprojection_residuals(camera, dist, &pose, object, image)
    });

    Some(Pose::from_params(&params, 0))
}

/// Stacked `(x, y)` differences between projected and observed points.
pub fn reprojection_residuals(
    camera: &Matrix3<f64>,
    dist: &Vector5<f64>,
    pose: &Pose,
    object: &[Point3<f64>],
    image: &[Point2<f64>]
) -> DVector<f64> {
    let mut r = DVector::zeros(2 * object.len());
    for (i, (o, p)) in object.iter().zip(image.iter()).enumerate() {
        let q = project_point(camera, dist, pose, o);
        r[2 * i] = q.x - p.x;
        r[2 * i + 1] = q.y - p.y;
    }
    r
}

/// Minimise the squared norm of `residuals` from `params`.
///
/// The Jacobian is estimated by forward differences. Returns the final parameters and their
/// residual vector.
pub fn levenberg_marquardt<F>(
    mut params: DVector<f64>,
    criteria: TermCriteria,
    residuals: F
) -> (DVector<f64>, DVector<f64>)
where
    F: Fn(&DVector<f64>) -> DVector<f64>
{
    let n = params.len();
    let mut r = residuals(&params);
    let mut cost = r.norm_squared();
    let mut lambda = 1e-3;

    for iter in 0..criteria.max_iter {
        let jac = numeric_jacobian(&residuals, &params, &r);
        let jtj = jac.transpose() * &jac;
        let jtr = jac.transpose() * &r;

        let mut improved = false;
        let mut converged = false;

        while lambda < 1e12 {
            let mut a = jtj.clone();
            for i in 0..n {
                a[(i, i)] += lambda * jtj[(i, i)].max(1e-9);
            }

            let step = match a.clone().cholesky() {
                Some(chol) => chol.solve(&(-&jtr)),
                None => match a.lu().solve(&(-&jtr)) {
                    Some(step) => step,
                    None => {
                        lambda *= 10.0;
                        continue;
                    }
                }
            };

            let candidate = &params + &step;
            let r_new = residuals(&candidate);
            let cost_new = r_new.norm_squared();

            if cost_new.is_finite() && cost_new < cost {
                let decrease = (cost - cost_new) / cost.max(f64::EPSILON);
                converged = decrease < criteria.epsilon
                    || step.norm() < criteria.epsilon * (params.norm() + criteria.epsilon);

                params = candidate;
                r = r_new;
                cost = cost_new;
                lambda = (lambda * 0.1).max(1e-12);
                improved = true;
                break;
            }

            lambda *= 10.0;
        }

        if !improved || converged {
            log::trace!("Levenberg-Marquardt stopped after {} iterations, cost {}", iter + 1, cost);
            break;
        }
    }

    (params, r)
}

fn numeric_jacobian<F>(residuals: &F, params: &DVector<f64>, r0: &DVector<f64>) -> DMatrix<f64>
where
    F: Fn(&DVector<f64>) -> DVector<f64>
{
    let mut jac = DMatrix::zeros(r0.len(), params.len());
    let mut shifted = params.clone();

    for j in 0..params.len() {
        let h = 1e-6 * params[j].abs().max(1.0);
        shifted[j] = params[j] + h;
        let r = residuals(&shifted);
        shifted[j] = params[j];

        let mut col = jac.column_mut(j);
        col.copy_from(&((r - r0) / h));
    }

    jac
}

/// Median of a list of values, zero when empty.
pub(crate) fn median(values: &mut Vec<f64>) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        0.5 * (values[mid - 1] + values[mid])
    }
    else {
        values[mid]
    }
}
