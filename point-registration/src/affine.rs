use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;
use nalgebra::{DMatrix, Matrix3, Matrix4, SymmetricEigen};
use ndarray::Array2;

use crate::error::RegistrationError;
use crate::utils::{distance, read_content_lines, Point};

/// Model fitted to point correspondences.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransformKind {
    /// General affine map, least squares.
    Affine,
    /// Uniform scale, rotation and translation (3-D only).
    Similar,
}

impl TransformKind {
    /// Fewest correspondences that determine the model.
    pub fn min_points(&self, dims: usize) -> usize {
        match self {
            TransformKind::Affine => dims + 1,
            TransformKind::Similar => 3,
        }
    }
}

impl FromStr for TransformKind {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "affine" => Ok(TransformKind::Affine),
            "similar" | "similarity" => Ok(TransformKind::Similar),
            _ => Err(format!("unknown transform kind {:?}", s)),
        }
    }
}

/// Homogeneous `(d+1)x(d+1)` matrix for `d` = 2 or 3. Points are carried
/// as `[x, y, z]`; 2-D transforms leave z untouched.
#[derive(Clone, Debug, PartialEq)]
pub struct AffineTransform {
    matrix: Array2<f64>,
}

impl AffineTransform {
    pub fn identity(dims: usize) -> Result<AffineTransform, RegistrationError> {
        check_dims(dims)?;
        Ok(AffineTransform {
            matrix: Array2::eye(dims + 1),
        })
    }

    pub fn from_matrix(matrix: Array2<f64>) -> Result<AffineTransform, RegistrationError> {
        let (rows, cols) = matrix.dim();
        if rows != cols || !(rows == 3 || rows == 4) {
            return Err(RegistrationError::InvalidInput(format!(
                "affine matrix must be 3x3 or 4x4, got {}x{}",
                rows, cols
            )));
        }
        if matrix.iter().any(|v| !v.is_finite()) {
            return Err(RegistrationError::InvalidInput(
                "affine matrix has non-finite entries".to_string(),
            ));
        }
        Ok(AffineTransform { matrix })
    }

    /// Diagonal scaling by `factors[d]` along each axis.
    pub fn scaling(dims: usize, factors: Point) -> Result<AffineTransform, RegistrationError> {
        let mut out = AffineTransform::identity(dims)?;
        for d in 0..dims {
            out.matrix[[d, d]] = factors[d];
        }
        Ok(out)
    }

    pub fn dims(&self) -> usize {
        self.matrix.nrows() - 1
    }

    pub fn matrix(&self) -> &Array2<f64> {
        &self.matrix
    }

    /// `self · other`: applies `other` first.
    pub fn compose(&self, other: &AffineTransform) -> Result<AffineTransform, RegistrationError> {
        if self.dims() != other.dims() {
            return Err(RegistrationError::Mismatch(format!(
                "cannot compose {}-D and {}-D transforms",
                self.dims(),
                other.dims()
            )));
        }
        Ok(AffineTransform {
            matrix: self.matrix.dot(&other.matrix),
        })
    }

    pub fn apply(&self, point: &Point) -> Point {
        let d = self.dims();
        let mut out = *point;
        for (r, o) in out.iter_mut().enumerate().take(d) {
            *o = self.matrix[[r, d]];
            for c in 0..d {
                *o += self.matrix[[r, c]] * point[c];
            }
        }
        out
    }

    pub fn apply_all(&self, points: &[Point]) -> Vec<Point> {
        points.iter().map(|p| self.apply(p)).collect()
    }

    pub fn inverse(&self) -> Result<AffineTransform, RegistrationError> {
        let inverse = to_dmatrix(&self.matrix)
            .try_inverse()
            .ok_or_else(|| RegistrationError::Singular("affine transform is not invertible".to_string()))?;
        AffineTransform::from_matrix(from_dmatrix(&inverse))
    }
}

fn check_dims(dims: usize) -> Result<(), RegistrationError> {
    if dims != 2 && dims != 3 {
        return Err(RegistrationError::InvalidParameter(format!(
            "transforms are 2-D or 3-D, got {}",
            dims
        )));
    }
    Ok(())
}

fn to_dmatrix(a: &Array2<f64>) -> DMatrix<f64> {
    DMatrix::from_fn(a.nrows(), a.ncols(), |i, j| a[[i, j]])
}

fn from_dmatrix(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

fn check_correspondences(
    source: &[Point],
    target: &[Point],
    needed: usize,
) -> Result<(), RegistrationError> {
    RegistrationError::check_same_length(source.len(), target.len())?;
    if source.len() < needed {
        return Err(RegistrationError::InvalidInput(format!(
            "need at least {} correspondences, got {}",
            needed,
            source.len()
        )));
    }
    Ok(())
}

/// Least-squares affine map from `source` to `target`, `A = T · pinv(S)` in
/// homogeneous coordinates. Fails when the source points do not span the
/// space.
pub fn fit_affine(
    source: &[Point],
    target: &[Point],
    dims: usize,
) -> Result<AffineTransform, RegistrationError> {
    check_dims(dims)?;
    check_correspondences(source, target, dims + 1)?;
    let n = source.len();
    let s = DMatrix::from_fn(dims + 1, n, |r, c| if r == dims { 1.0 } else { source[c][r] });
    let t = DMatrix::from_fn(dims, n, |r, c| target[c][r]);

    let svd = s.svd(true, true);
    let largest = svd.singular_values.max();
    let tolerance = largest * 1e-10 * n as f64;
    if svd.rank(tolerance) < dims + 1 {
        return Err(RegistrationError::Singular(format!(
            "{} source points are degenerate in {}-D",
            n, dims
        )));
    }
    let pinv = svd
        .pseudo_inverse(tolerance)
        .map_err(|e| RegistrationError::Singular(e.to_string()))?;
    let top = t * pinv;

    let mut matrix = Array2::eye(dims + 1);
    for r in 0..dims {
        for c in 0..=dims {
            matrix[[r, c]] = top[(r, c)];
        }
    }
    AffineTransform::from_matrix(matrix)
}

/// Scale, rotation and translation from `source` to `target` by Horn's
/// quaternion method.
pub fn fit_similarity(source: &[Point], target: &[Point]) -> Result<AffineTransform, RegistrationError> {
    check_correspondences(source, target, 3)?;
    let n = source.len() as f64;
    let mean = |points: &[Point]| {
        let mut m = [0.0; 3];
        for p in points {
            for d in 0..3 {
                m[d] += p[d] / n;
            }
        }
        m
    };
    let (com_s, com_t) = (mean(source), mean(target));

    let mut m = Matrix3::<f64>::zeros();
    let (mut sp, mut sy) = (0.0, 0.0);
    for (p, y) in std::iter::zip(source, target) {
        for i in 0..3 {
            let pi = p[i] - com_s[i];
            sp += pi * pi;
            sy += (y[i] - com_t[i]).powi(2);
            for j in 0..3 {
                m[(i, j)] += pi * (y[j] - com_t[j]);
            }
        }
    }
    if sp <= 0.0 || sy <= 0.0 {
        return Err(RegistrationError::Singular(
            "similarity fit on coincident points".to_string(),
        ));
    }

    let (sxx, sxy, sxz) = (m[(0, 0)], m[(0, 1)], m[(0, 2)]);
    let (syx, syy, syz) = (m[(1, 0)], m[(1, 1)], m[(1, 2)]);
    let (szx, szy, szz) = (m[(2, 0)], m[(2, 1)], m[(2, 2)]);
    #[rustfmt::skip]
    let horn = Matrix4::new(
        sxx + syy + szz, syz - szy, szx - sxz, sxy - syx,
        syz - szy, sxx - syy - szz, sxy + syx, szx + sxz,
        szx - sxz, sxy + syx, -sxx + syy - szz, syz + szy,
        sxy - syx, szx + sxz, syz + szy, -sxx - syy + szz,
    );
    let eigen = SymmetricEigen::new(horn);
    let q = eigen.eigenvectors.column(eigen.eigenvalues.imax()).normalize();
    let (q0, qx, qy, qz) = (q[0], q[1], q[2], q[3]);
    #[rustfmt::skip]
    let rotation = [
        [q0 * q0 + qx * qx - qy * qy - qz * qz, 2.0 * (qx * qy - q0 * qz), 2.0 * (qx * qz + q0 * qy)],
        [2.0 * (qy * qx + q0 * qz), q0 * q0 - qx * qx + qy * qy - qz * qz, 2.0 * (qy * qz - q0 * qx)],
        [2.0 * (qz * qx - q0 * qy), 2.0 * (qz * qy + q0 * qx), q0 * q0 - qx * qx - qy * qy + qz * qz],
    ];
    let scale = (sy / sp).sqrt();

    let mut matrix = Array2::eye(4);
    for r in 0..3 {
        let mut t = com_t[r];
        for c in 0..3 {
            matrix[[r, c]] = scale * rotation[r][c];
            t -= scale * rotation[r][c] * com_s[c];
        }
        matrix[[r, 3]] = t;
    }
    AffineTransform::from_matrix(matrix)
}

pub fn fit_transform(
    kind: TransformKind,
    source: &[Point],
    target: &[Point],
    dims: usize,
) -> Result<AffineTransform, RegistrationError> {
    match kind {
        TransformKind::Affine => fit_affine(source, target, dims),
        TransformKind::Similar if dims == 3 => fit_similarity(source, target),
        TransformKind::Similar => Err(RegistrationError::InvalidParameter(
            "similarity transforms are 3-D only".to_string(),
        )),
    }
}

/// Mean Euclidean distance between paired points.
pub fn mean_residual(a: &[Point], b: &[Point]) -> Result<f64, RegistrationError> {
    RegistrationError::check_same_length(a.len(), b.len())?;
    if a.is_empty() {
        return Err(RegistrationError::InvalidInput(
            "residual of empty point sets".to_string(),
        ));
    }
    Ok(std::iter::zip(a, b).map(|(p, q)| distance(p, q)).sum::<f64>() / a.len() as f64)
}

/// Whitespace separated rows, `#` lines ignored.
pub fn read_affine(path: &Path) -> Result<AffineTransform, RegistrationError> {
    let name = path.display().to_string();
    let lines = read_content_lines(path)?;
    let size = lines.len();
    if size != 3 && size != 4 {
        return Err(RegistrationError::parse(
            &name,
            lines.last().map_or(0, |(n, _)| *n),
            format!("expected 3 or 4 matrix rows, found {}", size),
        ));
    }
    let mut matrix = Array2::zeros((size, size));
    for (r, (line_number, line)) in lines.iter().enumerate() {
        let values = line
            .split_whitespace()
            .map(f64::from_str)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| RegistrationError::parse(&name, *line_number, e.to_string()))?;
        if values.len() != size {
            return Err(RegistrationError::parse(
                &name,
                *line_number,
                format!("expected {} columns, found {}", size, values.len()),
            ));
        }
        for (c, v) in values.into_iter().enumerate() {
            matrix[[r, c]] = v;
        }
    }
    AffineTransform::from_matrix(matrix).map_err(|e| RegistrationError::parse(&name, 0, e.to_string()))
}

pub fn write_affine(path: &Path, transform: &AffineTransform) -> Result<(), RegistrationError> {
    let name = path.display().to_string();
    let io_error = |e| RegistrationError::Io(name.clone(), e);
    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    writeln!(out, "# {}-D affine transform", transform.dims()).map_err(io_error)?;
    for row in transform.matrix().rows() {
        writeln!(out, "{}", row.iter().join(" ")).map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

#[cfg(test)]
mod tests {
    use assert_approx_eq::assert_approx_eq;
    use ndarray::array;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    use super::*;

    fn random_points(rng: &mut StdRng, n: usize) -> Vec<Point> {
        (0..n)
            .map(|_| {
                [
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                    rng.gen_range(-50.0..50.0),
                ]
            })
            .collect()
    }

    fn rotation_scale_translation() -> AffineTransform {
        let (a, b) = (0.5_f64, -0.3_f64);
        let rz = array![[a.cos(), -a.sin(), 0.0], [a.sin(), a.cos(), 0.0], [0.0, 0.0, 1.0]];
        let rx = array![[1.0, 0.0, 0.0], [0.0, b.cos(), -b.sin()], [0.0, b.sin(), b.cos()]];
        let r = rz.dot(&rx) * 1.7;
        let mut m = Array2::eye(4);
        m.slice_mut(ndarray::s![..3, ..3]).assign(&r);
        m[[0, 3]] = 4.0;
        m[[1, 3]] = -12.5;
        m[[2, 3]] = 3.0;
        AffineTransform::from_matrix(m).unwrap()
    }

    fn assert_matrix_close(a: &AffineTransform, b: &AffineTransform, eps: f64) {
        assert_eq!(a.dims(), b.dims());
        for (x, y) in a.matrix().iter().zip(b.matrix().iter()) {
            assert_approx_eq!(x, y, eps);
        }
    }

    #[test]
    fn test_apply_and_compose() {
        let shift = AffineTransform::from_matrix(array![[1.0, 0.0, 2.0], [0.0, 1.0, -1.0], [0.0, 0.0, 1.0]]).unwrap();
        let swap = AffineTransform::from_matrix(array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]]).unwrap();
        // 2-D transforms keep z
        assert_eq!(shift.apply(&[1.0, 1.0, 9.0]), [3.0, 0.0, 9.0]);
        let both = swap.compose(&shift).unwrap();
        assert_eq!(both.apply(&[1.0, 1.0, 0.0]), [0.0, 3.0, 0.0]);
        assert!(both.compose(&AffineTransform::identity(3).unwrap()).is_err());
        assert!(AffineTransform::identity(4).is_err());
        assert!(AffineTransform::from_matrix(Array2::eye(5)).is_err());
    }

    #[test]
    fn test_inverse() {
        let t = rotation_scale_translation();
        let round = t.compose(&t.inverse().unwrap()).unwrap();
        assert_matrix_close(&round, &AffineTransform::identity(3).unwrap(), 1e-9);
        let flat = AffineTransform::scaling(3, [1.0, 0.0, 1.0]).unwrap();
        match flat.inverse() {
            Err(RegistrationError::Singular(_)) => {}
            other => panic!("expected singular error, got {:?}", other),
        }
    }

    #[test]
    fn test_fit_affine() {
        let mut rng = StdRng::seed_from_u64(11);
        let truth = AffineTransform::from_matrix(array![
            [1.2, 0.1, -0.3, 5.0],
            [0.05, 0.9, 0.2, -3.0],
            [0.0, -0.4, 1.1, 8.0],
            [0.0, 0.0, 0.0, 1.0]
        ])
        .unwrap();
        let source = random_points(&mut rng, 12);
        let target = truth.apply_all(&source);
        let fitted = fit_affine(&source, &target, 3).unwrap();
        assert_matrix_close(&fitted, &truth, 1e-8);
        assert_approx_eq!(mean_residual(&fitted.apply_all(&source), &target).unwrap(), 0.0, 1e-8);

        // exactly determined
        let fitted = fit_affine(&source[..4], &target[..4], 3).unwrap();
        assert_matrix_close(&fitted, &truth, 1e-6);
    }

    #[test]
    fn test_fit_affine_2d() {
        let truth = AffineTransform::from_matrix(array![[0.0, -2.0, 1.0], [2.0, 0.0, 3.0], [0.0, 0.0, 1.0]]).unwrap();
        let source = vec![[0.0, 0.0, 5.0], [1.0, 0.0, 6.0], [0.0, 1.0, 7.0], [2.0, 3.0, 8.0]];
        let target = truth.apply_all(&source);
        let fitted = fit_affine(&source, &target, 2).unwrap();
        assert_matrix_close(&fitted, &truth, 1e-9);
    }

    #[test]
    fn test_fit_affine_degenerate() {
        let coplanar = vec![[0.0, 0.0, 1.0], [1.0, 0.0, 1.0], [0.0, 1.0, 1.0], [3.0, 2.0, 1.0], [5.0, 1.0, 1.0]];
        match fit_affine(&coplanar, &coplanar, 3) {
            Err(RegistrationError::Singular(_)) => {}
            other => panic!("expected singular error, got {:?}", other),
        }
        assert!(fit_affine(&coplanar[..3], &coplanar[..3], 3).is_err());
        assert!(fit_affine(&coplanar, &coplanar[..4], 3).is_err());
    }

    #[test]
    fn test_fit_similarity() {
        let mut rng = StdRng::seed_from_u64(12);
        let truth = rotation_scale_translation();
        let source = random_points(&mut rng, 8);
        let target = truth.apply_all(&source);
        let fitted = fit_similarity(&source, &target).unwrap();
        assert_matrix_close(&fitted, &truth, 1e-8);
        assert!(fit_transform(TransformKind::Similar, &source, &target, 2).is_err());
        assert!(fit_similarity(&[[1.0, 1.0, 1.0]; 3], &target[..3]).is_err());
    }

    #[test]
    fn test_read_write_affine() {
        let path = std::env::temp_dir().join("point_registration_affine.txt");
        let t = rotation_scale_translation();
        write_affine(&path, &t).unwrap();
        let read = read_affine(&path).unwrap();
        assert_matrix_close(&read, &t, 1e-12);

        std::fs::write(&path, "# comment\n1 0 0 0\n0 1 0 0\n0 0 1\n0 0 0 1\n").unwrap();
        match read_affine(&path) {
            Err(RegistrationError::Parse { line, .. }) => assert_eq!(line, 4),
            other => panic!("expected parse error, got {:?}", other),
        }
        std::fs::write(&path, "1 0 0\n0 1 0\n0 0 1\n").unwrap();
        assert_eq!(read_affine(&path).unwrap().dims(), 2);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_transform_kind() {
        assert_eq!("Affine".parse::<TransformKind>().unwrap(), TransformKind::Affine);
        assert_eq!("similar".parse::<TransformKind>().unwrap(), TransformKind::Similar);
        assert!("rigid".parse::<TransformKind>().is_err());
        assert_eq!(TransformKind::Affine.min_points(3), 4);
    }
}
