use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;
use nalgebra::{Matrix3, SymmetricEigen, Vector3};

use crate::error::RegistrationError;
use crate::utils::{distance, read_content_lines, Point};

/// A labelled point: a landmark, or a detected nucleus keyed by its index.
#[derive(PartialEq, Debug, Clone)]
pub struct LandmarkPoint {
    pub label: String,
    pub position: Point,
}

impl LandmarkPoint {
    pub fn new(label: &str, x: f64, y: f64, z: f64) -> LandmarkPoint {
        LandmarkPoint {
            label: label.to_string(),
            position: [x, y, z],
        }
    }
}

impl FromStr for LandmarkPoint {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // label x y z [extra columns...], comma or whitespace separated
        let ss = s
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|t| !t.is_empty())
            .collect_vec();
        if ss.len() < 4 {
            return Err(format!("expected a label and 3 coordinates, got {:?}", s));
        }
        let mut position = [0.0; 3];
        for (p, token) in position.iter_mut().zip(&ss[1..4]) {
            *p = f64::from_str(token).map_err(|e| format!("bad coordinate {:?}: {}", token, e))?;
        }
        Ok(LandmarkPoint {
            label: ss[0].to_string(),
            position,
        })
    }
}

#[derive(Debug, Clone)]
pub struct LandmarkSet {
    pub points: Vec<LandmarkPoint>,
}

impl LandmarkSet {
    pub fn new(points: Vec<LandmarkPoint>) -> Result<LandmarkSet, RegistrationError> {
        let set = LandmarkSet { points };
        set.validate()?;
        Ok(set)
    }

    /// Points labelled by their index.
    pub fn from_positions(positions: &[Point]) -> LandmarkSet {
        let points = positions
            .iter()
            .enumerate()
            .map(|(i, p)| LandmarkPoint {
                label: i.to_string(),
                position: *p,
            })
            .collect();
        LandmarkSet { points }
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn labels(&self) -> Vec<&str> {
        self.points.iter().map(|p| p.label.as_str()).collect()
    }

    pub fn positions(&self) -> Vec<Point> {
        self.points.iter().map(|p| p.position).collect()
    }

    pub fn overlap(&self, other: &LandmarkSet) -> BTreeSet<String> {
        let mine: BTreeSet<&str> = self.labels().into_iter().collect();
        other
            .labels()
            .into_iter()
            .filter(|l| mine.contains(l))
            .map(str::to_string)
            .collect()
    }

    /// Positions of the given labels, in label order.
    pub fn subset(&self, labels: &BTreeSet<String>) -> Vec<Point> {
        let by_label: BTreeMap<&str, Point> = self
            .points
            .iter()
            .filter(|p| labels.contains(&p.label))
            .map(|p| (p.label.as_str(), p.position))
            .collect();
        by_label.into_values().collect()
    }

    pub fn validate(&self) -> Result<(), RegistrationError> {
        let unique: HashSet<&str> = self.labels().into_iter().collect();
        if unique.len() != self.points.len() {
            return Err(RegistrationError::InvalidInput(
                "non-unique labels in landmark set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Read `label x y z` rows. The first row may be a header; later rows
/// that do not parse are errors.
pub fn read_landmarks(path: &Path) -> Result<LandmarkSet, RegistrationError> {
    let name = path.display().to_string();
    let mut points = Vec::new();
    for (k, (line_number, line)) in read_content_lines(path)?.into_iter().enumerate() {
        match line.parse::<LandmarkPoint>() {
            Ok(point) => points.push(point),
            Err(_) if k == 0 => continue,
            Err(message) => return Err(RegistrationError::parse(&name, line_number, message)),
        }
    }
    LandmarkSet::new(points).map_err(|e| RegistrationError::parse(&name, 0, e.to_string()))
}

pub fn write_landmarks(path: &Path, landmarks: &LandmarkSet) -> Result<(), RegistrationError> {
    let name = path.display().to_string();
    let io_error = |e| RegistrationError::Io(name.clone(), e);
    let mut out = BufWriter::new(File::create(path).map_err(io_error)?);
    writeln!(out, "label x y z").map_err(io_error)?;
    for p in &landmarks.points {
        writeln!(
            out,
            "{} {} {} {}",
            p.label, p.position[0], p.position[1], p.position[2]
        )
        .map_err(io_error)?;
    }
    out.flush().map_err(io_error)
}

pub fn centroid(points: &[Point]) -> Result<Point, RegistrationError> {
    if points.is_empty() {
        return Err(RegistrationError::InvalidInput(
            "centroid of an empty point set".to_string(),
        ));
    }
    let mut c = [0.0; 3];
    for p in points {
        for d in 0..3 {
            c[d] += p[d];
        }
    }
    Ok(c.map(|v| v / points.len() as f64))
}

/// Mean Euclidean distance over all distinct pairs.
pub fn mean_pairwise_distance(points: &[Point]) -> Result<f64, RegistrationError> {
    if points.len() < 2 {
        return Err(RegistrationError::InvalidInput(format!(
            "mean pairwise distance needs at least 2 points, got {}",
            points.len()
        )));
    }
    let (total, count) = points
        .iter()
        .tuple_combinations()
        .fold((0.0, 0usize), |(t, n), (a, b)| (t + distance(a, b), n + 1));
    let mean = total / count as f64;
    if mean <= 0.0 {
        return Err(RegistrationError::InvalidInput(
            "all points coincide".to_string(),
        ));
    }
    Ok(mean)
}

/// Unit eigenvector of the covariance matrix with the largest eigenvalue.
/// The sign is fixed so the largest-magnitude component is positive.
pub fn principal_axis(points: &[Point]) -> Result<Point, RegistrationError> {
    let c = centroid(points)?;
    let mut cov = Matrix3::<f64>::zeros();
    for p in points {
        let v = Vector3::new(p[0] - c[0], p[1] - c[1], p[2] - c[2]);
        cov += v * v.transpose();
    }
    cov /= points.len() as f64;
    let eigen = SymmetricEigen::new(cov);
    let i = eigen.eigenvalues.imax();
    if eigen.eigenvalues[i] <= 0.0 {
        return Err(RegistrationError::InvalidInput(
            "point set has no spread".to_string(),
        ));
    }
    let axis = eigen.eigenvectors.column(i).normalize();
    let sign = if axis[axis.iamax()] < 0.0 { -1.0 } else { 1.0 };
    Ok([sign * axis[0], sign * axis[1], sign * axis[2]])
}
