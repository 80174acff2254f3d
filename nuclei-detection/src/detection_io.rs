//! Readers and writers for curated detections.
//!
//! * nuclei file: `index x y z scale` per thresholded candidate, space
//!   separated, `scale` in physical units.
//! * session CSV: seven metadata lines, a header, then one row per local
//!   minimum with its colour.
//! * TGMM XML: one `GaussianMixtureModel` element per thresholded candidate.
//! * instance mask: `u16` label volume, `.npy`.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

use itertools::Itertools;
use ndarray::{ArrayD, IxDyn};

use crate::candidate::{Candidate, Rgb, ScaleParameters};
use crate::curation::DetectionSession;
use crate::error::DetectionError;
use crate::scale_space::ScaleRange;
use crate::utils::ImageUtil;

pub const CSV_HEADER: &str = "X, Y, Z, Scale, Value, Red, Green, Blue";

fn io_error(path: &Path) -> impl Fn(std::io::Error) -> DetectionError + '_ {
    move |e| DetectionError::Io(path.display().to_string(), e)
}

fn create(path: &Path) -> Result<BufWriter<File>, DetectionError> {
    Ok(BufWriter::new(File::create(path).map_err(io_error(path))?))
}

fn read_lines(path: &Path) -> Result<Vec<String>, DetectionError> {
    let file = File::open(path).map_err(io_error(path))?;
    BufReader::new(file)
        .lines()
        .collect::<Result<Vec<_>, _>>()
        .map_err(io_error(path))
}

fn parse_field<T: FromStr>(
    path: &Path,
    line: usize,
    token: &str,
    what: &str,
) -> Result<T, DetectionError> {
    token.trim().parse::<T>().map_err(|_| {
        DetectionError::parse(
            &path.display().to_string(),
            line,
            format!("invalid {} '{}'", what, token.trim()),
        )
    })
}

/// Scale index closest to a physical scale, rejecting values off the grid.
fn scale_index(scales: &ScaleRange, scale: f64) -> Option<usize> {
    let index = ((scale - scales.min_scale) / scales.step_scale).round();
    if index < 0.0 || index as usize >= scales.num_scales() {
        return None;
    }
    let index = index as usize;
    if (scales.scale_at(index) - scale).abs() > 1e-6 * scales.step_scale.max(1.0) {
        return None;
    }
    Some(index)
}

pub fn write_nuclei(
    path: &Path,
    candidates: &[Candidate],
    params: &ScaleParameters,
) -> Result<(), DetectionError> {
    let mut writer = create(path)?;
    for (i, c) in candidates.iter().enumerate() {
        writeln!(
            writer,
            "{} {} {} {} {}",
            i,
            c.position[0],
            c.position[1],
            c.position[2],
            params.scale_of(c)
        )
        .map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

/// Read a nuclei file. Responses are not stored in this format, so every
/// candidate gets a response of `0.0`; the first column becomes the
/// candidate's ground-truth label.
pub fn read_nuclei(path: &Path, params: &ScaleParameters) -> Result<Vec<Candidate>, DetectionError> {
    let name = path.display().to_string();
    let mut candidates = Vec::new();
    for (i, line) in read_lines(path)?.iter().enumerate() {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let tokens = line.split_whitespace().collect_vec();
        if tokens.len() != 5 {
            return Err(DetectionError::parse(
                &name,
                line_no,
                format!("expected 5 columns, found {}", tokens.len()),
            ));
        }
        let label: i64 = parse_field(path, line_no, tokens[0], "label")?;
        let mut position = [0_i64; 3];
        for (d, token) in tokens[1..4].iter().enumerate() {
            position[d] = parse_field(path, line_no, token, "coordinate")?;
        }
        let scale: f64 = parse_field(path, line_no, tokens[4], "scale")?;
        let index = scale_index(&params.scales, scale).ok_or_else(|| {
            DetectionError::parse(&name, line_no, format!("scale {} is not on the scale grid", scale))
        })?;
        let color = Rgb(
            position[0].rem_euclid(255) as u8,
            position[1].rem_euclid(255) as u8,
            position[2].rem_euclid(255) as u8,
        );
        let mut candidate = Candidate::new(position, index, 0.0, color);
        candidate.label = Some(label);
        candidates.push(candidate);
    }
    Ok(candidates)
}

/// Write every local minimum of the session with the metadata needed to
/// restore it.
pub fn write_session_csv(path: &Path, session: &DetectionSession) -> Result<(), DetectionError> {
    let params = session.params();
    let mut writer = create(path)?;
    let header = [
        params.scales.min_scale.to_string(),
        params.scales.step_scale.to_string(),
        params.scales.max_scale.to_string(),
        params.sampling_factor.to_string(),
        params.anisotropic_axis.to_string(),
        session.start_threshold().to_string(),
        session.current_threshold().to_string(),
        CSV_HEADER.to_string(),
    ];
    for line in header.iter() {
        writeln!(writer, "{}", line).map_err(io_error(path))?;
    }
    for c in session.local_minima() {
        writeln!(
            writer,
            "{},{},{},{},{},{},{},{}",
            c.position[0],
            c.position[1],
            c.position[2],
            c.scale,
            c.value,
            c.color.0,
            c.color.1,
            c.color.2
        )
        .map_err(io_error(path))?;
    }
    writer.flush().map_err(io_error(path))
}

/// Restore a session written by [`write_session_csv`]. The thresholded
/// subset is recomputed from the stored current threshold.
pub fn read_session_csv(path: &Path, num_dims: usize) -> Result<DetectionSession, DetectionError> {
    let name = path.display().to_string();
    let lines = read_lines(path)?;
    if lines.len() < 8 {
        return Err(DetectionError::parse(
            &name,
            lines.len(),
            "truncated header, expected 7 metadata lines and a column header",
        ));
    }
    let min_scale: f64 = parse_field(path, 1, &lines[0], "min scale")?;
    let step_scale: f64 = parse_field(path, 2, &lines[1], "step scale")?;
    let max_scale: f64 = parse_field(path, 3, &lines[2], "max scale")?;
    let sampling_factor: f64 = parse_field(path, 4, &lines[3], "sampling factor")?;
    let axis: usize = parse_field(path, 5, &lines[4], "axis")?;
    let start_threshold: f32 = parse_field(path, 6, &lines[5], "start threshold")?;
    let current_threshold: f32 = parse_field(path, 7, &lines[6], "current threshold")?;
    let params = ScaleParameters::new(
        ScaleRange::new(min_scale, step_scale, max_scale),
        sampling_factor,
        axis,
        num_dims,
    )?;

    let mut minima = Vec::with_capacity(lines.len() - 8);
    for (i, line) in lines.iter().enumerate().skip(8) {
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }
        let tokens = line.split(',').collect_vec();
        if tokens.len() != 8 {
            return Err(DetectionError::parse(
                &name,
                line_no,
                format!("expected 8 columns, found {}", tokens.len()),
            ));
        }
        let position = [
            parse_field(path, line_no, tokens[0], "x")?,
            parse_field(path, line_no, tokens[1], "y")?,
            parse_field(path, line_no, tokens[2], "z")?,
        ];
        let scale: usize = parse_field(path, line_no, tokens[3], "scale index")?;
        let value: f32 = parse_field(path, line_no, tokens[4], "value")?;
        let color = Rgb(
            parse_field(path, line_no, tokens[5], "red")?,
            parse_field(path, line_no, tokens[6], "green")?,
            parse_field(path, line_no, tokens[7], "blue")?,
        );
        let candidate = Candidate::new(position, scale, value, color);
        params
            .check_scale(&candidate)
            .map_err(|e| DetectionError::parse(&name, line_no, e.to_string()))?;
        minima.push(candidate);
    }
    let mut session = DetectionSession::new(params, minima, start_threshold)?;
    session.set_threshold(current_threshold);
    Ok(session)
}

pub fn write_tgmm(
    path: &Path,
    candidates: &[Candidate],
    params: &ScaleParameters,
) -> Result<(), DetectionError> {
    let mut writer = create(path)?;
    writeln!(writer, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>").map_err(io_error(path))?;
    writeln!(writer, "<document>").map_err(io_error(path))?;
    for (i, c) in candidates.iter().enumerate() {
        let m = format!("{} {} {}", c.position[0], c.position[1], c.position[2]);
        writeln!(
            writer,
            "<GaussianMixtureModel id=\"{id}\" dims=\"3\" splitScore=\"5\" scale=\"1 \" nu=\"10\" \
             beta=\"-1\" alpha=\"-1\" lineage=\"-1\" parent=\"-1\" m=\"{m}\" \
             W=\"0.02 0 0 0 0.02 0 0 0 0.02 \" nuPrior=\"-1\" betaPrior=\"-1\" alphaPrior=\"-1\" \
             distMRFPrior=\"-1\" mPrior=\"{m}\" WPrior=\"0.02 0 0 0 0.02 0 0 0 0.02\" svIdx=\" \" \
             LOGScale=\"{scale}\"></GaussianMixtureModel>",
            id = i,
            m = m,
            scale = params.scale_of(c)
        )
        .map_err(io_error(path))?;
    }
    write!(writer, "</document>").map_err(io_error(path))?;
    writer.flush().map_err(io_error(path))
}

/// Rasterise every candidate's sphere (radius `sqrt(numDims) * scale`) into a
/// label volume of the given `shape`; candidate `i` gets label `i + 1`, later
/// candidates overwrite earlier ones.
pub fn instance_mask(
    candidates: &[Candidate],
    params: &ScaleParameters,
    shape: &[usize],
) -> Result<ArrayD<u16>, DetectionError> {
    if shape.len() != params.num_dims {
        return Err(DetectionError::InvalidParameter(format!(
            "mask shape {:?} does not match {} dimensions",
            shape, params.num_dims
        )));
    }
    if candidates.len() > u16::MAX as usize {
        return Err(DetectionError::InvalidParameter(format!(
            "{} candidates do not fit in 16-bit labels",
            candidates.len()
        )));
    }
    let mut mask = ArrayD::<u16>::zeros(IxDyn(shape));
    for (i, c) in candidates.iter().enumerate() {
        params.check_scale(c)?;
        let radius = params.radius(c);
        let ranges = (0..params.num_dims)
            .map(|d| {
                let extent = if d == params.anisotropic_axis {
                    radius / params.sampling_factor
                } else {
                    radius
                };
                let lo = (c.position[d] as f64 - extent).floor().max(0.0) as i64;
                let hi = ((c.position[d] as f64 + extent).ceil() as i64).min(shape[d] as i64 - 1);
                lo..=hi
            })
            .collect_vec();
        for index in ranges.into_iter().multi_cartesian_product() {
            let mut voxel = [0.0_f64; 3];
            for (d, &v) in index.iter().enumerate() {
                voxel[d] = v as f64;
            }
            let mut centre = [0.0_f64; 3];
            for d in 0..params.num_dims {
                centre[d] = c.position[d] as f64;
            }
            if params.physical_distance(&voxel, &centre) <= radius {
                let index = index.iter().map(|&v| v as usize).collect_vec();
                mask[IxDyn(&index)] = (i + 1) as u16;
            }
        }
    }
    Ok(mask)
}

pub fn write_instance_mask(path: &Path, mask: &ArrayD<u16>) -> Result<(), DetectionError> {
    ImageUtil::write_npy_array(path, mask)
}
