use std::time::Instant;

use itertools::Itertools;
use rand::Rng;
use slog::{info, warn};

use crate::candidate::{Candidate, Rgb, ScaleParameters};
use crate::curation::DetectionSession;
use crate::error::DetectionError;
use crate::local_minima::stack_local_minima;
use crate::overlap::validate_overlap_threshold;
use crate::scale_space::{multi_scale_laplacian, ScaleRange, ScaleResponseStack};
use crate::threshold::otsu_threshold;
use crate::utils::set_log_config;
use crate::volume::ScalarVolume;
use crate::IS_DEBUG;

/// DetectionParameter
#[derive(Clone, Debug)]
pub struct DetectionParameter {
    pub scales: ScaleRange,
    /// Look for bright structures on a dark background.
    pub bright_blobs: bool,
    pub overlap_threshold: f64,
    /// Response threshold; `None` picks Otsu's threshold over all minima.
    pub response_threshold: Option<f32>,
}

impl Default for DetectionParameter {
    fn default() -> Self {
        Self {
            scales: ScaleRange::new(5.0, 1.0, 9.0),
            bright_blobs: true,
            overlap_threshold: 0.05,
            response_threshold: None,
        }
    }
}

impl DetectionParameter {
    #[allow(clippy::field_reassign_with_default)]
    pub fn new(min_scale: f64, step_scale: f64, max_scale: f64) -> DetectionParameter {
        let mut ret = DetectionParameter::default();
        ret.scales = ScaleRange::new(min_scale, step_scale, max_scale);
        ret
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        self.scales.validate()?;
        validate_overlap_threshold(self.overlap_threshold)
    }
}

pub struct NucleiDetection {
    pub session: DetectionSession,
    pub responses: ScaleResponseStack,
}

/// Turn `(space..., scale)` stack indices into candidates.
pub fn minima_to_candidates<R: Rng + ?Sized>(
    stack: &ScaleResponseStack,
    minima: &[Vec<usize>],
    rng: &mut R,
) -> Vec<Candidate> {
    let ndim = stack.spatial_ndim();
    minima
        .iter()
        .map(|index| {
            let mut position = [-1_i64; 3];
            for d in 0..ndim {
                position[d] = index[d] as i64;
            }
            let value = stack.data[index.as_slice()];
            Candidate::new(position, index[ndim], value, Rgb::random(rng))
        })
        .collect_vec()
}

/// Detect spherical nuclei: multi-scale LoG, local minima, response
/// threshold, then overlap suppression.
pub fn detect_nuclei<R: Rng + ?Sized>(
    volume: &ScalarVolume,
    param: &DetectionParameter,
    rng: &mut R,
) -> Result<NucleiDetection, DetectionError> {
    let log = set_log_config();
    param.validate()?;
    let params = ScaleParameters::new(
        param.scales,
        volume.sampling_factor(),
        volume.anisotropic_axis(),
        volume.ndim(),
    )?;

    let tick = Instant::now();
    let responses = multi_scale_laplacian(volume, &param.scales, param.bright_blobs)?;
    if IS_DEBUG {
        info!(
            log,
            "multi_scale_laplacian over {} scales took {:.3}s",
            responses.num_scales(),
            tick.elapsed().as_millis() as f64 / 1000.0
        );
    }

    let tick = Instant::now();
    let minima = stack_local_minima(&responses);
    let candidates = minima_to_candidates(&responses, &minima, rng);
    if IS_DEBUG {
        info!(
            log,
            "found {} local minima in {:.3}s",
            candidates.len(),
            tick.elapsed().as_millis() as f64 / 1000.0
        );
    }

    let threshold = match param.response_threshold {
        Some(threshold) => threshold,
        None if candidates.is_empty() => {
            warn!(log, "no local minima found, nothing to threshold");
            0.0
        }
        None => {
            let values = candidates.iter().map(|c| c.value).collect_vec();
            otsu_threshold(&values)?
        }
    };

    let tick = Instant::now();
    let mut session = DetectionSession::new(params, candidates, threshold)?;
    let before = session.number_of_blobs();
    session.suppress_overlaps(param.overlap_threshold)?;
    if IS_DEBUG {
        info!(
            log,
            "threshold {} kept {} candidates, {} after suppression, took {:.3}s",
            threshold,
            before,
            session.number_of_blobs(),
            tick.elapsed().as_millis() as f64 / 1000.0
        );
    }

    Ok(NucleiDetection { session, responses })
}
