use crate::candidate::{position_f64, Candidate, Rgb, ScaleParameters};
use crate::error::DetectionError;
use crate::suppression::suppress_overlapping;
use crate::threshold::{apply_threshold, otsu_threshold};

/// Response given to candidates drawn by hand.
pub const MANUAL_RESPONSE: f32 = -100.0;

/// Interactive curation state for one detection run.
///
/// All local minima are retained so the threshold can be moved freely;
/// selection, deletion, additions and annotations act on the thresholded
/// subset only and are discarded when the threshold changes.
#[derive(Clone, Debug)]
pub struct DetectionSession {
    params: ScaleParameters,
    local_minima: Vec<Candidate>,
    start_threshold: f32,
    current_threshold: f32,
    thresholded: Vec<Candidate>,
}

impl DetectionSession {
    pub fn new(
        params: ScaleParameters,
        local_minima: Vec<Candidate>,
        start_threshold: f32,
    ) -> Result<DetectionSession, DetectionError> {
        for candidate in &local_minima {
            params.check_scale(candidate)?;
        }
        let thresholded = apply_threshold(&local_minima, start_threshold);
        Ok(DetectionSession {
            params,
            local_minima,
            start_threshold,
            current_threshold: start_threshold,
            thresholded,
        })
    }

    /// Start from Otsu's threshold over the minima's responses.
    pub fn with_otsu(
        params: ScaleParameters,
        local_minima: Vec<Candidate>,
    ) -> Result<DetectionSession, DetectionError> {
        let values: Vec<f32> = local_minima.iter().map(|c| c.value).collect();
        let threshold = otsu_threshold(&values)?;
        DetectionSession::new(params, local_minima, threshold)
    }

    pub fn params(&self) -> &ScaleParameters {
        &self.params
    }

    pub fn local_minima(&self) -> &[Candidate] {
        &self.local_minima
    }

    pub fn thresholded(&self) -> &[Candidate] {
        &self.thresholded
    }

    pub fn start_threshold(&self) -> f32 {
        self.start_threshold
    }

    pub fn current_threshold(&self) -> f32 {
        self.current_threshold
    }

    pub fn number_of_blobs(&self) -> usize {
        self.thresholded.len()
    }

    pub fn set_threshold(&mut self, threshold: f32) {
        self.current_threshold = threshold;
        self.thresholded = apply_threshold(&self.local_minima, threshold);
    }

    /// Run non-maximum suppression on the thresholded subset; returns the
    /// number of removed candidates.
    pub fn suppress_overlaps(&mut self, overlap_threshold: f64) -> Result<usize, DetectionError> {
        let kept = suppress_overlapping(&self.thresholded, &self.params, overlap_threshold)?;
        let removed = self.thresholded.len() - kept.len();
        self.thresholded = kept;
        Ok(removed)
    }

    /// Flip the selection of every candidate whose sphere contains `position`.
    /// Returns how many candidates were toggled.
    pub fn toggle_selected(&mut self, position: [f64; 3]) -> usize {
        let params = self.params;
        let mut toggled = 0;
        for candidate in self.thresholded.iter_mut() {
            let d = params.physical_distance(&position_f64(candidate), &position);
            let s = params.scale_of(candidate);
            if d * d <= params.num_dims as f64 * s * s {
                candidate.toggle_selected();
                toggled += 1;
            }
        }
        toggled
    }

    pub fn delete_selected(&mut self) -> usize {
        let before = self.thresholded.len();
        self.thresholded.retain(|c| !c.selected);
        before - self.thresholded.len()
    }

    pub fn add(&mut self, candidate: Candidate) -> Result<(), DetectionError> {
        self.params.check_scale(&candidate)?;
        self.thresholded.push(candidate);
        Ok(())
    }

    /// Candidate described by a drag from `start` to `end`: centred on the
    /// midpoint, with the in-plane drag length as its diameter. In 3-D the
    /// candidate lies on the plane of `end`.
    pub fn candidate_from_drag(&self, start: [f64; 3], end: [f64; 3]) -> Candidate {
        let x = (0.5 * (start[0] + end[0])).floor() as i64;
        let y = (0.5 * (start[1] + end[1])).floor() as i64;
        let z = if self.params.num_dims == 2 {
            -1
        } else {
            end[2].floor() as i64
        };
        let length = ((end[0] - start[0]).powi(2) + (end[1] - start[1]).powi(2)).sqrt();
        let scale = length / 2.0 / (self.params.num_dims as f64).sqrt();
        let range = &self.params.scales;
        let index = ((scale - range.min_scale) / range.step_scale)
            .round()
            .max(0.0)
            .min((self.params.num_scales() - 1) as f64) as usize;
        let color = Rgb(
            x.rem_euclid(255) as u8,
            y.rem_euclid(255) as u8,
            z.rem_euclid(255) as u8,
        );
        Candidate::new([x, y, z], index, MANUAL_RESPONSE, color)
    }

    pub fn set_annotation(
        &mut self,
        index: usize,
        name: &str,
        value: f64,
    ) -> Result<(), DetectionError> {
        let count = self.thresholded.len();
        let candidate = self.thresholded.get_mut(index).ok_or_else(|| {
            DetectionError::InvalidParameter(format!(
                "candidate {} out of range for {} candidates",
                index, count
            ))
        })?;
        candidate.annotations.insert(name.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{DetectionSession, MANUAL_RESPONSE};
    use crate::candidate::{Candidate, Rgb, ScaleParameters};
    use crate::scale_space::ScaleRange;

    fn session() -> DetectionSession {
        let params = ScaleParameters::new(ScaleRange::new(2.0, 1.0, 5.0), 2.0, 2, 3).unwrap();
        let minima = vec![
            Candidate::new([10, 10, 5], 1, -8.0, Rgb(1, 1, 1)),
            Candidate::new([11, 10, 5], 1, -6.0, Rgb(2, 2, 2)),
            Candidate::new([40, 40, 5], 0, -7.5, Rgb(3, 3, 3)),
            Candidate::new([60, 20, 2], 2, -0.5, Rgb(4, 4, 4)),
            Candidate::new([70, 70, 9], 3, -0.4, Rgb(5, 5, 5)),
        ];
        DetectionSession::with_otsu(params, minima).unwrap()
    }

    #[test]
    fn test_otsu_start_threshold() {
        let session = session();
        assert_eq!(session.number_of_blobs(), 3);
        assert_eq!(session.start_threshold(), session.current_threshold());
        assert_eq!(session.local_minima().len(), 5);
    }

    #[test]
    fn test_threshold_and_suppression() {
        let mut session = session();
        session.set_threshold(0.0);
        assert_eq!(session.number_of_blobs(), 5);
        assert_eq!(session.suppress_overlaps(0.1).unwrap(), 1);
        assert!(session.thresholded().iter().all(|c| c.position != [11, 10, 5]));
        session.set_threshold(-7.0);
        assert_eq!(session.number_of_blobs(), 2);
        assert!(session.suppress_overlaps(2.0).is_err());
    }

    #[test]
    fn test_select_and_delete() {
        let mut session = session();
        // inside the scale-3 spheres at (10,10,5) and (11,10,5); the z offset
        // of 1 counts double along the anisotropic axis
        assert_eq!(session.toggle_selected([12.0, 11.0, 6.0]), 2);
        assert_eq!(session.thresholded()[0].color, Rgb::SELECTED);
        assert_eq!(session.toggle_selected([100.0, 100.0, 100.0]), 0);
        assert_eq!(session.delete_selected(), 2);
        assert_eq!(session.number_of_blobs(), 1);
        assert_eq!(session.thresholded()[0].position, [40, 40, 5]);
    }

    #[test]
    fn test_deselect_restores_colour() {
        let mut session = session();
        session.toggle_selected([40.0, 40.0, 5.0]);
        session.toggle_selected([40.0, 40.0, 5.0]);
        let candidate = &session.thresholded()[2];
        assert!(!candidate.selected);
        assert_eq!(candidate.color, Rgb(3, 3, 3));
        assert_eq!(session.delete_selected(), 0);
    }

    #[test]
    fn test_add_from_drag() {
        let mut session = session();
        // length 6 * sqrt(3) in the plane gives scale 3 -> index 1
        let dx = 6.0 * 3.0_f64.sqrt();
        let added = session.candidate_from_drag([20.0, 30.0, 1.0], [20.0 + dx, 30.0, 7.2]);
        assert_eq!(added.position, [25, 30, 7]);
        assert_eq!(added.scale, 1);
        assert_eq!(added.value, MANUAL_RESPONSE);
        session.add(added).unwrap();
        assert_eq!(session.number_of_blobs(), 4);

        // huge drags clamp to the largest scale
        let added = session.candidate_from_drag([0.0, 0.0, 0.0], [500.0, 0.0, 0.0]);
        assert_eq!(added.scale, 3);
        let bad = Candidate::new([0, 0, 0], 4, -1.0, Rgb(0, 0, 0));
        assert!(session.add(bad).is_err());
    }

    #[test]
    fn test_annotation() {
        let mut session = session();
        session.set_annotation(1, "gene-a", 0.75).unwrap();
        assert_eq!(session.thresholded()[1].annotations["gene-a"], 0.75);
        assert!(session.set_annotation(10, "gene-a", 1.0).is_err());
    }
}
