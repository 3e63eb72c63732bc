//! Spectral artifact removal
//!
//! A plane value is aberrant when it departs from the median spectrum of
//! its pixel by more than `threshold` uncertainties. Isolated aberrant
//! pixels are replaced by the mean of the neighbouring planes; clusters
//! are kept as real features.

use crate::core::uncertainty::UncertaintyEstimator;
use crate::types::{ImageVolume, RasterError, RasterResult};
use ndarray::{s, ArrayView1};
use serde::{Deserialize, Serialize};

/// Which deviations count as artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpikeSign {
    Both,
    Positive,
    Negative,
}

/// Artifact removal parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ArtifactParams {
    /// First wavelength to scan; defaults to the first plane
    pub wmin: Option<f64>,
    /// Last wavelength to scan; defaults to the last plane
    pub wmax: Option<f64>,
    /// Deviation limit in uncertainties
    pub threshold: f64,
    pub sign: SpikeSign,
    /// Flagged pixels within Manhattan distance 2 (itself included) needed
    /// for a flag to count as a real feature
    pub min_cluster: usize,
}

impl Default for ArtifactParams {
    fn default() -> Self {
        Self {
            wmin: None,
            wmax: None,
            threshold: 100.0,
            sign: SpikeSign::Both,
            min_cluster: 5,
        }
    }
}

/// Removes isolated spectral spikes from a cube
pub struct ArtifactCleaner {
    params: ArtifactParams,
}

impl ArtifactCleaner {
    pub fn new(params: ArtifactParams) -> Self {
        Self { params }
    }

    /// Clean `volume` using uncertainties from `estimator`
    pub fn clean(&self, volume: &ImageVolume, estimator: &UncertaintyEstimator) -> RasterResult<ImageVolume> {
        if self.params.threshold.is_nan() || self.params.threshold < 0.0 {
            return Err(RasterError::Configuration(format!(
                "artifact threshold must be positive, got {}",
                self.params.threshold
            )));
        }
        let wave = volume.wavelength().ok_or_else(|| {
            RasterError::Configuration("artifact removal needs a wavelength axis".to_string())
        })?;
        let (nw, ny, nx) = volume.dims();
        if nw < 2 {
            return Err(RasterError::Configuration(
                "artifact removal needs at least two planes".to_string(),
            ));
        }

        let uncertainty = estimator.estimate(volume)?;
        let first = self.params.wmin.map_or(0, |w| closest_index(wave, w));
        let last = self.params.wmax.map_or(nw - 1, |w| closest_index(wave, w));
        if first > last {
            return Err(RasterError::Configuration(format!(
                "artifact scan window starts at plane {} after it ends at plane {}",
                first, last
            )));
        }
        log::debug!("Scanning planes {}..={} for artifacts", first, last);

        let mut data = volume.data().clone();
        let mut replaced = 0usize;

        for w in first..=last {
            let mut flagged = Vec::new();
            for y in 0..ny {
                for x in 0..nx {
                    // medians follow earlier replacements
                    let reference = median(data.slice(s![first..=last, y, x]));
                    let deviation = (data[[w, y, x]] - reference) / uncertainty[[w, y, x]];
                    let aberrant = match self.params.sign {
                        SpikeSign::Both => deviation.abs() > self.params.threshold,
                        SpikeSign::Positive => deviation > self.params.threshold,
                        SpikeSign::Negative => deviation < -self.params.threshold,
                    };
                    if aberrant {
                        flagged.push((y, x));
                    }
                }
            }

            for &(y, x) in &flagged {
                let cluster = flagged
                    .iter()
                    .filter(|&&(fy, fx)| fy.abs_diff(y) + fx.abs_diff(x) <= 2)
                    .count();
                if cluster >= self.params.min_cluster {
                    continue;
                }

                data[[w, y, x]] = if w == 0 {
                    data[[1, y, x]]
                } else if w == nw - 1 {
                    data[[nw - 2, y, x]]
                } else {
                    (data[[w - 1, y, x]] + data[[w + 1, y, x]]) / 2.0
                };
                replaced += 1;
            }
        }

        log::info!("Replaced {} aberrant spectral samples", replaced);
        let mut metadata = volume.metadata().clone();
        metadata.history.push(format!("smoothed {} spectral artifacts", replaced));
        ImageVolume::new(metadata, data, Some(wave.to_vec()))
    }
}

/// Index of the wavelength nearest to `target`
pub fn closest_index(wave: &[f64], target: f64) -> usize {
    wave.iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - target).abs().total_cmp(&(*b - target).abs()))
        .map_or(0, |(i, _)| i)
}

/// Median that turns NaN when any value is NaN or the lane is empty
fn median(lane: ArrayView1<'_, f64>) -> f64 {
    if lane.is_empty() || lane.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let mut sorted = lane.to_vec();
    sorted.sort_by(f64::total_cmp);
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::uncertainty::UncertaintyParams;
    use crate::types::{CoordinateMetadata, Projection, ScaleMatrix};
    use ndarray::{Array1, Array3};

    fn cube(data: Array3<f64>) -> ImageVolume {
        let nw = data.dim().0;
        let metadata = CoordinateMetadata::new(
            [3.0, 3.0],
            [150.1, 2.2],
            ScaleMatrix::from_increments(-1.0e-3, 1.0e-3),
            Projection::Tan,
        );
        let wavelength = (0..nw).map(|k| 5.0 + 0.1 * k as f64).collect();
        ImageVolume::new(metadata, data, Some(wavelength)).unwrap()
    }

    fn unit_uncertainty(shape: (usize, usize, usize)) -> UncertaintyEstimator {
        UncertaintyEstimator::new(UncertaintyParams {
            provided: Some(Array3::ones(shape)),
            ..Default::default()
        })
    }

    #[test]
    fn test_isolated_spike_is_interpolated() {
        let shape = (6, 5, 5);
        let mut data = Array3::from_shape_fn(shape, |(k, _, _)| 10.0 + k as f64);
        data[[3, 2, 2]] = 500.0;
        let volume = cube(data);

        let params = ArtifactParams {
            threshold: 50.0,
            ..Default::default()
        };
        let cleaned = ArtifactCleaner::new(params).clean(&volume, &unit_uncertainty(shape)).unwrap();

        assert_eq!(cleaned.data()[[3, 2, 2]], 13.0);
        assert_eq!(cleaned.data()[[3, 1, 1]], 13.0);
        assert_eq!(cleaned.metadata().history.len(), 1);
    }

    #[test]
    fn test_extended_feature_is_kept() {
        let shape = (6, 5, 5);
        let mut data = Array3::from_elem(shape, 1.0);
        for y in 1..4 {
            for x in 1..4 {
                data[[2, y, x]] = 400.0;
            }
        }
        let volume = cube(data.clone());

        let params = ArtifactParams {
            threshold: 50.0,
            ..Default::default()
        };
        let cleaned = ArtifactCleaner::new(params).clean(&volume, &unit_uncertainty(shape)).unwrap();

        // the centre sees 9 flagged pixels in its diamond; corners see 6
        assert_eq!(cleaned.data(), &data);
    }

    #[test]
    fn test_sign_filter_and_edge_planes() {
        let shape = (4, 3, 3);
        let mut data = Array3::from_elem(shape, 2.0);
        data[[0, 1, 1]] = -300.0;
        data[[3, 0, 0]] = 300.0;
        data[[1, 0, 0]] = 7.0;
        let volume = cube(data);

        let positive = ArtifactParams {
            threshold: 10.0,
            sign: SpikeSign::Positive,
            ..Default::default()
        };
        let cleaned = ArtifactCleaner::new(positive)
            .clean(&volume, &unit_uncertainty(shape))
            .unwrap();
        assert_eq!(cleaned.data()[[0, 1, 1]], -300.0);
        // last plane copies its predecessor
        assert_eq!(cleaned.data()[[3, 0, 0]], 2.0);

        let negative = ArtifactParams {
            sign: SpikeSign::Negative,
            ..positive
        };
        let cleaned = ArtifactCleaner::new(negative)
            .clean(&volume, &unit_uncertainty(shape))
            .unwrap();
        // first plane copies its successor
        assert_eq!(cleaned.data()[[0, 1, 1]], 2.0);
        assert_eq!(cleaned.data()[[3, 0, 0]], 300.0);
    }

    #[test]
    fn test_wavelength_window_limits_scan() {
        let shape = (6, 3, 3);
        let mut data = Array3::from_elem(shape, 1.0);
        data[[1, 1, 1]] = 900.0;
        let volume = cube(data);

        let params = ArtifactParams {
            wmin: Some(5.3),
            threshold: 10.0,
            ..Default::default()
        };
        let cleaned = ArtifactCleaner::new(params).clean(&volume, &unit_uncertainty(shape)).unwrap();
        assert_eq!(cleaned.data()[[1, 1, 1]], 900.0);
    }

    #[test]
    fn test_invalid_inputs() {
        let reversed = ArtifactParams {
            wmin: Some(5.2),
            wmax: Some(5.0),
            ..Default::default()
        };
        let shape = (3, 2, 2);
        let volume = cube(Array3::zeros(shape));
        let result = ArtifactCleaner::new(reversed).clean(&volume, &unit_uncertainty(shape));
        assert!(matches!(result, Err(RasterError::Configuration(_))));

        let params = ArtifactParams {
            threshold: -1.0,
            ..Default::default()
        };
        let result = ArtifactCleaner::new(params).clean(&volume, &unit_uncertainty(shape));
        assert!(matches!(result, Err(RasterError::Configuration(_))));

        let image = ImageVolume::new(volume.metadata().clone(), Array3::zeros((1, 2, 2)), None).unwrap();
        let result = ArtifactCleaner::new(ArtifactParams::default()).clean(&image, &unit_uncertainty((1, 2, 2)));
        assert!(matches!(result, Err(RasterError::Configuration(_))));
    }

    #[test]
    fn test_median_and_closest_index() {
        let even = Array1::from(vec![4.0, 1.0, 3.0, 2.0]);
        assert_eq!(median(even.view()), 2.5);
        let nan = Array1::from(vec![1.0, f64::NAN]);
        assert!(median(nan.view()).is_nan());
        assert_eq!(closest_index(&[5.0, 5.5, 6.0], 5.6), 1);
    }
}
