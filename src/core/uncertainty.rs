use crate::types::{ImageVolume, PlaneStack, RasterError, RasterResult, UncertaintyMap};
use ndarray::{Array3, Axis, Zip};
use num_traits::Float;

/// Uncertainty estimation parameters
///
/// The background defaults to the volume itself. Weights are inverse
/// variances relative to the background noise: a pixel with weight `w`
/// gets `sigma / sqrt(w)`.
#[derive(Debug, Clone)]
pub struct UncertaintyParams {
    /// Use this map directly instead of estimating one
    pub provided: Option<UncertaintyMap>,
    /// Per-pixel weights congruent with the data
    pub weight_map: Option<Array3<f64>>,
    /// Scalar factor applied to the weights
    pub weight_factor: f64,
    /// Signal-free region used to measure the noise level
    pub background: Option<PlaneStack>,
    /// Weights applied to the background before measuring its spread
    pub background_weight: Option<PlaneStack>,
    /// Replacement for exactly-zero uncertainties
    pub zero_value: f64,
}

impl Default for UncertaintyParams {
    fn default() -> Self {
        Self {
            provided: None,
            weight_map: None,
            weight_factor: 1.0,
            background: None,
            background_weight: None,
            zero_value: f64::NAN,
        }
    }
}

/// Derives per-pixel uncertainty maps from background statistics
pub struct UncertaintyEstimator {
    params: UncertaintyParams,
}

impl UncertaintyEstimator {
    pub fn new(params: UncertaintyParams) -> Self {
        Self { params }
    }

    /// Background spread of the volume itself, unit weights
    pub fn standard() -> Self {
        Self::new(UncertaintyParams::default())
    }

    /// Estimate the uncertainty of every pixel of `volume`
    pub fn estimate(&self, volume: &ImageVolume) -> RasterResult<UncertaintyMap> {
        let shape = volume.data().dim();

        if let Some(provided) = &self.params.provided {
            if provided.dim() != shape {
                return Err(RasterError::ShapeMismatch {
                    expected: volume.shape(),
                    found: provided.shape().to_vec(),
                });
            }
            log::debug!("Using provided uncertainty map");
            return Ok(provided.clone());
        }

        let sigma = self.background_sigma(volume)?;
        log::debug!("Background sigma per plane: {:?}", sigma);

        let weight = match &self.params.weight_map {
            Some(map) => {
                if map.dim() != shape {
                    return Err(RasterError::ShapeMismatch {
                        expected: volume.shape(),
                        found: map.shape().to_vec(),
                    });
                }
                map * self.params.weight_factor
            }
            None => Array3::from_elem(shape, self.params.weight_factor),
        };

        let zero_value = self.params.zero_value;
        let mut uncertainty = Array3::zeros(shape);
        for ((mut unc_plane, w_plane), &plane_sigma) in uncertainty
            .outer_iter_mut()
            .zip(weight.outer_iter())
            .zip(sigma.iter())
        {
            Zip::from(&mut unc_plane).and(&w_plane).for_each(|u, &w| {
                let value = (1.0 / w).sqrt() * plane_sigma;
                *u = if value == 0.0 { zero_value } else { value };
            });
        }

        log::info!("Estimated uncertainty map for {:?} volume", shape);
        Ok(uncertainty)
    }

    /// Population standard deviation of each background plane
    fn background_sigma(&self, volume: &ImageVolume) -> RasterResult<Vec<f64>> {
        let background = self.params.background.as_ref().unwrap_or(volume.data());
        if background.len_of(Axis(0)) != volume.nw() {
            return Err(RasterError::ShapeMismatch {
                expected: vec![volume.nw()],
                found: vec![background.len_of(Axis(0))],
            });
        }

        let sigma = match &self.params.background_weight {
            Some(bg_weight) => {
                if bg_weight.dim() != background.dim() {
                    return Err(RasterError::ShapeMismatch {
                        expected: background.shape().to_vec(),
                        found: bg_weight.shape().to_vec(),
                    });
                }
                background
                    .outer_iter()
                    .zip(bg_weight.outer_iter())
                    .map(|(plane, w)| nan_std(plane.iter().zip(w.iter()).map(|(&v, &w)| v * w)))
                    .collect()
            }
            None => background
                .outer_iter()
                .map(|plane| nan_std(plane.iter().copied()))
                .collect(),
        };

        Ok(sigma)
    }
}

/// Population standard deviation ignoring NaN values
///
/// Returns NaN when every value is NaN.
pub fn nan_std<F, I>(values: I) -> F
where
    F: Float,
    I: IntoIterator<Item = F>,
{
    let valid: Vec<F> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if valid.is_empty() {
        return F::nan();
    }

    let n = F::from(valid.len()).unwrap_or_else(F::nan);
    let mean = valid.iter().fold(F::zero(), |acc, &v| acc + v) / n;
    let variance = valid
        .iter()
        .fold(F::zero(), |acc, &v| acc + (v - mean) * (v - mean))
        / n;
    variance.sqrt()
}
