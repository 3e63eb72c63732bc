use crate::types::{ImageVolume, RasterError, RasterResult, UncertaintyMap};
use ndarray::{Array3, Zip};
use rand::Rng;
use rand_distr::{Distribution, Normal, StandardNormal};
use std::f64::consts::PI;

/// Perturbation model for one Monte-Carlo realisation
#[derive(Debug, Clone)]
pub enum NoiseModel {
    /// `data + theta * uncertainty` with `theta ~ N(mu, sigma)`
    Normal {
        mu: f64,
        sigma: f64,
        uncertainty: UncertaintyMap,
    },
    /// Asymmetric errors: each pixel moves down with probability
    /// `neg / (neg + pos)` by `|theta| * neg`, otherwise up by `|theta| * pos`
    SplitNormal {
        uncertainty_neg: UncertaintyMap,
        uncertainty_pos: UncertaintyMap,
    },
}

impl NoiseModel {
    /// Standard normal perturbation scaled by `uncertainty`
    pub fn gaussian(uncertainty: UncertaintyMap) -> Self {
        NoiseModel::Normal {
            mu: 0.0,
            sigma: 1.0,
            uncertainty,
        }
    }
}

/// Produces perturbed copies of a volume
///
/// The random source is always supplied by the caller so that runs are
/// reproducible from a seed.
pub struct NoiseInjector {
    model: NoiseModel,
}

impl NoiseInjector {
    pub fn new(model: NoiseModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &NoiseModel {
        &self.model
    }

    /// Return a perturbed copy of `volume`; the input is left untouched
    pub fn inject<R: Rng + ?Sized>(&self, volume: &ImageVolume, rng: &mut R) -> RasterResult<ImageVolume> {
        let shape = volume.data().dim();
        let mut data = volume.data().clone();

        match &self.model {
            NoiseModel::Normal { mu, sigma, uncertainty } => {
                check_shape(volume, uncertainty)?;
                let normal = Normal::new(*mu, *sigma).map_err(|e| {
                    RasterError::Configuration(format!("invalid normal distribution N({}, {}): {}", mu, sigma, e))
                })?;

                let theta = Array3::from_shape_simple_fn(shape, || normal.sample(&mut *rng));
                Zip::from(&mut data)
                    .and(&theta)
                    .and(uncertainty)
                    .for_each(|value, &t, &unc| *value += t * unc);
            }
            NoiseModel::SplitNormal {
                uncertainty_neg,
                uncertainty_pos,
            } => {
                check_shape(volume, uncertainty_neg)?;
                check_shape(volume, uncertainty_pos)?;

                // All magnitudes are drawn before any side selection
                let theta: Array3<f64> = Array3::from_shape_simple_fn(shape, || StandardNormal.sample(&mut *rng));
                let flag: Array3<f64> = Array3::from_shape_simple_fn(shape, || rng.gen::<f64>());

                Zip::from(&mut data)
                    .and(uncertainty_neg)
                    .and(uncertainty_pos)
                    .and(&theta)
                    .and(&flag)
                    .for_each(|value, &neg, &pos, &t, &f| {
                        let tau = pos / neg;
                        let peak = 1.0 / (1.0 + tau);
                        if f < peak {
                            *value -= t.abs() * neg;
                        } else {
                            *value += t.abs() * pos;
                        }
                    });
            }
        }

        log::debug!("Injected noise into {:?} volume", shape);
        volume.with_data(data)
    }
}

/// Random pointing offset applied to the reference coordinate
///
/// The shift has magnitude `|N(0, sigma)|` in a direction drawn from
/// `U(0, 2pi)`; `CRVAL1` moves by `r cos(phi)` and `CRVAL2` by `r sin(phi)`.
/// Pixel values are left untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointingJitter {
    /// Pointing accuracy in degrees
    pub sigma_deg: f64,
}

impl PointingJitter {
    pub fn new(sigma_deg: f64) -> Self {
        Self { sigma_deg }
    }

    /// Draw one offset as (radius, angle) in degrees and radians
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> RasterResult<(f64, f64)> {
        let normal = Normal::new(0.0, self.sigma_deg).map_err(|e| {
            RasterError::Configuration(format!("invalid pointing accuracy {}: {}", self.sigma_deg, e))
        })?;
        let radius = normal.sample(&mut *rng).abs();
        let angle = rng.gen::<f64>() * 2.0 * PI;
        Ok((radius, angle))
    }

    /// Return a copy of `volume` with a randomly shifted reference coordinate
    pub fn perturb<R: Rng + ?Sized>(&self, volume: &ImageVolume, rng: &mut R) -> RasterResult<ImageVolume> {
        let (radius, angle) = self.draw(rng)?;

        let mut metadata = volume.metadata().clone();
        metadata.crval[0] += radius * angle.cos();
        metadata.crval[1] += radius * angle.sin();
        metadata.history.push(format!(
            "pointing shifted by {:.3e} deg at {:.4} rad",
            radius, angle
        ));
        log::debug!("Pointing offset {:.3e} deg at {:.4} rad", radius, angle);

        ImageVolume::new(metadata, volume.data().clone(), volume.wavelength().map(|w| w.to_vec()))
    }
}

fn check_shape(volume: &ImageVolume, uncertainty: &UncertaintyMap) -> RasterResult<()> {
    if uncertainty.dim() != volume.data().dim() {
        return Err(RasterError::ShapeMismatch {
            expected: volume.shape(),
            found: uncertainty.shape().to_vec(),
        });
    }
    Ok(())
}
