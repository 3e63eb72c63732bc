use crate::core::noise::{NoiseInjector, PointingJitter};
use crate::core::uncertainty::nan_std;
use crate::types::{ImageVolume, RasterError, RasterResult, UncertaintyMap};
use ndarray::Array3;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

/// Monte-Carlo propagation parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MonteCarloParams {
    /// Number of perturbed realisations, excluding the nominal run
    pub trials: usize,
    /// Base seed; trial `i` draws from `seed + i`
    pub seed: u64,
}

impl Default for MonteCarloParams {
    fn default() -> Self {
        Self { trials: 20, seed: 0 }
    }
}

/// Outcome of a Monte-Carlo propagation
#[derive(Debug, Clone)]
pub struct MonteCarloResult {
    /// Pipeline output for the unperturbed input
    pub nominal: ImageVolume,
    /// Pipeline outputs for each perturbed input, in trial order
    pub trials: Vec<ImageVolume>,
    /// Per-pixel spread of the trial outputs
    pub uncertainty: UncertaintyMap,
}

/// Propagates uncertainties through a processing pipeline by repeated perturbation
pub struct MonteCarloRunner {
    params: MonteCarloParams,
    pointing: Option<PointingJitter>,
}

impl MonteCarloRunner {
    pub fn new(params: MonteCarloParams) -> Self {
        Self { params, pointing: None }
    }

    /// Also shift the reference coordinate of every perturbed input
    ///
    /// The pointing offset is drawn from the trial's generator after the
    /// pixel noise.
    pub fn with_pointing(mut self, jitter: PointingJitter) -> Self {
        self.pointing = Some(jitter);
        self
    }

    pub fn params(&self) -> &MonteCarloParams {
        &self.params
    }

    /// Run the nominal pipeline then every perturbed trial
    ///
    /// Each trial seeds its own generator, so results do not depend on
    /// thread scheduling.
    pub fn run<F>(
        &self,
        volume: &ImageVolume,
        injector: &NoiseInjector,
        pipeline: F,
    ) -> RasterResult<MonteCarloResult>
    where
        F: Fn(ImageVolume) -> RasterResult<ImageVolume> + Send + Sync,
    {
        log::info!(
            "Running Monte-Carlo propagation with {} trials (seed {})",
            self.params.trials,
            self.params.seed
        );

        let nominal = pipeline(volume.clone())?;

        let run_trial = |trial: usize| -> RasterResult<ImageVolume> {
            let mut rng = StdRng::seed_from_u64(self.params.seed.wrapping_add(trial as u64));
            let mut perturbed = injector.inject(volume, &mut rng)?;
            if let Some(jitter) = &self.pointing {
                perturbed = jitter.perturb(&perturbed, &mut rng)?;
            }
            pipeline(perturbed)
        };

        #[cfg(feature = "parallel")]
        let trials: RasterResult<Vec<ImageVolume>> = {
            use rayon::prelude::*;
            (1..=self.params.trials).into_par_iter().map(run_trial).collect()
        };

        #[cfg(not(feature = "parallel"))]
        let trials: RasterResult<Vec<ImageVolume>> = (1..=self.params.trials).map(run_trial).collect();

        let trials = trials?;
        let uncertainty = trial_spread(&nominal, &trials)?;

        log::debug!("Monte-Carlo propagation finished: {} trials", trials.len());
        Ok(MonteCarloResult {
            nominal,
            trials,
            uncertainty,
        })
    }
}

/// Per-pixel population standard deviation across trial outputs
///
/// NaN values are ignored; pixels with no valid trial, or an empty trial
/// set, yield NaN.
pub fn trial_spread(nominal: &ImageVolume, trials: &[ImageVolume]) -> RasterResult<UncertaintyMap> {
    for trial in trials {
        if trial.dims() != nominal.dims() {
            return Err(RasterError::ShapeMismatch {
                expected: nominal.shape(),
                found: trial.shape(),
            });
        }
    }

    Ok(Array3::from_shape_fn(nominal.dims(), |index| {
        nan_std(trials.iter().map(|t| t.data()[index]))
    }))
}
