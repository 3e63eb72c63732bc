//! Core raster processing modules

pub mod coordinates;
pub mod rebin;
pub mod crop;
pub mod uncertainty;
pub mod noise;
pub mod monte_carlo;
pub mod spectral;
pub mod artifacts;
pub mod units;

// Re-export main types
pub use coordinates::{CoordinateAdapter, CoordinateSolverParams, PixelSolution, WorldCoordinateService};
pub use rebin::{rebin, rebin_extrapolate, rebin_strict, rebinned_size, RebinParams, Rebinner};
pub use crop::{crop, CropParams, Cropper, ResolvedCenter};
pub use uncertainty::{nan_std, UncertaintyEstimator, UncertaintyParams};
pub use noise::{NoiseInjector, NoiseModel, PointingJitter};
pub use monte_carlo::{trial_spread, MonteCarloParams, MonteCarloResult, MonteCarloRunner};
pub use spectral::{
    clean_crossing_wavelengths, concatenate, crop_to_valid, crossing_wavelengths, inverse_square,
    remove_planes, slice_planes, ConcatParams, CrossingMode,
};
pub use artifacts::{ArtifactCleaner, ArtifactParams, SpikeSign};
pub use units::{jy_per_pixel_to_mjy_per_sr, pixel_solid_angle};
