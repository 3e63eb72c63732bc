//! skyraster: flux-conserving geometry for astronomical images and spectral cubes
//!
//! Resampling to a new pixel scale, cropping by pixel or sky coordinates,
//! background-based uncertainty estimation and Monte-Carlo noise
//! propagation over FITS-like volumes carrying a celestial WCS.

pub mod types;
pub mod io;
pub mod core;

#[cfg(feature = "python")]
mod python;

// Re-export main types and functions for easier access
pub use types::{
    ConvergenceWarning, CoordinateMetadata, HeaderValue, ImageVolume, Plane, PlaneStack,
    Projection, RasterError, RasterResult, ScaleMatrix, UncertaintyMap,
};

pub use crate::core::{
    ArtifactCleaner, ArtifactParams, CoordinateAdapter, CropParams, Cropper, MonteCarloParams,
    MonteCarloRunner, NoiseInjector, NoiseModel, PointingJitter, RebinParams, Rebinner,
    UncertaintyEstimator, UncertaintyParams, WorldCoordinateService,
};

pub use io::{MemoryStore, VolumeStore};
#[cfg(feature = "gdal")]
pub use io::GdalStore;
