//! Volume persistence

pub mod store;
#[cfg(feature = "gdal")]
pub mod gdal_store;

pub use store::{write_slices, MemoryStore, VolumeStore};
#[cfg(feature = "gdal")]
pub use gdal_store::GdalStore;
