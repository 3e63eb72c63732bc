use crate::core::spectral::slice_planes;
use crate::types::{ImageVolume, RasterError, RasterResult};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Reads and writes volumes by path
///
/// Keywords the core does not interpret travel with the metadata;
/// `annotations` are appended to the stored history.
pub trait VolumeStore {
    fn read(&self, path: &Path) -> RasterResult<ImageVolume>;

    fn write(&mut self, path: &Path, volume: &ImageVolume, annotations: &[String]) -> RasterResult<()>;
}

/// In-process store keyed by path
#[derive(Debug, Default)]
pub struct MemoryStore {
    volumes: HashMap<PathBuf, ImageVolume>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.volumes.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }

    pub fn remove(&mut self, path: &Path) -> Option<ImageVolume> {
        self.volumes.remove(path)
    }
}

impl VolumeStore for MemoryStore {
    fn read(&self, path: &Path) -> RasterResult<ImageVolume> {
        self.volumes
            .get(path)
            .cloned()
            .ok_or_else(|| RasterError::Store(format!("no volume stored at {}", path.display())))
    }

    fn write(&mut self, path: &Path, volume: &ImageVolume, annotations: &[String]) -> RasterResult<()> {
        let (mut metadata, data, wavelength) = volume.clone().into_parts();
        metadata.history.extend(annotations.iter().cloned());

        let stored = ImageVolume::new(metadata, data, wavelength)?;
        log::debug!("Stored {:?} volume at {}", stored.dims(), path.display());
        self.volumes.insert(path.to_path_buf(), stored);
        Ok(())
    }
}

/// Write each plane of `volume` as a separate image named `<base>_NNNN`
///
/// Returns the written paths in plane order.
pub fn write_slices<S: VolumeStore + ?Sized>(
    store: &mut S,
    base: &Path,
    volume: &ImageVolume,
) -> RasterResult<Vec<PathBuf>> {
    let stem = base
        .file_stem()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| RasterError::Configuration(format!("invalid slice base path {}", base.display())))?;
    let extension = base.extension().map(|ext| ext.to_string_lossy().into_owned());

    let mut paths = Vec::with_capacity(volume.nw());
    for (k, plane) in slice_planes(volume)?.iter().enumerate() {
        let name = match &extension {
            Some(ext) => format!("{}_{:04}.{}", stem, k, ext),
            None => format!("{}_{:04}", stem, k),
        };
        let path = base.with_file_name(name);
        let annotation = match volume.wavelength() {
            Some(wave) => format!("plane {} of {} at wavelength {}", k, volume.nw(), wave[k]),
            None => format!("plane {} of {}", k, volume.nw()),
        };
        store.write(&path, plane, &[annotation])?;
        paths.push(path);
    }

    log::info!("Wrote {} slices with base {}", paths.len(), base.display());
    Ok(paths)
}
