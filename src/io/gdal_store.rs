use crate::core::coordinates::WorldCoordinateService;
use crate::io::store::VolumeStore;
use crate::types::{CoordinateMetadata, HeaderValue, ImageVolume, Projection, RasterError, RasterResult, ScaleMatrix};
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{Array2, Array3, Axis};
use std::path::Path;

const HISTORY_KEY: &str = "HISTORY";
const WAVELENGTH_KEY: &str = "WAVELENGTH";

/// GDAL-backed store
///
/// Bands map to planes. The geotransform is read as a linear CD matrix
/// referenced to the outer corner of the first pixel (`CRPIX = 0.5`);
/// gnomonic metadata is linearised at that corner on write.
pub struct GdalStore {
    driver: String,
}

impl GdalStore {
    pub fn new(driver: &str) -> Self {
        Self {
            driver: driver.to_string(),
        }
    }

    pub fn geotiff() -> Self {
        Self::new("GTiff")
    }
}

impl Default for GdalStore {
    fn default() -> Self {
        Self::geotiff()
    }
}

impl VolumeStore for GdalStore {
    fn read(&self, path: &Path) -> RasterResult<ImageVolume> {
        log::info!("Reading volume from: {}", path.display());

        let dataset = Dataset::open(path)?;
        let (width, height) = dataset.raster_size();
        let band_count = dataset.raster_count();
        let geo_transform = dataset.geo_transform()?;
        log::debug!("Raster size: {}x{}x{}", band_count, height, width);
        log::debug!("Geotransform: {:?}", geo_transform);

        let capacity = band_count.max(0) as usize;
        let mut planes = Vec::with_capacity(capacity);
        let mut wavelength = Vec::with_capacity(capacity);
        for index in 1..=band_count {
            let band = dataset.rasterband(index)?;
            let buffer = band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
            let plane = Array2::from_shape_vec((height, width), buffer.data)
                .map_err(|e| RasterError::Store(format!("failed to reshape band {}: {}", index, e)))?;
            planes.push(plane);

            if let Some(value) = band.metadata_item(WAVELENGTH_KEY, "") {
                let parsed = value.trim().parse::<f64>().map_err(|e| {
                    RasterError::Store(format!("invalid wavelength '{}' on band {}: {}", value, index, e))
                })?;
                wavelength.push(parsed);
            }
        }

        let views: Vec<_> = planes.iter().map(|p| p.view().insert_axis(Axis(0))).collect();
        let data: Array3<f64> = ndarray::concatenate(Axis(0), &views)
            .map_err(|e| RasterError::Store(format!("failed to stack bands: {}", e)))?;

        let mut metadata = CoordinateMetadata::new(
            [0.5, 0.5],
            [geo_transform[0], geo_transform[3]],
            ScaleMatrix::Cd([
                [geo_transform[1], geo_transform[2]],
                [geo_transform[4], geo_transform[5]],
            ]),
            Projection::Linear,
        );

        for entry in dataset.metadata_domain("").unwrap_or_default() {
            if let Some((key, value)) = entry.split_once('=') {
                if key == HISTORY_KEY {
                    metadata.history.extend(value.lines().map(str::to_string));
                } else {
                    metadata.set_keyword(key, parse_header_value(value));
                }
            }
        }

        let wavelength = match wavelength.len() {
            0 => None,
            n if n == data.len_of(Axis(0)) => Some(wavelength),
            n => {
                return Err(RasterError::Store(format!(
                    "{} of {} bands carry a wavelength",
                    n,
                    data.len_of(Axis(0))
                )))
            }
        };

        ImageVolume::new(metadata, data, wavelength)
    }

    fn write(&mut self, path: &Path, volume: &ImageVolume, annotations: &[String]) -> RasterResult<()> {
        log::info!("Writing volume to: {}", path.display());

        let (nw, ny, nx) = volume.dims();
        let metadata = volume.metadata();
        if metadata.projection == Projection::Tan {
            log::debug!("Linearising gnomonic projection at the image corner");
        }

        let (corner_ra, corner_dec) = volume.adapter().pixel_to_world(0.5, 0.5);
        let cd = metadata.scale.cd();

        let driver = DriverManager::get_driver_by_name(&self.driver)?;
        let mut dataset = driver.create_with_band_type::<f64, _>(path, nx as isize, ny as isize, nw as isize)?;
        dataset.set_geo_transform(&[corner_ra, cd[0][0], cd[0][1], corner_dec, cd[1][0], cd[1][1]])?;

        for (key, value) in &metadata.keywords {
            dataset.set_metadata_item(key, &value.to_string(), "")?;
        }
        let history: Vec<&str> = metadata
            .history
            .iter()
            .chain(annotations.iter())
            .map(String::as_str)
            .collect();
        if !history.is_empty() {
            dataset.set_metadata_item(HISTORY_KEY, &history.join("\n"), "")?;
        }

        for (k, plane) in volume.data().outer_iter().enumerate() {
            let mut band = dataset.rasterband(k as isize + 1)?;
            let flat: Vec<f64> = plane.iter().cloned().collect();
            let buffer = gdal::raster::Buffer::new((nx, ny), flat);
            band.write((0, 0), (nx, ny), &buffer)?;
            band.set_no_data_value(Some(f64::NAN))?;

            if let Some(wave) = volume.wavelength() {
                band.set_metadata_item(WAVELENGTH_KEY, &wave[k].to_string(), "")?;
            }
        }

        log::info!("Volume saved: {}x{}x{}", nw, ny, nx);
        Ok(())
    }
}

/// Best-effort typing of a stored keyword value
fn parse_header_value(value: &str) -> HeaderValue {
    if let Ok(integer) = value.parse::<i64>() {
        HeaderValue::Integer(integer)
    } else if let Ok(float) = value.parse::<f64>() {
        HeaderValue::Float(float)
    } else {
        HeaderValue::Text(value.to_string())
    }
}
