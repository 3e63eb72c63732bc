use crate::core::coordinates::{CoordinateAdapter, WorldCoordinateService};
use crate::types::{ConvergenceWarning, ImageVolume, RasterError, RasterResult};
use ndarray::s;
use serde::{Deserialize, Serialize};

/// Crop window specification
///
/// Pixel values take priority over world values when both are given.
/// Pixel centres use the FITS convention (1-based).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CropParams {
    /// Window size (dx, dy) in pixels
    pub size_pix: Option<(usize, usize)>,
    /// Window centre (x, y) in FITS pixel coordinates
    pub center_pix: Option<(f64, f64)>,
    /// Window size (dRA, dDec) in degrees
    pub size_deg: Option<(f64, f64)>,
    /// Window centre (RA, Dec) in degrees
    pub center_deg: Option<(f64, f64)>,
}

impl CropParams {
    pub fn pixels(center: (f64, f64), size: (usize, usize)) -> Self {
        Self {
            center_pix: Some(center),
            size_pix: Some(size),
            ..Default::default()
        }
    }

    pub fn world(center_deg: (f64, f64), size_deg: (f64, f64)) -> Self {
        Self {
            center_deg: Some(center_deg),
            size_deg: Some(size_deg),
            ..Default::default()
        }
    }
}

/// Resolved crop centre in both frames
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResolvedCenter {
    /// FITS pixel position
    pub pixel: (f64, f64),
    /// (RA, Dec) in degrees
    pub world: (f64, f64),
    /// Set when a world centre came from a non-converged inversion
    pub warning: Option<ConvergenceWarning>,
}

/// Extracts rectangular sub-volumes
pub struct Cropper {
    params: CropParams,
}

impl Cropper {
    pub fn new(params: CropParams) -> Self {
        Self { params }
    }

    /// Crop using the volume's own coordinate adapter
    pub fn crop(&self, volume: &ImageVolume) -> RasterResult<ImageVolume> {
        self.crop_with(volume, &volume.adapter())
    }

    /// Crop using an external coordinate service
    ///
    /// All validation happens before any slicing; on error the input is
    /// untouched and nothing partial is returned.
    pub fn crop_with(
        &self,
        volume: &ImageVolume,
        wcs: &dyn WorldCoordinateService,
    ) -> RasterResult<ImageVolume> {
        self.crop_reporting(volume, wcs).map(|(cropped, _)| cropped)
    }

    /// Crop and hand back the convergence diagnostic of a world centre
    ///
    /// Callers that must not accept an approximate centre can reject the
    /// result when the warning is set.
    pub fn crop_reporting(
        &self,
        volume: &ImageVolume,
        wcs: &dyn WorldCoordinateService,
    ) -> RasterResult<(ImageVolume, Option<ConvergenceWarning>)> {
        let (_, ny, nx) = volume.dims();

        let center = self.resolve_center(wcs)?;
        let (cx, cy) = center.pixel;
        if !(CoordinateAdapter::center_inside(cx, nx) && CoordinateAdapter::center_inside(cy, ny)) {
            return Err(RasterError::Geometry(format!(
                "crop centre ({:.3}, {:.3}) overpasses the {}x{} image border",
                cx, cy, nx, ny
            )));
        }

        let (sx, sy) = self.resolve_size(wcs)?;

        log::debug!(
            "Crop centre (RA, Dec): ({:.8}, {:.8}), (x, y): ({:.3}, {:.3})",
            center.world.0, center.world.1, cx, cy
        );
        log::debug!("Crop size (dx, dy): ({}, {})", sx, sy);

        let xmin = CoordinateAdapter::window_origin(cx, sx);
        let ymin = CoordinateAdapter::window_origin(cy, sy);
        let xmax = xmin + sx as i64;
        let ymax = ymin + sy as i64;

        if xmin < 0 || ymin < 0 || xmax > nx as i64 || ymax > ny as i64 {
            return Err(RasterError::Geometry(format!(
                "crop window x=[{}, {}) y=[{}, {}) overpasses the {}x{} image border",
                xmin, xmax, ymin, ymax, nx, ny
            )));
        }

        let (xmin, xmax, ymin, ymax) = (xmin as usize, xmax as usize, ymin as usize, ymax as usize);
        let data = volume.data().slice(s![.., ymin..ymax, xmin..xmax]).to_owned();

        let mut metadata = volume.metadata().clone();
        metadata.crpix = [(sx / 2) as f64 + 0.5, (sy / 2) as f64 + 0.5];
        metadata.crval = [center.world.0, center.world.1];
        metadata.history.push(format!(
            "cropped at centre [{:.8}, {:.8}] with size [{}, {}] pix",
            center.world.0, center.world.1, sx, sy
        ));

        let cropped = ImageVolume::new(metadata, data, volume.wavelength().map(|w| w.to_vec()))?;
        log::info!("Cropped {}x{} -> {}x{}", nx, ny, sx, sy);

        Ok((cropped, center.warning))
    }

    /// Crop centre in pixel and world coordinates; pixel values win
    pub fn resolve_center(&self, wcs: &dyn WorldCoordinateService) -> RasterResult<ResolvedCenter> {
        if let Some((x, y)) = self.params.center_pix {
            let world = wcs.pixel_to_world(x, y);
            return Ok(ResolvedCenter {
                pixel: (x, y),
                world,
                warning: None,
            });
        }

        let (ra, dec) = self.params.center_deg.ok_or_else(|| {
            RasterError::Configuration("crop centre unavailable in pixel or world units".to_string())
        })?;

        let solution = wcs.world_to_pixel(ra, dec);
        if let Some(warning) = solution.warning() {
            log::warn!("Crop centre approximated: {}", warning);
        }

        Ok(ResolvedCenter {
            pixel: solution.position(),
            world: (ra, dec),
            warning: solution.warning(),
        })
    }

    fn resolve_size(&self, wcs: &dyn WorldCoordinateService) -> RasterResult<(usize, usize)> {
        let (sx, sy) = match self.params.size_pix {
            Some(size) => size,
            None => {
                let (dra, ddec) = self.params.size_deg.ok_or_else(|| {
                    RasterError::Configuration("crop size unavailable in pixel or world units".to_string())
                })?;
                let (cdelt1, cdelt2) = wcs.pixel_increments();
                (
                    world_size_to_pixels(dra, cdelt1)?,
                    world_size_to_pixels(ddec, cdelt2)?,
                )
            }
        };

        if sx == 0 || sy == 0 {
            return Err(RasterError::Geometry(format!(
                "crop size ({}, {}) must be at least one pixel on both axes",
                sx, sy
            )));
        }
        Ok((sx, sy))
    }
}

/// Truncate a world extent to whole pixels
fn world_size_to_pixels(size_deg: f64, increment: f64) -> RasterResult<usize> {
    let pixels = (size_deg / increment.abs()).floor();
    if !pixels.is_finite() || pixels < 1.0 {
        return Err(RasterError::Geometry(format!(
            "crop size {} deg is less than one {} deg pixel",
            size_deg,
            increment.abs()
        )));
    }
    Ok(pixels as usize)
}

/// Convenience wrapper around [`Cropper`]
pub fn crop(volume: &ImageVolume, params: CropParams) -> RasterResult<ImageVolume> {
    Cropper::new(params).crop(volume)
}
