use crate::types::{HeaderValue, ImageVolume, RasterError, RasterResult};

/// Solid angle of one pixel in steradians
pub fn pixel_solid_angle(volume: &ImageVolume) -> f64 {
    let (dx, dy) = volume.pixel_scale();
    dx.to_radians() * dy.to_radians()
}

/// Convert a surface brightness from Jy/pixel to MJy/sr
pub fn jy_per_pixel_to_mjy_per_sr(volume: &ImageVolume) -> RasterResult<ImageVolume> {
    let omega = pixel_solid_angle(volume);
    if !(omega.is_finite() && omega > 0.0) {
        return Err(RasterError::Configuration(format!(
            "pixel solid angle {} sr is not positive",
            omega
        )));
    }

    let factor = 1.0e-6 / omega;
    log::debug!("Jy/pix -> MJy/sr factor: {:.6e}", factor);

    let (mut metadata, data, wavelength) = volume.clone().into_parts();
    metadata.set_keyword("BUNIT", HeaderValue::Text("MJy/sr".to_string()));
    metadata.history.push("converted from Jy/pix to MJy/sr".to_string());

    ImageVolume::new(metadata, data * factor, wavelength)
}
