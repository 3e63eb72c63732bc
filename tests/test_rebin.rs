use approx::assert_abs_diff_eq;
use ndarray::Array3;
use skyraster::core::rebin::{rebin, rebin_extrapolate, rebin_strict, RebinParams};
use skyraster::types::{CoordinateMetadata, ImageVolume, Projection, RasterError, ScaleMatrix};

// Power-of-two pixel size keeps the arcsec round trip exact
const CDELT: f64 = 1.0 / 1024.0;
const CDELT_ARCSEC: f64 = CDELT * 3600.0;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn volume(data: Array3<f64>) -> ImageVolume {
    let (_, ny, nx) = data.dim();
    let metadata = CoordinateMetadata::new(
        [nx as f64 / 2.0 + 0.5, ny as f64 / 2.0 + 0.5],
        [202.48, 47.23],
        ScaleMatrix::from_increments(-CDELT, CDELT),
        Projection::Tan,
    );
    let wavelength = if data.dim().0 > 1 {
        Some((0..data.dim().0).map(|k| 10.0 + k as f64).collect())
    } else {
        None
    };
    ImageVolume::new(metadata, data, wavelength).expect("Failed to build test volume")
}

fn ramp(nw: usize, ny: usize, nx: usize) -> Array3<f64> {
    Array3::from_shape_fn((nw, ny, nx), |(k, y, x)| 1.0 + k as f64 + 0.5 * y as f64 + 0.25 * x as f64)
}

#[test]
fn test_identity_rebin_both_modes() {
    init_logging();

    let input = volume(ramp(2, 7, 9));
    for extrapolate in [false, true] {
        let params = RebinParams::isotropic(CDELT_ARCSEC).extrapolate(extrapolate);
        let output = rebin(&input, params).expect("Identity rebin failed");

        println!("extrapolate={}: {:?} -> {:?}", extrapolate, input.dims(), output.dims());
        assert_eq!(output.dims(), input.dims());
        for (a, b) in output.data().iter().zip(input.data().iter()) {
            assert_abs_diff_eq!(a, b, epsilon = 1e-12);
        }
        assert_eq!(output.metadata().crpix, input.metadata().crpix);
    }
}

#[test]
fn test_exact_ratio_modes_agree_on_uniform_input() {
    init_logging();

    let input = volume(Array3::ones((1, 4, 4)));
    let strict = rebin(&input, RebinParams::isotropic(2.0 * CDELT_ARCSEC)).expect("Strict rebin failed");
    let extrapolated = rebin(&input, RebinParams::isotropic(2.0 * CDELT_ARCSEC).extrapolate(true))
        .expect("Extrapolation rebin failed");

    assert_eq!(strict.dims(), (1, 2, 2));
    assert_eq!(extrapolated.dims(), (1, 2, 2));
    for (&s, &e) in strict.data().iter().zip(extrapolated.data().iter()) {
        assert_abs_diff_eq!(s, 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(e, 1.0, epsilon = 1e-12);
    }
}

#[test]
fn test_flux_conservation_with_total() {
    init_logging();

    let data = ramp(1, 12, 12);
    let input_sum = data.sum();
    let output = rebin_strict(&data, 3.0, 2.0, true);

    println!("Input sum {:.6}, output sum {:.6}", input_sum, output.sum());
    assert_eq!(output.dim(), (1, 6, 4));
    assert_abs_diff_eq!(output.sum(), input_sum, epsilon = 1e-9);

    let mean = rebin_strict(&data, 3.0, 2.0, false);
    assert_abs_diff_eq!(mean.sum() * 6.0, input_sum, epsilon = 1e-9);
}

#[test]
fn test_non_integer_shrink_conserves_flux() {
    init_logging();

    // 10 / 2.5 = 4 output pixels along each axis, no border truncation
    let data = ramp(1, 10, 10);
    let output = rebin_strict(&data, 2.5, 2.5, true);
    assert_eq!(output.dim(), (1, 4, 4));
    assert_abs_diff_eq!(output.sum(), data.sum(), epsilon = 1e-9);
}

#[test]
fn test_nan_poisons_strict_but_not_extrapolation() {
    init_logging();

    let mut data = Array3::from_elem((1, 4, 4), 3.0);
    data[[0, 0, 0]] = f64::NAN;

    let strict = rebin_strict(&data, 2.0, 2.0, false);
    assert!(strict[[0, 0, 0]].is_nan());
    assert_abs_diff_eq!(strict[[0, 1, 1]], 3.0, epsilon = 1e-12);

    let tolerant = rebin_extrapolate(&data, 2.0, 2.0, false);
    assert_abs_diff_eq!(tolerant[[0, 0, 0]], 3.0, epsilon = 1e-12);
    assert!(tolerant.iter().all(|v| !v.is_nan()));
}

#[test]
fn test_extrapolation_zero_mean_is_blank() {
    init_logging();

    let data = Array3::zeros((1, 4, 4));
    let output = rebin_extrapolate(&data, 2.0, 2.0, false);
    assert!(output.iter().all(|v| v.is_nan()));

    let summed = rebin_extrapolate(&data, 2.0, 2.0, true);
    assert!(summed.iter().all(|&v| v == 0.0));
}

#[test]
fn test_rebin_cube_keeps_planes_and_wavelength() {
    init_logging();

    let input = volume(ramp(3, 8, 8));
    let output = rebin(&input, RebinParams::isotropic(4.0 * CDELT_ARCSEC)).expect("Cube rebin failed");

    assert_eq!(output.dims(), (3, 2, 2));
    assert_eq!(output.wavelength(), input.wavelength());
    let (dx, dy) = output.pixel_scale();
    assert_abs_diff_eq!(dx, 4.0 * CDELT, epsilon = 1e-15);
    assert_abs_diff_eq!(dy, 4.0 * CDELT, epsilon = 1e-15);
    assert_abs_diff_eq!(output.metadata().crpix[0], 1.5, epsilon = 1e-12);
    assert!(matches!(output.metadata().scale, ScaleMatrix::Cd(_)));
}

#[test]
fn test_expansion_preserves_surface_brightness() {
    init_logging();

    let input = volume(Array3::from_elem((1, 3, 3), 2.0));
    let output = rebin(&input, RebinParams::isotropic(0.5 * CDELT_ARCSEC)).expect("Expansion failed");

    assert_eq!(output.dims(), (1, 6, 6));
    for &v in output.data().iter() {
        assert_abs_diff_eq!(v, 2.0, epsilon = 1e-12);
    }
}

#[test]
fn test_missing_scale_is_configuration_error() {
    let input = volume(ramp(1, 4, 4));
    let result = rebin(&input, RebinParams::default());
    assert!(matches!(result, Err(RasterError::Configuration(_))));

    let result = rebin(&input, RebinParams::isotropic(-1.0));
    assert!(matches!(result, Err(RasterError::Configuration(_))));
}

#[test]
fn test_anisotropic_rebin_of_rotated_grid() {
    init_logging();

    let theta = 30.0f64.to_radians();
    let (sin, cos) = theta.sin_cos();
    let metadata = CoordinateMetadata::new(
        [4.5, 4.5],
        [150.12, 2.21],
        ScaleMatrix::PcCdelt {
            pc: [[cos, -sin], [sin, cos]],
            cdelt: [-CDELT, CDELT],
        },
        Projection::Tan,
    );
    let data = Array3::from_shape_fn((1, 8, 8), |(_, y, x)| x as f64 + 100.0 * y as f64);
    let input = ImageVolume::new(metadata, data, None).expect("Failed to build rotated volume");
    let old_cd = input.metadata().scale.cd();

    let params = RebinParams::anisotropic(2.0 * CDELT_ARCSEC, 4.0 * CDELT_ARCSEC);
    let output = rebin(&input, params).expect("Anisotropic rebin failed");

    println!("Rotated grid {:?} -> {:?}", input.dims(), output.dims());
    assert_eq!(output.dims(), (1, 2, 4));
    // x pairs average to 2j + 0.5, y quadruples to 4i + 1.5
    for ((_, i, j), &value) in output.data().indexed_iter() {
        let expected = 2.0 * j as f64 + 0.5 + 100.0 * (4.0 * i as f64 + 1.5);
        assert_abs_diff_eq!(value, expected, epsilon = 1e-9);
    }

    let new_scale = output.metadata().scale;
    assert!(matches!(new_scale, ScaleMatrix::Cd(_)));
    let new_cd = new_scale.cd();
    for row in 0..2 {
        assert_abs_diff_eq!(new_cd[row][0], 2.0 * old_cd[row][0], epsilon = 1e-15);
        assert_abs_diff_eq!(new_cd[row][1], 4.0 * old_cd[row][1], epsilon = 1e-15);
    }

    let (dx, dy) = output.pixel_scale();
    assert_abs_diff_eq!(dx, 2.0 * CDELT, epsilon = 1e-15);
    assert_abs_diff_eq!(dy, 4.0 * CDELT, epsilon = 1e-15);
    assert_abs_diff_eq!(output.metadata().crpix[0], 2.5, epsilon = 1e-12);
    assert_abs_diff_eq!(output.metadata().crpix[1], 1.5, epsilon = 1e-12);
}

#[test]
fn test_extrapolation_pins_fractional_weights() {
    init_logging();

    // 5 old pixels at ratio 1.5 with one blank; the edge output pixel only
    // sees the upper half of the last input pixel
    let data = Array3::from_shape_vec((1, 1, 5), vec![1.0, 2.0, f64::NAN, 4.0, 5.0])
        .expect("Failed to build row");
    let output = rebin_extrapolate(&data, 1.5, 1.0, false);

    println!("Extrapolated row: {:?}", output);
    let expected = [2.0 / 1.5, 2.0, 6.5 / 1.5, 5.0];
    assert_eq!(output.dim(), (1, 1, 4));
    for (&value, &want) in output.iter().zip(expected.iter()) {
        assert_abs_diff_eq!(value, want, epsilon = 1e-12);
    }
}
