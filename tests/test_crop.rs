use ndarray::Array3;
use skyraster::core::coordinates::WorldCoordinateService;
use skyraster::core::crop::{crop, CropParams, Cropper};
use skyraster::types::{CoordinateMetadata, ImageVolume, Projection, RasterError, ScaleMatrix};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// 64x48 image, 1 arcsec pixels, value encodes the array index
fn field() -> ImageVolume {
    let metadata = CoordinateMetadata::new(
        [32.5, 24.5],
        [10.684, 41.269],
        ScaleMatrix::from_increments(-1.0 / 3600.0, 1.0 / 3600.0),
        Projection::Tan,
    );
    let data = Array3::from_shape_fn((1, 48, 64), |(_, y, x)| (y * 1000 + x) as f64);
    ImageVolume::new(metadata, data, None).expect("Failed to build test field")
}

#[test]
fn test_interior_crop_shape_and_reference_pixel() {
    init_logging();

    let input = field();
    for &(dx, dy) in &[(10usize, 10usize), (11, 7), (1, 1), (64, 48)] {
        let output = crop(&input, CropParams::pixels((32.5, 24.5), (dx, dy)))
            .expect("Interior crop failed");

        println!("Crop {}x{} -> {:?}, crpix {:?}", dx, dy, output.dims(), output.metadata().crpix);
        assert_eq!(output.dims(), (1, dy, dx));
        assert_eq!(
            output.metadata().crpix,
            [(dx / 2) as f64 + 0.5, (dy / 2) as f64 + 0.5]
        );
    }
}

#[test]
fn test_crop_reference_value_is_centre_world_position() {
    init_logging();

    let input = field();
    let adapter = input.adapter();
    let output = crop(&input, CropParams::pixels((20.0, 30.0), (8, 8))).expect("Crop failed");

    let (ra, dec) = adapter.pixel_to_world(20.0, 30.0);
    assert!((output.metadata().crval[0] - ra).abs() < 1e-12);
    assert!((output.metadata().crval[1] - dec).abs() < 1e-12);
    assert!(output
        .metadata()
        .history
        .iter()
        .any(|line| line.starts_with("cropped")));
}

#[test]
fn test_border_rejection() {
    init_logging();

    let input = field();
    let centres = [(0.5, 10.0), (64.5, 10.0), (10.0, 0.2), (10.0, 48.5), (-3.0, -3.0)];
    for &centre in &centres {
        let result = crop(&input, CropParams::pixels(centre, (1, 1)));
        println!("Centre {:?}: {:?}", centre, result.as_ref().map(|v| v.dims()));
        assert!(matches!(result, Err(RasterError::Geometry(_))));
    }

    // Centre inside, window crossing the edge
    let result = crop(&input, CropParams::pixels((60.0, 24.0), (20, 4)));
    assert!(matches!(result, Err(RasterError::Geometry(_))));
}

#[test]
fn test_world_crop_of_cube() {
    init_logging();

    let metadata = CoordinateMetadata::new(
        [16.5, 16.5],
        [150.1, 2.2],
        ScaleMatrix::Cd([[-2.0 / 3600.0, 0.0], [0.0, 2.0 / 3600.0]]),
        Projection::Tan,
    );
    let data = Array3::from_shape_fn((4, 32, 32), |(k, y, x)| (k * 10000 + y * 100 + x) as f64);
    let cube = ImageVolume::new(metadata, data, Some(vec![3.6, 4.5, 5.8, 8.0])).expect("Failed to build cube");

    let cropper = Cropper::new(CropParams::world((150.1, 2.2), (21.0 / 3600.0, 13.0 / 3600.0)));
    let output = cropper.crop(&cube).expect("World crop failed");

    // 21" / 2" -> 10 px, 13" / 2" -> 6 px
    assert_eq!(output.dims(), (4, 6, 10));
    assert_eq!(output.wavelength(), cube.wavelength());
    // origin floor(16.5 - 5) = 11, floor(16.5 - 3) = 13
    assert_eq!(output.data()[[3, 0, 0]], 31311.0);
}

#[test]
fn test_sub_pixel_world_size_rejected() {
    init_logging();

    let input = field();
    let result = crop(&input, CropParams::world((10.684, 41.269), (0.5 / 3600.0, 5.0 / 3600.0)));
    assert!(matches!(result, Err(RasterError::Geometry(_))));
}
