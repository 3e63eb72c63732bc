//! Python bindings

use crate::core::crop::{CropParams, Cropper};
use crate::core::rebin::{RebinParams, Rebinner};
use crate::types::{CoordinateMetadata, ImageVolume, Projection, RasterError, ScaleMatrix};
use numpy::{PyArray3, PyReadonlyArray3, ToPyArray};
use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;

fn to_py_err(error: RasterError) -> PyErr {
    match error {
        RasterError::Configuration(_)
        | RasterError::Geometry(_)
        | RasterError::ShapeMismatch { .. }
        | RasterError::InvalidVolume(_) => PyValueError::new_err(format!("{}", error)),
        _ => PyRuntimeError::new_err(format!("{}", error)),
    }
}

/// Target pixel scale: one value for square pixels or an `(x, y)` pair
#[derive(FromPyObject)]
enum PixelScaleArg {
    Pair((f64, f64)),
    Isotropic(f64),
}

impl PixelScaleArg {
    fn params(self) -> RebinParams {
        match self {
            PixelScaleArg::Pair((x, y)) => RebinParams::anisotropic(x, y),
            PixelScaleArg::Isotropic(scale) => RebinParams::isotropic(scale),
        }
    }
}

/// Python wrapper for ImageVolume
#[pyclass(name = "Volume")]
#[derive(Clone)]
pub struct PyVolume {
    inner: ImageVolume,
}

#[pymethods]
impl PyVolume {
    #[new]
    #[pyo3(signature = (data, crpix, crval, cdelt, wavelength = None))]
    fn new(
        data: PyReadonlyArray3<f64>,
        crpix: (f64, f64),
        crval: (f64, f64),
        cdelt: (f64, f64),
        wavelength: Option<Vec<f64>>,
    ) -> PyResult<Self> {
        let metadata = CoordinateMetadata::new(
            [crpix.0, crpix.1],
            [crval.0, crval.1],
            ScaleMatrix::from_increments(cdelt.0, cdelt.1),
            Projection::Tan,
        );
        let inner = ImageVolume::new(metadata, data.as_array().to_owned(), wavelength).map_err(to_py_err)?;
        Ok(PyVolume { inner })
    }

    #[pyo3(signature = (center_pix = None, size_pix = None, center_deg = None, size_deg = None))]
    fn crop(
        &self,
        center_pix: Option<(f64, f64)>,
        size_pix: Option<(usize, usize)>,
        center_deg: Option<(f64, f64)>,
        size_deg: Option<(f64, f64)>,
    ) -> PyResult<PyVolume> {
        let params = CropParams {
            size_pix,
            center_pix,
            size_deg,
            center_deg,
        };
        let inner = Cropper::new(params).crop(&self.inner).map_err(to_py_err)?;
        Ok(PyVolume { inner })
    }

    /// Resample to `pixel_scale` arcseconds per pixel, a float or an `(x, y)` tuple
    #[pyo3(signature = (pixel_scale, total = false, extrapolate = false))]
    fn rebin(&self, pixel_scale: PixelScaleArg, total: bool, extrapolate: bool) -> PyResult<PyVolume> {
        let params = pixel_scale.params().total(total).extrapolate(extrapolate);
        let inner = Rebinner::new(params).rebin(&self.inner).map_err(to_py_err)?;
        Ok(PyVolume { inner })
    }

    #[getter]
    fn data<'py>(&self, py: Python<'py>) -> &'py PyArray3<f64> {
        self.inner.data().to_pyarray(py)
    }

    #[getter]
    fn wavelength(&self) -> Option<Vec<f64>> {
        self.inner.wavelength().map(|w| w.to_vec())
    }

    /// Pixel scale (dx, dy) in degrees
    #[getter]
    fn pixel_scale(&self) -> (f64, f64) {
        self.inner.pixel_scale()
    }

    #[getter]
    fn shape(&self) -> (usize, usize, usize) {
        self.inner.dims()
    }

    fn __repr__(&self) -> String {
        let (nw, ny, nx) = self.inner.dims();
        let (dx, dy) = self.inner.pixel_scale();
        format!(
            "Volume(shape=({}, {}, {}), pixel_scale=({:.3}\", {:.3}\"))",
            nw,
            ny,
            nx,
            dx * 3600.0,
            dy * 3600.0
        )
    }
}

/// Python module definition
#[pymodule]
fn _core(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyVolume>()?;
    Ok(())
}
