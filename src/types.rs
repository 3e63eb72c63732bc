use crate::core::coordinates::CoordinateAdapter;
use ndarray::{Array2, Array3, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A single 2D image plane (y, x)
pub type Plane = Array2<f64>;

/// Stack of image planes (wavelength, y, x); a 2D image is a stack of one
pub type PlaneStack = Array3<f64>;

/// Per-pixel uncertainty, congruent with a volume's data
pub type UncertaintyMap = Array3<f64>;

/// Celestial projection of the two spatial axes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Plate carrée offsets from the reference value (no spherical correction)
    Linear,
    /// Gnomonic (TAN) projection
    Tan,
}

impl Default for Projection {
    fn default() -> Self {
        Projection::Tan
    }
}

/// Pixel-to-intermediate-world scale matrix
///
/// FITS headers carry either a combined `CDi_j` matrix or a `PCi_j`
/// rotation with separate `CDELTi` increments. Resampling collapses the
/// latter into the former since anisotropic rescaling invalidates the split.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ScaleMatrix {
    /// Combined matrix in degrees per pixel, `cd[i][j]` maps pixel axis j to world axis i
    Cd([[f64; 2]; 2]),
    /// Rotation matrix plus signed per-axis increments in degrees per pixel
    PcCdelt { pc: [[f64; 2]; 2], cdelt: [f64; 2] },
}

impl ScaleMatrix {
    /// Diagonal matrix with the usual east-left orientation
    pub fn from_increments(cdelt1: f64, cdelt2: f64) -> Self {
        ScaleMatrix::PcCdelt {
            pc: [[1.0, 0.0], [0.0, 1.0]],
            cdelt: [cdelt1, cdelt2],
        }
    }

    /// Effective combined matrix
    pub fn cd(&self) -> [[f64; 2]; 2] {
        match *self {
            ScaleMatrix::Cd(cd) => cd,
            ScaleMatrix::PcCdelt { pc, cdelt } => [
                [cdelt[0] * pc[0][0], cdelt[0] * pc[0][1]],
                [cdelt[1] * pc[1][0], cdelt[1] * pc[1][1]],
            ],
        }
    }

    /// Signed increments per pixel axis
    ///
    /// For a combined matrix the increments are the column norms, with the
    /// first axis negated when the matrix flips parity.
    pub fn increments(&self) -> [f64; 2] {
        match *self {
            ScaleMatrix::PcCdelt { cdelt, .. } => cdelt,
            ScaleMatrix::Cd(cd) => {
                let det = cd[0][0] * cd[1][1] - cd[0][1] * cd[1][0];
                let scale_x = (cd[0][0] * cd[0][0] + cd[1][0] * cd[1][0]).sqrt();
                let scale_y = (cd[0][1] * cd[0][1] + cd[1][1] * cd[1][1]).sqrt();
                if det < 0.0 {
                    [-scale_x, scale_y]
                } else {
                    [scale_x, scale_y]
                }
            }
        }
    }

    /// Scale each pixel-axis column of the effective matrix
    pub fn rescaled(&self, xratio: f64, yratio: f64) -> Self {
        let cd = self.cd();
        ScaleMatrix::Cd([
            [cd[0][0] * xratio, cd[0][1] * yratio],
            [cd[1][0] * xratio, cd[1][1] * yratio],
        ])
    }
}

/// Header value carried through untouched by the core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeaderValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Logical(bool),
}

impl std::fmt::Display for HeaderValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HeaderValue::Text(s) => write!(f, "{}", s),
            HeaderValue::Integer(i) => write!(f, "{}", i),
            HeaderValue::Float(x) => write!(f, "{}", x),
            HeaderValue::Logical(b) => write!(f, "{}", if *b { "T" } else { "F" }),
        }
    }
}

/// World-coordinate metadata of a volume's spatial axes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinateMetadata {
    /// Reference pixel (1-based, FITS convention)
    pub crpix: [f64; 2],
    /// World coordinate at the reference pixel (RA, Dec) in degrees
    pub crval: [f64; 2],
    pub scale: ScaleMatrix,
    pub projection: Projection,
    /// Spatial dimensions (Nx, Ny); kept in sync by `ImageVolume`
    pub naxis: [usize; 2],
    /// Keywords the core never interprets
    pub keywords: BTreeMap<String, HeaderValue>,
    /// Free-text processing history
    pub history: Vec<String>,
}

impl CoordinateMetadata {
    pub fn new(crpix: [f64; 2], crval: [f64; 2], scale: ScaleMatrix, projection: Projection) -> Self {
        Self {
            crpix,
            crval,
            scale,
            projection,
            naxis: [0, 0],
            keywords: BTreeMap::new(),
            history: Vec::new(),
        }
    }

    /// Signed pixel increments in degrees
    pub fn pixel_increments(&self) -> [f64; 2] {
        self.scale.increments()
    }

    pub fn set_keyword(&mut self, key: &str, value: HeaderValue) {
        self.keywords.insert(key.to_uppercase(), value);
    }

    pub fn keyword(&self, key: &str) -> Option<&HeaderValue> {
        self.keywords.get(&key.to_uppercase())
    }
}

/// A 2D image or 3D spectral cube with its coordinate metadata
///
/// Data is always held as a plane stack `(Nw, Ny, Nx)`; an image is a
/// stack of one plane. Instances are immutable: every geometric operation
/// builds a new volume through [`ImageVolume::new`], which re-derives the
/// metadata dimensions from the data shape.
#[derive(Debug, Clone)]
pub struct ImageVolume {
    metadata: CoordinateMetadata,
    data: PlaneStack,
    wavelength: Option<Vec<f64>>,
}

impl ImageVolume {
    /// Create a volume from explicit parts
    pub fn new(
        mut metadata: CoordinateMetadata,
        data: PlaneStack,
        wavelength: Option<Vec<f64>>,
    ) -> RasterResult<Self> {
        let (nw, ny, nx) = data.dim();
        if nx == 0 || ny == 0 || nw == 0 {
            return Err(RasterError::InvalidVolume(format!(
                "volume dimensions must be positive, got {}x{}x{}",
                nw, ny, nx
            )));
        }
        if let Some(wave) = &wavelength {
            if wave.len() != nw {
                return Err(RasterError::InvalidVolume(format!(
                    "wavelength axis has {} entries for {} planes",
                    wave.len(),
                    nw
                )));
            }
        }

        metadata.naxis = [nx, ny];

        Ok(Self {
            metadata,
            data,
            wavelength,
        })
    }

    /// Create a volume from a single 2D image
    pub fn from_image(metadata: CoordinateMetadata, image: Plane) -> RasterResult<Self> {
        Self::new(metadata, image.insert_axis(Axis(0)), None)
    }

    /// Create a spectral cube
    pub fn from_cube(
        metadata: CoordinateMetadata,
        cube: PlaneStack,
        wavelength: Vec<f64>,
    ) -> RasterResult<Self> {
        Self::new(metadata, cube, Some(wavelength))
    }

    /// Same geometry, new flux values
    pub fn with_data(&self, data: PlaneStack) -> RasterResult<Self> {
        if data.dim() != self.data.dim() {
            return Err(RasterError::ShapeMismatch {
                expected: self.shape(),
                found: data.shape().to_vec(),
            });
        }
        Self::new(self.metadata.clone(), data, self.wavelength.clone())
    }

    pub fn metadata(&self) -> &CoordinateMetadata {
        &self.metadata
    }

    pub fn data(&self) -> &PlaneStack {
        &self.data
    }

    pub fn wavelength(&self) -> Option<&[f64]> {
        self.wavelength.as_deref()
    }

    /// (Nw, Ny, Nx)
    pub fn dims(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    pub fn shape(&self) -> Vec<usize> {
        self.data.shape().to_vec()
    }

    pub fn nx(&self) -> usize {
        self.data.dim().2
    }

    pub fn ny(&self) -> usize {
        self.data.dim().1
    }

    pub fn nw(&self) -> usize {
        self.data.dim().0
    }

    /// A stack with a single plane behaves as a 2D image
    pub fn is_cube(&self) -> bool {
        self.nw() > 1
    }

    pub fn plane(&self, index: usize) -> ArrayView2<'_, f64> {
        self.data.index_axis(Axis(0), index)
    }

    /// Pixel scale magnitudes (dx, dy) in degrees per pixel
    pub fn pixel_scale(&self) -> (f64, f64) {
        let [dx, dy] = self.metadata.pixel_increments();
        (dx.abs(), dy.abs())
    }

    /// Coordinate adapter for the current metadata
    pub fn adapter(&self) -> CoordinateAdapter {
        CoordinateAdapter::new(&self.metadata)
    }

    pub fn into_parts(self) -> (CoordinateMetadata, PlaneStack, Option<Vec<f64>>) {
        (self.metadata, self.data, self.wavelength)
    }
}

/// Non-fatal world-to-pixel inversion diagnostic
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergenceWarning {
    /// Last pixel step size when iteration stopped
    pub accuracy: f64,
    pub iterations: usize,
}

impl std::fmt::Display for ConvergenceWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "world-to-pixel inversion did not converge after {} iterations (accuracy {:.3e} pix)",
            self.iterations, self.accuracy
        )
    }
}

/// Error types for raster processing
#[derive(Debug, thiserror::Error)]
pub enum RasterError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Geometry error: {0}")]
    Geometry(String),

    #[error("Shape mismatch: expected {expected:?}, found {found:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        found: Vec<usize>,
    },

    #[error("Invalid volume: {0}")]
    InvalidVolume(String),

    #[error("Volume store error: {0}")]
    Store(String),

    #[cfg(feature = "gdal")]
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for raster operations
pub type RasterResult<T> = Result<T, RasterError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn test_metadata() -> CoordinateMetadata {
        CoordinateMetadata::new(
            [5.0, 5.0],
            [150.0, 2.0],
            ScaleMatrix::from_increments(-1.0 / 3600.0, 1.0 / 3600.0),
            Projection::Tan,
        )
    }

    #[test]
    fn test_volume_tracks_dimensions() {
        let volume = ImageVolume::new(test_metadata(), Array3::zeros((3, 4, 6)), Some(vec![1.0, 2.0, 3.0])).unwrap();
        assert_eq!(volume.metadata().naxis, [6, 4]);
        assert_eq!(volume.dims(), (3, 4, 6));
        assert!(volume.is_cube());
    }

    #[test]
    fn test_single_plane_is_image() {
        let volume = ImageVolume::new(test_metadata(), Array3::zeros((1, 4, 6)), Some(vec![1.0])).unwrap();
        assert!(!volume.is_cube());
    }

    #[test]
    fn test_rejects_inconsistent_wavelength() {
        let result = ImageVolume::new(test_metadata(), Array3::zeros((3, 4, 6)), Some(vec![1.0]));
        assert!(matches!(result, Err(RasterError::InvalidVolume(_))));
    }

    #[test]
    fn test_rejects_empty_axis() {
        let result = ImageVolume::new(test_metadata(), Array3::zeros((1, 0, 6)), None);
        assert!(matches!(result, Err(RasterError::InvalidVolume(_))));
    }

    #[test]
    fn test_cd_decomposition() {
        let scale = ScaleMatrix::Cd([[-2.0e-4, 0.0], [0.0, 2.0e-4]]);
        let [dx, dy] = scale.increments();
        assert!((dx + 2.0e-4).abs() < 1e-15);
        assert!((dy - 2.0e-4).abs() < 1e-15);

        let rescaled = scale.rescaled(2.0, 3.0).cd();
        assert!((rescaled[0][0] + 4.0e-4).abs() < 1e-15);
        assert!((rescaled[1][1] - 6.0e-4).abs() < 1e-15);
    }
}
