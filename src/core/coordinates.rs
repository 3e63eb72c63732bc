//! World-coordinate adapter
//!
//! Pixel positions handed to and returned from this module follow the FITS
//! convention: 1-based, with the centre of array element `i` at `i + 1`.
//! Array-indexing code never applies that convention itself; it asks the
//! adapter through [`CoordinateAdapter::window_origin`] and
//! [`CoordinateAdapter::center_inside`].

use crate::types::{ConvergenceWarning, CoordinateMetadata, Projection};
use serde::{Deserialize, Serialize};

/// World-to-pixel inversion outcome
///
/// Inversion never fails hard: when the solver runs out of iterations the
/// best iterate is returned with `converged == false`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PixelSolution {
    pub x: f64,
    pub y: f64,
    /// Size of the last Newton step in pixels
    pub accuracy: f64,
    pub iterations: usize,
    pub converged: bool,
}

impl PixelSolution {
    pub fn position(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub fn warning(&self) -> Option<ConvergenceWarning> {
        if self.converged {
            None
        } else {
            Some(ConvergenceWarning {
                accuracy: self.accuracy,
                iterations: self.iterations,
            })
        }
    }
}

/// Pixel ↔ world conversion service
pub trait WorldCoordinateService {
    /// Signed pixel increments (cdelt1, cdelt2) in degrees
    fn pixel_increments(&self) -> (f64, f64);

    /// FITS pixel position to (RA, Dec) in degrees
    fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64);

    /// (RA, Dec) in degrees to FITS pixel position
    fn world_to_pixel(&self, ra: f64, dec: f64) -> PixelSolution;
}

/// Newton solver settings for world-to-pixel inversion
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CoordinateSolverParams {
    /// Stop when the pixel step falls below this size
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for CoordinateSolverParams {
    fn default() -> Self {
        Self {
            tolerance: 1e-6,
            max_iterations: 20,
        }
    }
}

/// Coordinate adapter built from a volume's metadata
#[derive(Debug, Clone)]
pub struct CoordinateAdapter {
    crpix: [f64; 2],
    crval: [f64; 2],
    cd: [[f64; 2]; 2],
    increments: [f64; 2],
    projection: Projection,
    solver: CoordinateSolverParams,
}

impl CoordinateAdapter {
    pub fn new(metadata: &CoordinateMetadata) -> Self {
        Self {
            crpix: metadata.crpix,
            crval: metadata.crval,
            cd: metadata.scale.cd(),
            increments: metadata.pixel_increments(),
            projection: metadata.projection,
            solver: CoordinateSolverParams::default(),
        }
    }

    pub fn with_solver(mut self, solver: CoordinateSolverParams) -> Self {
        self.solver = solver;
        self
    }

    /// 0-based array origin of a window of `size` pixels centred on FITS position `center`
    pub fn window_origin(center: f64, size: usize) -> i64 {
        (center - size as f64 / 2.0).floor() as i64
    }

    /// Whether FITS position `center` lies strictly inside an axis of `n` pixels
    pub fn center_inside(center: f64, n: usize) -> bool {
        let edge = center - 0.5;
        0.0 < edge && edge < n as f64
    }

    /// Intermediate world coordinates (degrees) to celestial coordinates (degrees)
    fn intermediate_to_world(&self, xi: f64, eta: f64) -> (f64, f64) {
        match self.projection {
            Projection::Linear => (normalize_ra(self.crval[0] + xi), self.crval[1] + eta),
            Projection::Tan => {
                let (ra, dec) = inverse_tan_project(
                    xi.to_radians(),
                    eta.to_radians(),
                    self.crval[0].to_radians(),
                    self.crval[1].to_radians(),
                );
                (normalize_ra(ra.to_degrees()), dec.to_degrees())
            }
        }
    }

    /// Linear first guess for the inversion
    fn initial_guess(&self, ra: f64, dec: f64) -> Option<(f64, f64)> {
        let dra = wrap_degrees(ra - self.crval[0]);
        let (xi, eta) = match self.projection {
            Projection::Linear => (dra, dec - self.crval[1]),
            Projection::Tan => (dra * self.crval[1].to_radians().cos(), dec - self.crval[1]),
        };
        let inv = invert_2x2(&self.cd)?;
        Some((
            inv[0][0] * xi + inv[0][1] * eta + self.crpix[0],
            inv[1][0] * xi + inv[1][1] * eta + self.crpix[1],
        ))
    }

    /// Local sky offset from `from` to `to`, scaled so both components are in degrees on the sky
    fn sky_offset(from: (f64, f64), to: (f64, f64)) -> (f64, f64) {
        let cos_dec = to.1.to_radians().cos();
        (wrap_degrees(to.0 - from.0) * cos_dec, to.1 - from.1)
    }
}

impl WorldCoordinateService for CoordinateAdapter {
    fn pixel_increments(&self) -> (f64, f64) {
        (self.increments[0], self.increments[1])
    }

    fn pixel_to_world(&self, x: f64, y: f64) -> (f64, f64) {
        let dx = x - self.crpix[0];
        let dy = y - self.crpix[1];
        let xi = self.cd[0][0] * dx + self.cd[0][1] * dy;
        let eta = self.cd[1][0] * dx + self.cd[1][1] * dy;
        self.intermediate_to_world(xi, eta)
    }

    fn world_to_pixel(&self, ra: f64, dec: f64) -> PixelSolution {
        let target = (ra, dec);
        let (mut x, mut y) = match self.initial_guess(ra, dec) {
            Some(guess) => guess,
            None => {
                log::warn!("Singular scale matrix, world-to-pixel inversion impossible");
                return PixelSolution {
                    x: self.crpix[0],
                    y: self.crpix[1],
                    accuracy: f64::INFINITY,
                    iterations: 0,
                    converged: false,
                };
            }
        };

        let mut accuracy = f64::INFINITY;
        let mut iterations = 0;
        let h = 0.5;

        while iterations < self.solver.max_iterations {
            iterations += 1;

            let current = self.pixel_to_world(x, y);
            let residual = Self::sky_offset(current, target);

            // Central-difference Jacobian in local sky units
            let jx = Self::sky_offset(self.pixel_to_world(x - h, y), self.pixel_to_world(x + h, y));
            let jy = Self::sky_offset(self.pixel_to_world(x, y - h), self.pixel_to_world(x, y + h));
            let jacobian = [
                [jx.0 / (2.0 * h), jy.0 / (2.0 * h)],
                [jx.1 / (2.0 * h), jy.1 / (2.0 * h)],
            ];

            let Some(inv) = invert_2x2(&jacobian) else {
                break;
            };

            let step_x = inv[0][0] * residual.0 + inv[0][1] * residual.1;
            let step_y = inv[1][0] * residual.0 + inv[1][1] * residual.1;
            if !step_x.is_finite() || !step_y.is_finite() {
                break;
            }
            x += step_x;
            y += step_y;

            accuracy = step_x.hypot(step_y);
            if accuracy < self.solver.tolerance {
                return PixelSolution {
                    x,
                    y,
                    accuracy,
                    iterations,
                    converged: true,
                };
            }
        }

        let solution = PixelSolution {
            x,
            y,
            accuracy,
            iterations,
            converged: false,
        };
        if let Some(warning) = solution.warning() {
            log::warn!("{}; using best solution ({:.4}, {:.4})", warning, x, y);
        }
        solution
    }
}

/// Inverse gnomonic projection, all angles in radians
fn inverse_tan_project(xi: f64, eta: f64, crval_ra: f64, crval_dec: f64) -> (f64, f64) {
    let sin_dec0 = crval_dec.sin();
    let cos_dec0 = crval_dec.cos();
    let rho_sq = xi * xi + eta * eta;

    if rho_sq < 1e-30 {
        return (crval_ra, crval_dec);
    }

    let rho = rho_sq.sqrt();
    let c = rho.atan();
    let sin_c = c.sin();
    let cos_c = c.cos();

    let dec = (cos_c * sin_dec0 + eta * sin_c * cos_dec0 / rho).asin();
    let ra = crval_ra + (xi * sin_c).atan2(rho * cos_dec0 * cos_c - eta * sin_dec0 * sin_c);
    (ra, dec)
}

fn invert_2x2(m: &[[f64; 2]; 2]) -> Option<[[f64; 2]; 2]> {
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    if det.abs() < 1e-300 || !det.is_finite() {
        return None;
    }
    let inv_det = 1.0 / det;
    Some([
        [m[1][1] * inv_det, -m[0][1] * inv_det],
        [-m[1][0] * inv_det, m[0][0] * inv_det],
    ])
}

/// Wrap an angle difference into [-180, 180)
fn wrap_degrees(angle: f64) -> f64 {
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

fn normalize_ra(ra: f64) -> f64 {
    ra.rem_euclid(360.0)
}
