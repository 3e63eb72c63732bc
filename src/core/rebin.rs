//! Flux-conserving resampling (frebin/hrebin style)
//!
//! Shrinking averages boxes of input pixels, expanding interpolates
//! bilinearly. New and old grids are aligned on the lower-left corner of
//! the first pixel.

use crate::types::{ImageVolume, PlaneStack, RasterError, RasterResult};
use ndarray::{s, Array3, ArrayView1, ArrayView2, ArrayViewMut1, ArrayViewMut2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// Rebinning parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RebinParams {
    /// Output pixel scale (x, y) in arcsec per pixel
    pub pixel_scale_arcsec: Option<(f64, f64)>,
    /// Keep sums instead of means (pixel values are integrated quantities)
    pub total: bool,
    /// Weight by non-NaN coverage instead of letting NaN poison the output
    pub extrapolate: bool,
}

impl RebinParams {
    /// Square output pixels
    pub fn isotropic(pixel_scale_arcsec: f64) -> Self {
        Self::anisotropic(pixel_scale_arcsec, pixel_scale_arcsec)
    }

    pub fn anisotropic(x_arcsec: f64, y_arcsec: f64) -> Self {
        Self {
            pixel_scale_arcsec: Some((x_arcsec, y_arcsec)),
            ..Default::default()
        }
    }

    pub fn total(mut self, total: bool) -> Self {
        self.total = total;
        self
    }

    pub fn extrapolate(mut self, extrapolate: bool) -> Self {
        self.extrapolate = extrapolate;
        self
    }
}

/// Footprint of one output pixel on the old grid along one axis
#[derive(Debug, Clone, Copy, PartialEq)]
struct Span {
    start: usize,
    stop: usize,
    frac_start: f64,
    /// Uncovered fraction of `stop`; at the grid edge its meaning depends on the mode
    frac_stop: f64,
    /// False when the footprint runs past the last old pixel
    interior: bool,
}

impl Span {
    fn locate(index: usize, ratio: f64, old: usize) -> (usize, f64, f64, bool) {
        let rstart = index as f64 * ratio;
        let start = (rstart.floor() as usize).min(old - 1);
        let frac_start = rstart - start as f64;
        let rstop = rstart + ratio;
        let interior = (rstop.floor() as usize) < old;
        (start, frac_start, rstop, interior)
    }

    /// Edge pixel beyond the grid contributes nothing
    fn strict(index: usize, ratio: f64, old: usize) -> Self {
        let (start, frac_start, rstop, interior) = Self::locate(index, ratio, old);
        let (stop, frac_stop) = if interior {
            let stop = rstop.floor() as usize;
            (stop, 1.0 - (rstop - stop as f64))
        } else {
            (old - 1, 0.0)
        };
        Self {
            start,
            stop,
            frac_start,
            frac_stop,
            interior,
        }
    }

    /// Edge pixel keeps the signed overshoot `(rstop - stop) - 1`
    fn coverage(index: usize, ratio: f64, old: usize) -> Self {
        let (start, frac_start, rstop, interior) = Self::locate(index, ratio, old);
        let (stop, frac_stop) = if interior {
            let stop = rstop.floor() as usize;
            (stop, 1.0 - (rstop - stop as f64))
        } else {
            let stop = old - 1;
            (stop, (rstop - stop as f64) - 1.0)
        };
        Self {
            start,
            stop,
            frac_start,
            frac_stop,
            interior,
        }
    }

    fn len(&self) -> usize {
        self.stop - self.start + 1
    }

    /// Box/bilinear sample of one lane
    fn sample(&self, lane: &ArrayView1<'_, f64>) -> f64 {
        if self.start == self.stop {
            (1.0 - self.frac_start - self.frac_stop) * lane[self.start]
        } else {
            let sum = lane.slice(s![self.start..=self.stop]).sum();
            let edges = self.frac_start * lane[self.start] + self.frac_stop * lane[self.stop];
            sum - edges
        }
    }

    /// Weight of the `offset`-th old pixel inside the footprint
    fn weight(&self, offset: usize) -> f64 {
        if offset == 0 {
            1.0 - self.frac_start
        } else if offset == self.stop - self.start {
            if self.interior {
                1.0 - self.frac_stop
            } else {
                self.frac_stop
            }
        } else {
            1.0
        }
    }
}

fn strict_spans(new: usize, ratio: f64, old: usize) -> Vec<Span> {
    (0..new).map(|i| Span::strict(i, ratio, old)).collect()
}

fn coverage_spans(new: usize, ratio: f64, old: usize) -> Vec<Span> {
    (0..new).map(|i| Span::coverage(i, ratio, old)).collect()
}

fn resample_lane(spans: &[Span], input: ArrayView1<'_, f64>, mut output: ArrayViewMut1<'_, f64>) {
    for (value, span) in output.iter_mut().zip(spans) {
        *value = span.sample(&input);
    }
}

/// Output grid size for a given ratio
pub fn rebinned_size(old: usize, ratio: f64) -> usize {
    (old as f64 / ratio).ceil() as usize
}

/// Separable two-pass rebin; any NaN in a footprint poisons the output pixel
///
/// The x axis is resampled first into an intermediate stack, then its y
/// axis. Sums are divided by `xratio * yratio` unless `total` is set.
pub fn rebin_strict(data: &PlaneStack, xratio: f64, yratio: f64, total: bool) -> PlaneStack {
    let (nw, old_ny, old_nx) = data.dim();
    let nx = rebinned_size(old_nx, xratio);
    let ny = rebinned_size(old_ny, yratio);

    let x_spans = strict_spans(nx, xratio, old_nx);
    let mut stage = Array3::<f64>::zeros((nw, old_ny, nx));
    Zip::from(stage.lanes_mut(Axis(2)))
        .and(data.lanes(Axis(2)))
        .for_each(|out, inp| resample_lane(&x_spans, inp, out));

    let y_spans = strict_spans(ny, yratio, old_ny);
    let mut output = Array3::<f64>::zeros((nw, ny, nx));
    Zip::from(output.lanes_mut(Axis(1)))
        .and(stage.lanes(Axis(1)))
        .for_each(|out, inp| resample_lane(&y_spans, inp, out));

    if !total {
        output /= xratio * yratio;
    }
    output
}

/// Fractional-coverage rebin that skips NaN inputs
///
/// Each output pixel accumulates `value * weight` over its footprint
/// together with the covered weight. Unless `total` is set the sum is
/// normalised by the coverage; zero coverage and exactly zero means both
/// become NaN.
pub fn rebin_extrapolate(data: &PlaneStack, xratio: f64, yratio: f64, total: bool) -> PlaneStack {
    let (nw, old_ny, old_nx) = data.dim();
    let nx = rebinned_size(old_nx, xratio);
    let ny = rebinned_size(old_ny, yratio);

    let x_spans = coverage_spans(nx, xratio, old_nx);
    let y_spans = coverage_spans(ny, yratio, old_ny);
    let mut output = Array3::<f64>::zeros((nw, ny, nx));

    let planes = Zip::from(output.outer_iter_mut()).and(data.outer_iter());

    #[cfg(feature = "parallel")]
    planes.par_for_each(|out_plane, plane| extrapolate_plane(plane, out_plane, &x_spans, &y_spans, total));

    #[cfg(not(feature = "parallel"))]
    planes.for_each(|out_plane, plane| extrapolate_plane(plane, out_plane, &x_spans, &y_spans, total));

    output
}

fn extrapolate_plane(
    plane: ArrayView2<'_, f64>,
    mut out_plane: ArrayViewMut2<'_, f64>,
    x_spans: &[Span],
    y_spans: &[Span],
    total: bool,
) {
    for (y, ys) in y_spans.iter().enumerate() {
        for (x, xs) in x_spans.iter().enumerate() {
            let mut sum = 0.0;
            let mut coverage = 0.0;

            for j in 0..ys.len() {
                let ybox = ys.weight(j);
                for i in 0..xs.len() {
                    let xbox = xs.weight(i);
                    let value = plane[[ys.start + j, xs.start + i]];
                    if !value.is_nan() {
                        sum += value * ybox * xbox;
                        coverage += ybox * xbox;
                    }
                }
            }

            out_plane[[y, x]] = if total {
                sum
            } else if coverage == 0.0 {
                f64::NAN
            } else {
                let mean = sum / coverage;
                if mean == 0.0 {
                    f64::NAN
                } else {
                    mean
                }
            };
        }
    }
}

/// Resampler for images and cubes
pub struct Rebinner {
    params: RebinParams,
}

impl Rebinner {
    pub fn new(params: RebinParams) -> Self {
        Self { params }
    }

    /// Resample a volume onto the configured pixel scale
    pub fn rebin(&self, volume: &ImageVolume) -> RasterResult<ImageVolume> {
        let (xratio, yratio) = self.ratios(volume)?;
        let (nw, old_ny, old_nx) = volume.dims();

        log::info!(
            "Rebinning {}x{}x{} volume by ratio ({:.6}, {:.6}), total={}, extrapolate={}",
            nw, old_ny, old_nx, xratio, yratio, self.params.total, self.params.extrapolate
        );

        let data = if self.params.extrapolate {
            rebin_extrapolate(volume.data(), xratio, yratio, self.params.total)
        } else {
            rebin_strict(volume.data(), xratio, yratio, self.params.total)
        };

        let mut metadata = volume.metadata().clone();
        metadata.crpix = [
            (metadata.crpix[0] - 0.5) / xratio + 0.5,
            (metadata.crpix[1] - 0.5) / yratio + 0.5,
        ];
        metadata.scale = metadata.scale.rescaled(xratio, yratio);

        let (_, ny, nx) = data.dim();
        metadata.history.push(format!(
            "rebinned {}x{} -> {}x{} (ratio {:.6} x {:.6})",
            old_nx, old_ny, nx, ny, xratio, yratio
        ));

        let rebinned = ImageVolume::new(metadata, data, volume.wavelength().map(|w| w.to_vec()))?;

        let (dx, dy) = rebinned.pixel_scale();
        log::info!(
            "Rebin complete: {}x{} pixels at {:.4}\" x {:.4}\"",
            nx,
            ny,
            dx * 3600.0,
            dy * 3600.0
        );

        Ok(rebinned)
    }

    /// Old-to-new pixel size ratios; above one shrinks the grid
    fn ratios(&self, volume: &ImageVolume) -> RasterResult<(f64, f64)> {
        let (x_arcsec, y_arcsec) = self.params.pixel_scale_arcsec.ok_or_else(|| {
            RasterError::Configuration("no target pixel scale given, nothing to rebin".to_string())
        })?;

        for scale in [x_arcsec, y_arcsec] {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(RasterError::Configuration(format!(
                    "target pixel scale must be positive, got {}",
                    scale
                )));
            }
        }

        let (old_dx, old_dy) = volume.pixel_scale();
        if old_dx == 0.0 || old_dy == 0.0 || !old_dx.is_finite() || !old_dy.is_finite() {
            return Err(RasterError::Configuration(format!(
                "volume has degenerate pixel scale ({}, {})",
                old_dx, old_dy
            )));
        }

        Ok((x_arcsec / 3600.0 / old_dx, y_arcsec / 3600.0 / old_dy))
    }
}

/// Convenience wrapper around [`Rebinner`]
pub fn rebin(volume: &ImageVolume, params: RebinParams) -> RasterResult<ImageVolume> {
    Rebinner::new(params).rebin(volume)
}
