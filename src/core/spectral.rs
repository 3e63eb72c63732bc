//! Plane-level tools for spectral cubes
//!
//! Slicing a cube into images, building inverse-variance weights and
//! stitching cubes observed in separate wavelength segments.

use crate::core::artifacts::closest_index;
use crate::core::crop::{CropParams, Cropper};
use crate::types::{ImageVolume, PlaneStack, RasterError, RasterResult};
use ndarray::{Array2, Axis, Zip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Cube concatenation options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcatParams {
    /// Reorder planes by ascending wavelength
    pub sort: bool,
    /// Keep pixels that are blank in only some of the inputs
    pub keep_fragments: bool,
    /// Crop the result to its non-blank extent
    pub crop_edge: bool,
    /// Per-segment wavelength windows `(min, max)`; each input keeps only
    /// the planes inside the window matching its own coverage
    pub ranges: Option<Vec<(f64, f64)>>,
}

impl Default for ConcatParams {
    fn default() -> Self {
        Self {
            sort: true,
            keep_fragments: true,
            crop_edge: false,
            ranges: None,
        }
    }
}

/// How overlapping wavelengths between two segments are removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrossingMode {
    /// Drop every plane of the overlap
    All,
    /// Keep a similar number of planes from both sides of the overlap
    Balanced,
    /// Keep the left segment up to its smallest overlapping wavelength
    ClosestLeft,
    /// Keep the right segment from its smallest overlapping wavelength
    ClosestRight,
}

/// Split a volume into one image per plane
pub fn slice_planes(volume: &ImageVolume) -> RasterResult<Vec<ImageVolume>> {
    volume
        .data()
        .outer_iter()
        .map(|plane| ImageVolume::from_image(volume.metadata().clone(), plane.to_owned()))
        .collect()
}

/// Element-wise `1 / x^2`, the usual weight map for an uncertainty volume
pub fn inverse_square(volume: &ImageVolume) -> RasterResult<ImageVolume> {
    volume.with_data(volume.data().mapv(|v| 1.0 / (v * v)))
}

/// Stack the planes of several cubes that share a spatial grid
///
/// Coordinate metadata is taken from the last input.
pub fn concatenate(volumes: &[ImageVolume], params: ConcatParams) -> RasterResult<ImageVolume> {
    let last = volumes
        .last()
        .ok_or_else(|| RasterError::Configuration("no volumes to concatenate".to_string()))?;
    let (_, ny, nx) = last.dims();

    let mut wavelength = Vec::new();
    let mut segments = Vec::with_capacity(volumes.len());
    for (i, volume) in volumes.iter().enumerate() {
        let wave = volume.wavelength().ok_or_else(|| {
            RasterError::Configuration(format!("volume {} has no wavelength axis", i))
        })?;
        if (volume.ny(), volume.nx()) != (ny, nx) {
            return Err(RasterError::ShapeMismatch {
                expected: vec![ny, nx],
                found: vec![volume.ny(), volume.nx()],
            });
        }

        let keep = match &params.ranges {
            Some(ranges) => planes_in_window(wave, ranges)?,
            None => (0..wave.len()).collect(),
        };
        log::debug!("Volume {} contributes {} of {} planes", i, keep.len(), wave.len());
        wavelength.extend(keep.iter().map(|&k| wave[k]));
        segments.push(volume.data().select(Axis(0), &keep));
    }

    let views: Vec<_> = segments.iter().map(|segment| segment.view()).collect();
    let stacked = ndarray::concatenate(Axis(0), &views)
        .map_err(|e| RasterError::InvalidVolume(format!("concatenation failed: {}", e)))?;

    let (mut data, wavelength) = if params.sort {
        let mut order: Vec<usize> = (0..wavelength.len()).collect();
        order.sort_by(|&a, &b| wavelength[a].total_cmp(&wavelength[b]));
        let sorted_wave: Vec<f64> = order.iter().map(|&i| wavelength[i]).collect();
        (stacked.select(Axis(0), &order), sorted_wave)
    } else {
        (stacked, wavelength)
    };

    if !params.keep_fragments {
        let mut blank = Array2::from_elem((ny, nx), false);
        for volume in volumes {
            let volume_blank = all_nan_along_planes(volume.data());
            Zip::from(&mut blank).and(&volume_blank).for_each(|b, &v| *b |= v);
        }
        for mut plane in data.outer_iter_mut() {
            Zip::from(&mut plane).and(&blank).for_each(|value, &b| {
                if b {
                    *value = f64::NAN;
                }
            });
        }
    }

    log::info!(
        "Concatenated {} volumes into {} planes",
        volumes.len(),
        wavelength.len()
    );

    let combined = ImageVolume::new(last.metadata().clone(), data, Some(wavelength))?;
    if params.crop_edge {
        crop_to_valid(&combined)
    } else {
        Ok(combined)
    }
}

/// Planes of one segment inside the window that best matches its coverage
///
/// The window's lower bound is the one closest to the segment's first
/// wavelength and its upper bound the one closest to its last wavelength.
fn planes_in_window(wave: &[f64], ranges: &[(f64, f64)]) -> RasterResult<Vec<usize>> {
    let (first, last) = match (wave.first(), wave.last()) {
        (Some(&first), Some(&last)) => (first, last),
        _ => return Ok(Vec::new()),
    };
    if ranges.is_empty() {
        return Err(RasterError::Configuration(
            "wavelength trimming needs at least one range".to_string(),
        ));
    }

    let lower: Vec<f64> = ranges.iter().map(|r| r.0).collect();
    let upper: Vec<f64> = ranges.iter().map(|r| r.1).collect();
    let wmin = lower[closest_index(&lower, first)];
    let wmax = upper[closest_index(&upper, last)];

    Ok(wave
        .iter()
        .enumerate()
        .filter(|&(_, &w)| w >= wmin && w <= wmax)
        .map(|(k, _)| k)
        .collect())
}

/// Indices of planes to drop where consecutive segments overlap
///
/// An overlap starts wherever the wavelength stops increasing. It spans
/// from the first plane above the last wavelength still below the drop to
/// the last plane before the wavelength climbs past the pre-drop maximum.
pub fn crossing_wavelengths(wave: &[f64], mode: CrossingMode) -> Vec<usize> {
    let n = wave.len();
    let mut dropped = BTreeSet::new();

    for i in 0..n.saturating_sub(1) {
        if wave[i] < wave[i + 1] {
            continue;
        }

        let below = (0..=i).rev().find(|&j| wave[i + 1] > wave[j]);
        let above = (i + 1..n).find(|&j| wave[j] > wave[i]);
        if below.is_none() {
            log::warn!("Overlap at plane {} is fully covered on the left", i + 1);
        }
        if above.is_none() {
            log::warn!("Overlap at plane {} is fully covered on the right", i + 1);
        }

        let start = below.map_or(0, |j| j + 1);
        let stop = above.unwrap_or(n);
        let segment: Vec<usize> = (start..stop).collect();
        if segment.is_empty() {
            continue;
        }

        // positions within the segment in ascending wavelength
        let mut order: Vec<usize> = (0..segment.len()).collect();
        order.sort_by(|&a, &b| wave[segment[a]].total_cmp(&wave[segment[b]]));

        let (keep_head, keep_tail) = match mode {
            CrossingMode::All => (0, 0),
            CrossingMode::Balanced => balanced_split(&order),
            CrossingMode::ClosestLeft => (order[0], 0),
            CrossingMode::ClosestRight => (0, segment.len() - order[0]),
        };
        let end = segment.len().saturating_sub(keep_tail);
        if keep_head < end {
            dropped.extend(&segment[keep_head..end]);
        }
    }

    dropped.into_iter().collect()
}

/// Numbers of planes kept at the head and the tail of an overlap
///
/// Walks outwards from the middle of the sorted overlap until it finds a
/// wavelength from the other side of the smallest one, then keeps the
/// ascending run on both sides of that pair.
fn balanced_split(order: &[usize]) -> (usize, usize) {
    let len = order.len();
    let center = len.saturating_sub(1) / 2;
    for k in 0..center {
        if order[center] > order[0] {
            if order[center - k] < order[0] {
                return (order[center - k] + 1, len - order[center]);
            }
        } else if order[center + k] > order[0] {
            return (order[center] + 1, len - order[center + k]);
        }
    }
    (0, 0)
}

/// Drop the planes where wavelength segments overlap
pub fn clean_crossing_wavelengths(volume: &ImageVolume, mode: CrossingMode) -> RasterResult<ImageVolume> {
    let wave = volume.wavelength().ok_or_else(|| {
        RasterError::Configuration("wavelength cleanup needs a wavelength axis".to_string())
    })?;
    let dropped = crossing_wavelengths(wave, mode);
    log::info!("Dropping {} overlapping wavelength planes", dropped.len());
    remove_planes(volume, &dropped)
}

/// Copy of `volume` without the listed planes
pub fn remove_planes(volume: &ImageVolume, indices: &[usize]) -> RasterResult<ImageVolume> {
    let nw = volume.nw();
    if let Some(&bad) = indices.iter().find(|&&k| k >= nw) {
        return Err(RasterError::Configuration(format!(
            "plane {} out of range for {} planes",
            bad, nw
        )));
    }

    let keep: Vec<usize> = (0..nw).filter(|k| !indices.contains(k)).collect();
    if keep.is_empty() {
        return Err(RasterError::InvalidVolume(format!(
            "removing {} planes leaves an empty volume",
            indices.len()
        )));
    }
    let data = volume.data().select(Axis(0), &keep);
    let wavelength = volume
        .wavelength()
        .map(|wave| keep.iter().map(|&k| wave[k]).collect());

    let mut metadata = volume.metadata().clone();
    metadata.history.push(format!("removed {} planes", nw - keep.len()));
    ImageVolume::new(metadata, data, wavelength)
}

/// Crop a volume to the bounding box of its non-blank rows and columns
pub fn crop_to_valid(volume: &ImageVolume) -> RasterResult<ImageVolume> {
    let blank = all_nan_along_planes(volume.data());

    let valid_columns: Vec<usize> = blank
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column.iter().any(|&b| !b))
        .map(|(x, _)| x)
        .collect();
    let valid_rows: Vec<usize> = blank
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&b| !b))
        .map(|(y, _)| y)
        .collect();

    let (xmin, xmax, ymin, ymax) = match (
        valid_columns.first(),
        valid_columns.last(),
        valid_rows.first(),
        valid_rows.last(),
    ) {
        (Some(&x0), Some(&x1), Some(&y0), Some(&y1)) => (x0, x1, y0, y1),
        _ => {
            return Err(RasterError::Geometry(
                "volume has no valid pixel to crop to".to_string(),
            ))
        }
    };

    let dx = xmax - xmin + 1;
    let dy = ymax - ymin + 1;
    // half-pixel shift keeps the window origin at (xmin, ymin) for any size
    let center = (
        xmin as f64 + dx as f64 / 2.0 + 0.5,
        ymin as f64 + dy as f64 / 2.0 + 0.5,
    );
    log::debug!("Valid extent x=[{}, {}] y=[{}, {}]", xmin, xmax, ymin, ymax);

    Cropper::new(CropParams::pixels(center, (dx, dy))).crop(volume)
}

/// Spatial mask of pixels that are NaN in every plane
fn all_nan_along_planes(data: &PlaneStack) -> Array2<bool> {
    let (_, ny, nx) = data.dim();
    let mut blank = Array2::from_elem((ny, nx), true);
    for plane in data.outer_iter() {
        Zip::from(&mut blank).and(&plane).for_each(|b, &v| *b &= v.is_nan());
    }
    blank
}
