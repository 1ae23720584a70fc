//! Weighted metering windows remapped onto hardware statistics grids.
//!
//! A window is given in image pixels (inclusive corners) and lands on a
//! half-open span of grid cells. The color grid is blended offset-aligned:
//! the destination region starts at the top-left of the union of all spans
//! and is as large as the smallest span, and every window adds its own cell at
//! the same offset from its top-left corner, scaled by its weight. Dividing by
//! the total weight gives the blend. The histogram weight table takes the
//! window weights directly, later windows overwriting earlier ones.

use crate::error::ControlError;
use crate::util::{div_round_nearest_u32, round_to_u8};
use isp3a_traits::stats::{ColorCell, ColorGrid, WeightGrid};

/// Windows beyond this count are ignored.
pub const MAX_METERING_WINDOWS: usize = 6;
pub const MAX_WINDOW_WEIGHT: u8 = 15;
const CHANNELS: usize = 5;

/// Rectangular metering region in image pixels, corners inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MeteringWindow {
    pub x_start: u32,
    pub y_start: u32,
    pub x_end: u32,
    pub y_end: u32,
    pub weight: u8,
}

impl MeteringWindow {
    pub const fn new(x_start: u32, y_start: u32, x_end: u32, y_end: u32, weight: u8) -> Self {
        Self {
            x_start,
            y_start,
            x_end,
            y_end,
            weight,
        }
    }

    /// Geometry and weight check in pixel space.
    pub fn is_valid_for(&self, image_width: u32, image_height: u32) -> bool {
        (1..=MAX_WINDOW_WEIGHT).contains(&self.weight)
            && self.x_start < self.x_end
            && self.y_start < self.y_end
            && self.x_end <= image_width
            && self.y_end <= image_height
    }
}

/// Half-open rectangle of grid cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellSpan {
    pub x0: u16,
    pub y0: u16,
    pub x1: u16,
    pub y1: u16,
}

impl CellSpan {
    pub fn width(&self) -> u16 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u16 {
        self.y1 - self.y0
    }

    pub fn cell_count(&self) -> usize {
        usize::from(self.width()) * usize::from(self.height())
    }

    pub fn contains(&self, x: u16, y: u16) -> bool {
        (self.x0..self.x1).contains(&x) && (self.y0..self.y1).contains(&y)
    }

    fn cells(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        (self.y0..self.y1).flat_map(move |y| (self.x0..self.x1).map(move |x| (x, y)))
    }

    /// Offsets from the top-left corner, in the same row-major order as `cells`.
    fn offsets(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.cells().map(move |(x, y)| (x - self.x0, y - self.y0))
    }
}

/// Image pixels per grid cell, rounded to nearest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellPitch {
    pub horizontal: u32,
    pub vertical: u32,
}

impl CellPitch {
    /// `None` when the image is too small for the grid to have a non-zero pitch.
    pub fn new(image_width: u32, image_height: u32, grid_width: u16, grid_height: u16) -> Option<Self> {
        let horizontal = div_round_nearest_u32(image_width, u32::from(grid_width))?;
        let vertical = div_round_nearest_u32(image_height, u32::from(grid_height))?;
        (horizontal > 0 && vertical > 0).then_some(Self {
            horizontal,
            vertical,
        })
    }

    /// Map a window to the cells it covers, or `None` when the span would
    /// leave the grid.
    pub fn map(&self, w: &MeteringWindow, grid_width: u16, grid_height: u16) -> Option<CellSpan> {
        let axis = |start: u32, end: u32, pitch: u32, limit: u16| -> Option<(u16, u16)> {
            let lo = div_round_nearest_u32(start, pitch)?;
            let hi = div_round_nearest_u32(end.saturating_add(1), pitch)?.max(lo + 1);
            if hi > u32::from(limit) {
                return None;
            }
            Some((u16::try_from(lo).ok()?, u16::try_from(hi).ok()?))
        };
        let (x0, x1) = axis(w.x_start, w.x_end, self.horizontal, grid_width)?;
        let (y0, y1) = axis(w.y_start, w.y_end, self.vertical, grid_height)?;
        Some(CellSpan { x0, y0, x1, y1 })
    }
}

/// Per-channel weighted average for one grid cell.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct WeightedCell {
    pub avg_gr: f64,
    pub avg_r: f64,
    pub avg_b: f64,
    pub avg_gb: f64,
    pub sat: f64,
}

impl WeightedCell {
    fn from_channels(c: [f64; CHANNELS]) -> Self {
        Self {
            avg_gr: c[0],
            avg_r: c[1],
            avg_b: c[2],
            avg_gb: c[3],
            sat: c[4],
        }
    }

    pub fn channels(&self) -> [f64; CHANNELS] {
        [self.avg_gr, self.avg_r, self.avg_b, self.avg_gb, self.sat]
    }

    pub fn to_color_cell(&self) -> ColorCell {
        ColorCell::from_channels(self.channels().map(round_to_u8))
    }
}

/// Weighted averages for the cells of the blend region.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightedRegionResult {
    width: u16,
    height: u16,
    cells: Vec<Option<WeightedCell>>,
    weight_sum: u32,
    windows_used: usize,
    region: CellSpan,
}

impl WeightedRegionResult {
    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    /// `None` for cells outside the blend region.
    pub fn get(&self, x: u16, y: u16) -> Option<&WeightedCell> {
        if x >= self.width || y >= self.height {
            return None;
        }
        self.cells[usize::from(y) * usize::from(self.width) + usize::from(x)].as_ref()
    }

    /// Cell value with uncovered cells reading as zero.
    pub fn value_or_zero(&self, x: u16, y: u16) -> WeightedCell {
        self.get(x, y).copied().unwrap_or_default()
    }

    pub fn weight_sum(&self) -> u32 {
        self.weight_sum
    }

    pub fn windows_used(&self) -> usize {
        self.windows_used
    }

    /// Cells written by the blend.
    pub fn region(&self) -> CellSpan {
        self.region
    }

    pub fn covered_cells(&self) -> usize {
        self.cells.iter().filter(|c| c.is_some()).count()
    }

    /// Write the rounded averages into the covered cells of `grid`.
    /// Returns false (and leaves the grid alone) on a dimension mismatch.
    pub fn apply_to(&self, grid: &mut ColorGrid) -> bool {
        if grid.width() != self.width || grid.height() != self.height {
            return false;
        }
        for (dst, src) in grid.cells_mut().iter_mut().zip(&self.cells) {
            if let Some(v) = src {
                *dst = v.to_color_cell();
            }
        }
        true
    }
}

/// Outcome of a color aggregation pass.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    Weighted(WeightedRegionResult),
    /// Total weight was zero; the grid was not touched.
    NoActiveWindows,
}

#[derive(Debug, Clone, Copy)]
struct ActiveWindow {
    span: CellSpan,
    weight: u8,
}

type ActiveSet = [Option<ActiveWindow>; MAX_METERING_WINDOWS];

/// Top-left of the union of `active`, sized to the smallest span so every
/// window can be read at every offset without leaving its own span.
fn blend_region(active: &ActiveSet) -> Option<CellSpan> {
    let mut spans = active.iter().flatten().map(|a| a.span);
    let first = spans.next()?;
    let (x0, y0, w, h) = spans.fold(
        (first.x0, first.y0, first.width(), first.height()),
        |(x0, y0, w, h), s| (x0.min(s.x0), y0.min(s.y0), w.min(s.width()), h.min(s.height())),
    );
    Some(CellSpan {
        x0,
        y0,
        x1: x0 + w,
        y1: y0 + h,
    })
}

fn try_zeroed<T: Clone + Default>(len: usize, cells: usize) -> Result<Vec<T>, ControlError> {
    let mut v = Vec::new();
    v.try_reserve_exact(len)
        .map_err(|_| ControlError::AllocationFailure { cells })?;
    v.resize(len, T::default());
    Ok(v)
}

/// Remaps a set of metering windows onto statistics grids for one image size.
#[derive(Debug, Clone, Copy)]
pub struct MeteringWindowAggregator<'w> {
    windows: &'w [MeteringWindow],
    image_width: u32,
    image_height: u32,
}

impl<'w> MeteringWindowAggregator<'w> {
    pub fn new(windows: &'w [MeteringWindow], image_width: u32, image_height: u32) -> Self {
        if windows.len() > MAX_METERING_WINDOWS {
            tracing::debug!(
                count = windows.len(),
                max = MAX_METERING_WINDOWS,
                "extra metering windows ignored"
            );
        }
        Self {
            windows,
            image_width,
            image_height,
        }
    }

    fn active(&self, grid_width: u16, grid_height: u16) -> ActiveSet {
        let mut out: ActiveSet = [None; MAX_METERING_WINDOWS];
        let Some(pitch) = CellPitch::new(self.image_width, self.image_height, grid_width, grid_height)
        else {
            tracing::debug!(
                image_width = self.image_width,
                image_height = self.image_height,
                grid_width,
                grid_height,
                "image too small for statistics grid; no window can be mapped"
            );
            return out;
        };
        for (i, w) in self.windows.iter().take(MAX_METERING_WINDOWS).enumerate() {
            if !w.is_valid_for(self.image_width, self.image_height) {
                tracing::debug!(index = i, window = ?w, "metering window skipped: invalid");
                continue;
            }
            match pitch.map(w, grid_width, grid_height) {
                Some(span) => {
                    out[i] = Some(ActiveWindow {
                        span,
                        weight: w.weight,
                    });
                }
                None => {
                    tracing::debug!(index = i, window = ?w, "metering window skipped: outside grid");
                }
            }
        }
        out
    }

    /// Compute the weighted per-cell averages without touching `grid`.
    pub fn aggregate_color(&self, grid: &ColorGrid) -> Result<Aggregation, ControlError> {
        let (gw, gh) = (grid.width(), grid.height());
        let active = self.active(gw, gh);
        let weight_sum: u32 = active.iter().flatten().map(|a| u32::from(a.weight)).sum();
        let Some(region) = blend_region(&active).filter(|_| weight_sum > 0) else {
            return Ok(Aggregation::NoActiveWindows);
        };

        let n = usize::from(gw) * usize::from(gh);
        let m = region.cell_count();
        // planar accumulators: channel c of region offset k lives at acc[c * m + k]
        let mut acc: Vec<u64> = try_zeroed(m * CHANNELS, n)?;
        let mut cells: Vec<Option<WeightedCell>> = try_zeroed(n, n)?;

        let mut windows_used = 0usize;
        for a in active.iter().flatten() {
            let w = u64::from(a.weight);
            for (k, (dx, dy)) in region.offsets().enumerate() {
                let Some(cell) = grid.get(a.span.x0 + dx, a.span.y0 + dy) else {
                    continue;
                };
                for (c, v) in cell.channels().into_iter().enumerate() {
                    acc[c * m + k] += u64::from(v) * w;
                }
            }
            windows_used += 1;
        }

        let d = f64::from(weight_sum);
        for (k, (x, y)) in region.cells().enumerate() {
            let mut ch = [0.0f64; CHANNELS];
            for (c, v) in ch.iter_mut().enumerate() {
                *v = acc[c * m + k] as f64 / d;
            }
            cells[usize::from(y) * usize::from(gw) + usize::from(x)] =
                Some(WeightedCell::from_channels(ch));
        }

        tracing::trace!(windows_used, weight_sum, ?region, "color statistics weighted");
        Ok(Aggregation::Weighted(WeightedRegionResult {
            width: gw,
            height: gh,
            cells,
            weight_sum,
            windows_used,
            region,
        }))
    }

    /// Aggregate and write the result back into `grid`. On any error or when
    /// no window is active the grid is left byte-for-byte unchanged.
    pub fn apply_color(&self, grid: &mut ColorGrid) -> Result<Aggregation, ControlError> {
        let out = self.aggregate_color(grid)?;
        if let Aggregation::Weighted(ref r) = out {
            r.apply_to(grid);
        }
        Ok(out)
    }

    /// Rewrite the histogram weight table from the windows. Returns the
    /// number of windows applied; with none the table is left untouched.
    pub fn apply_hist_weights(&self, grid: &mut WeightGrid) -> usize {
        let (gw, gh) = (grid.width(), grid.height());
        let active = self.active(gw, gh);
        let used = active.iter().flatten().count();
        if used == 0 {
            return 0;
        }
        let weights = grid.weights_mut();
        weights.fill(0);
        for a in active.iter().flatten() {
            for (x, y) in a.span.cells() {
                weights[usize::from(y) * usize::from(gw) + usize::from(x)] = a.weight;
            }
        }
        used
    }
}
