//! Hardware statistics grids delivered once per frame.

/// Largest grid dimension the statistics block can produce in either axis.
pub const MAX_GRID_DIM: u16 = 150;

/// One cell of the color statistics grid (8-bit channel averages).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ColorCell {
    pub avg_gr: u8,
    pub avg_r: u8,
    pub avg_b: u8,
    pub avg_gb: u8,
    pub sat: u8,
}

impl ColorCell {
    pub const fn splat(v: u8) -> Self {
        Self {
            avg_gr: v,
            avg_r: v,
            avg_b: v,
            avg_gb: v,
            sat: v,
        }
    }

    /// Channels in a fixed order: gr, r, b, gb, sat.
    pub const fn channels(&self) -> [u8; 5] {
        [self.avg_gr, self.avg_r, self.avg_b, self.avg_gb, self.sat]
    }

    pub const fn from_channels(c: [u8; 5]) -> Self {
        Self {
            avg_gr: c[0],
            avg_r: c[1],
            avg_b: c[2],
            avg_gb: c[3],
            sat: c[4],
        }
    }
}

#[inline]
fn dims_ok(width: u16, height: u16) -> bool {
    (1..=MAX_GRID_DIM).contains(&width) && (1..=MAX_GRID_DIM).contains(&height)
}

/// Row-major grid of color cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColorGrid {
    width: u16,
    height: u16,
    cells: Vec<ColorCell>,
}

impl ColorGrid {
    /// Zero-filled grid; `None` when a dimension is 0 or above [`MAX_GRID_DIM`].
    pub fn new(width: u16, height: u16) -> Option<Self> {
        Self::filled(width, height, ColorCell::default())
    }

    pub fn filled(width: u16, height: u16, cell: ColorCell) -> Option<Self> {
        if !dims_ok(width, height) {
            return None;
        }
        let n = usize::from(width) * usize::from(height);
        Some(Self {
            width,
            height,
            cells: vec![cell; n],
        })
    }

    /// Wrap existing row-major cells; the length must match `width * height`.
    pub fn from_cells(width: u16, height: u16, cells: Vec<ColorCell>) -> Option<Self> {
        if !dims_ok(width, height) || cells.len() != usize::from(width) * usize::from(height) {
            return None;
        }
        Some(Self {
            width,
            height,
            cells,
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }
    pub fn height(&self) -> u16 {
        self.height
    }
    pub fn cells(&self) -> &[ColorCell] {
        &self.cells
    }
    pub fn cells_mut(&mut self) -> &mut [ColorCell] {
        &mut self.cells
    }

    #[inline]
    pub fn index(&self, x: u16, y: u16) -> Option<usize> {
        (x < self.width && y < self.height)
            .then(|| usize::from(y) * usize::from(self.width) + usize::from(x))
    }

    pub fn get(&self, x: u16, y: u16) -> Option<&ColorCell> {
        self.index(x, y).map(|i| &self.cells[i])
    }

    pub fn get_mut(&mut self, x: u16, y: u16) -> Option<&mut ColorCell> {
        self.index(x, y).map(move |i| &mut self.cells[i])
    }
}

/// Row-major grid of histogram weights (one byte per cell).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightGrid {
    width: u16,
    height: u16,
    weights: Vec<u8>,
}

impl WeightGrid {
    pub fn new(width: u16, height: u16) -> Option<Self> {
        Self::filled(width, height, 0)
    }

    pub fn filled(width: u16, height: u16, w: u8) -> Option<Self> {
        if !dims_ok(width, height) {
            return None;
        }
        let n = usize::from(width) * usize::from(height);
        Some(Self {
            width,
            height,
            weights: vec![w; n],
        })
    }

    pub fn width(&self) -> u16 {
        self.width
    }
    pub fn height(&self) -> u16 {
        self.height
    }
    pub fn weights(&self) -> &[u8] {
        &self.weights
    }
    pub fn weights_mut(&mut self) -> &mut [u8] {
        &mut self.weights
    }

    pub fn get(&self, x: u16, y: u16) -> Option<u8> {
        (x < self.width && y < self.height)
            .then(|| self.weights[usize::from(y) * usize::from(self.width) + usize::from(x)])
    }
}

/// Sensor settings a statistics frame was captured with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppliedExposure {
    pub coarse_integration_time: u32,
    pub analog_gain_code: u32,
}

/// Everything the statistics block hands over for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameStatistics {
    pub frame_id: u64,
    pub image_width: u32,
    pub image_height: u32,
    pub color: ColorGrid,
    pub hist_weights: WeightGrid,
    pub applied: Option<AppliedExposure>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_dims_are_bounded() {
        assert!(ColorGrid::new(0, 10).is_none());
        assert!(ColorGrid::new(151, 10).is_none());
        assert!(ColorGrid::new(150, 150).is_some());
        assert!(WeightGrid::new(15, 0).is_none());
    }

    #[test]
    fn from_cells_checks_length() {
        assert!(ColorGrid::from_cells(2, 2, vec![ColorCell::default(); 3]).is_none());
        let g = ColorGrid::from_cells(2, 2, vec![ColorCell::splat(7); 4]).unwrap();
        assert_eq!(g.get(1, 1), Some(&ColorCell::splat(7)));
        assert!(g.get(2, 0).is_none());
    }

    #[test]
    fn channels_round_trip_in_order() {
        let c = ColorCell {
            avg_gr: 1,
            avg_r: 2,
            avg_b: 3,
            avg_gb: 4,
            sat: 5,
        };
        assert_eq!(c.channels(), [1, 2, 3, 4, 5]);
        assert_eq!(ColorCell::from_channels(c.channels()), c);
    }
}
