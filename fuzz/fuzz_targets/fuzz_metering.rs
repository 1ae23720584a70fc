#![no_main]
use isp3a_core::{MeteringWindow, MeteringWindowAggregator};
use isp3a_traits::{ColorCell, ColorGrid, WeightGrid};
use libfuzzer_sys::arbitrary::{self, Arbitrary};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    image_width: u32,
    image_height: u32,
    grid_width: u8,
    grid_height: u8,
    fill: u8,
    windows: Vec<(u32, u32, u32, u32, u8)>,
}

fuzz_target!(|input: Input| {
    let windows: Vec<MeteringWindow> = input
        .windows
        .iter()
        .map(|&(x0, y0, x1, y1, w)| MeteringWindow::new(x0, y0, x1, y1, w))
        .collect();
    let agg = MeteringWindowAggregator::new(&windows, input.image_width, input.image_height);

    let gw = u16::from(input.grid_width);
    let gh = u16::from(input.grid_height);
    if let Some(mut grid) = ColorGrid::filled(gw, gh, ColorCell::splat(input.fill)) {
        let _ = agg.apply_color(&mut grid);
        assert_eq!((grid.width(), grid.height()), (gw, gh));
    }
    if let Some(mut hist) = WeightGrid::filled(gw.min(16), gh.min(16), 1) {
        let _ = agg.apply_hist_weights(&mut hist);
    }
});
