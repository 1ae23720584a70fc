use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};
use isp3a_core::{MeteringWindow, MeteringWindowAggregator};
use isp3a_traits::{ColorCell, ColorGrid, WeightGrid};

// Deterministic pseudo-random grid
fn synth_grid(w: u16, h: u16, seed: u32) -> ColorGrid {
    let mut state = seed.max(1);
    let mut next_u8 = || {
        let mut x = state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        state = x;
        (x >> 24) as u8
    };
    let cells = (0..usize::from(w) * usize::from(h))
        .map(|_| ColorCell::from_channels([next_u8(), next_u8(), next_u8(), next_u8(), 0]))
        .collect();
    ColorGrid::from_cells(w, h, cells).unwrap()
}

fn six_windows() -> Vec<MeteringWindow> {
    vec![
        MeteringWindow::new(0, 0, 959, 539, 5),
        MeteringWindow::new(960, 0, 1919, 539, 5),
        MeteringWindow::new(0, 540, 1919, 1079, 10),
        MeteringWindow::new(640, 360, 1279, 719, 15),
        MeteringWindow::new(0, 0, 1919, 1079, 1),
        MeteringWindow::new(800, 400, 1119, 679, 8),
    ]
}

fn bench_aggregation(c: &mut Criterion) {
    let windows = six_windows();
    let agg = MeteringWindowAggregator::new(&windows, 1920, 1080);

    for &(w, h) in &[(15u16, 17u16), (64, 48), (150, 150)] {
        let grid = synth_grid(w, h, 0xC0FF_EE01);
        c.bench_function(&format!("aggregate_color_{w}x{h}"), |b| {
            b.iter(|| black_box(agg.aggregate_color(black_box(&grid)).unwrap()));
        });
        c.bench_function(&format!("apply_color_{w}x{h}"), |b| {
            b.iter_batched(
                || grid.clone(),
                |mut g| black_box(agg.apply_color(&mut g).unwrap()),
                BatchSize::SmallInput,
            );
        });
    }

    c.bench_function("apply_hist_weights_15x15", |b| {
        b.iter_batched(
            || WeightGrid::filled(15, 15, 1).unwrap(),
            |mut g| black_box(agg.apply_hist_weights(&mut g)),
            BatchSize::SmallInput,
        );
    });
}

criterion_group!(benches, bench_aggregation);
criterion_main!(benches);
