use criterion::{criterion_group, criterion_main, Criterion};
use ndarray::Array2;
use rustervrt::{
    engines::MemoryDataset, BandInput, DataType, Grid, Metadata, Raster, RasterConfig,
    ResizeMethod, ResizeTarget,
};

const SIZE: (usize, usize) = (1024, 1024);
const N_FILES: usize = 8;

fn grid() -> Grid {
    Grid::affine(SIZE, [500000., 10., 0., 6600000., 0., -10.], "EPSG:32633")
}

fn config() -> RasterConfig {
    let (config, engine) = RasterConfig::in_memory();
    for idx in 0..N_FILES {
        engine.insert(
            format!("scene_{idx}.tif"),
            MemoryDataset::new(grid()).with_band(
                Array2::from_shape_fn((SIZE.1, SIZE.0), |(row, col)| ((row + col + idx) % 255) as f64),
                DataType::UInt16,
                Metadata::from_iter([("BandName", "B4"), ("scale", "0.0001")]),
            ),
        );
    }
    config
}

fn bench_read_band(c: &mut Criterion) {
    let mut raster = Raster::open("scene_0.tif", config()).unwrap();
    raster
        .add_band(
            BandInput::array(&Array2::<f32>::ones((SIZE.1 / 2, SIZE.0 / 2))),
            Metadata::from_iter([("BandName", "coarse")]),
            None,
        )
        .unwrap();
    c.bench_function("read_band", |b| b.iter(|| raster.band_array("B4")));
    c.bench_function("read_resampled_band", |b| b.iter(|| raster.band_array("coarse")));
    raster
        .resize(ResizeTarget::Factor(0.25), ResizeMethod::Average)
        .unwrap();
    c.bench_function("read_averaged_band", |b| b.iter(|| raster.band_array("B4")));
}

fn bench_mosaic(c: &mut Criterion) {
    let config = config();
    let files: Vec<String> = (0..N_FILES).map(|idx| format!("scene_{idx}.tif")).collect();
    c.bench_function("mosaic", |b| {
        b.iter(|| {
            let mut raster = Raster::from_grid(grid(), config.clone());
            raster.mosaic(&files, &["B4"])
        })
    });
}

criterion_group!(benches, bench_read_band, bench_mosaic);
criterion_main!(benches);
