use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use geo::{AffineTransform, Coord};
use log::debug;
use ndarray::{Array2, ArrayView2};

use crate::{
    components::{
        band::{DataType, Resampling},
        georef::{Geolocation, Georeference, Grid},
        metadata::Metadata,
    },
    engines::{BandInfo, OutputDataset, RasterEngine, RasterInfo},
    errors::{Result, RustervrtError},
};

pub const MEMORY_DRIVER: &str = "MEM";

/// Dataset served by a [MemoryEngine].
#[derive(Clone, Debug)]
pub struct MemoryDataset {
    info: RasterInfo,
    arrays: Vec<Array2<f64>>,
}

impl MemoryDataset {
    pub fn new(grid: Grid) -> Self {
        Self {
            info: RasterInfo {
                path: PathBuf::new(),
                driver: MEMORY_DRIVER.to_string(),
                grid,
                metadata: Metadata::new(),
                bands: Vec::new(),
                geolocation: None,
            },
            arrays: Vec::new(),
        }
    }

    /// Appends a band. `array` must have the dataset's `(rows, cols)` shape.
    pub fn with_band(mut self, array: Array2<f64>, data_type: DataType, metadata: Metadata) -> Self {
        self.info.bands.push(BandInfo {
            data_type,
            metadata,
        });
        self.arrays.push(array);
        self
    }

    pub fn with_metadata(mut self, metadata: Metadata) -> Self {
        self.info.metadata = metadata;
        self
    }

    pub fn with_geolocation(mut self, geolocation: Geolocation) -> Self {
        self.info.geolocation = Some(geolocation);
        self
    }

    pub fn with_driver(mut self, driver: &str) -> Self {
        self.info.driver = driver.to_string();
        self
    }

    fn from_output(driver: &str, dataset: &OutputDataset) -> Self {
        dataset
            .bands
            .iter()
            .fold(
                Self::new(dataset.grid.clone())
                    .with_metadata(dataset.metadata.clone())
                    .with_driver(driver),
                |acc, band| acc.with_band(band.array.clone(), band.data_type, band.metadata.clone()),
            )
    }
}

/// Engine over datasets held in memory, keyed by path.
///
/// Warping is limited to affine grids sharing one projection.
/// `Average` samples like `Nearest` and `Cubic` like `Bilinear`.
#[derive(Debug, Default)]
pub struct MemoryEngine {
    datasets: RwLock<HashMap<PathBuf, MemoryDataset>>,
    written: RwLock<HashMap<PathBuf, OutputDataset>>,
}

impl MemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, path: impl Into<PathBuf>, mut dataset: MemoryDataset) {
        let path = path.into();
        dataset.info.path = path.clone();
        self.datasets
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path, dataset);
    }

    /// Dataset last written to `path` through [RasterEngine::create_copy].
    pub fn written(&self, path: impl AsRef<Path>) -> Option<OutputDataset> {
        self.written
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path.as_ref())
            .cloned()
    }

    fn with_dataset<T>(&self, path: &Path, f: impl FnOnce(&MemoryDataset) -> Result<T>) -> Result<T> {
        let datasets = self.datasets.read().unwrap_or_else(PoisonError::into_inner);
        let dataset = datasets.get(path).ok_or_else(|| {
            RustervrtError::GdalError(format!("{} does not exist in memory", path.display()))
        })?;
        f(dataset)
    }
}

impl RasterEngine for MemoryEngine {
    fn open(&self, path: &Path) -> Result<RasterInfo> {
        self.with_dataset(path, |dataset| Ok(dataset.info.clone()))
    }

    fn read_band(&self, path: &Path, band: usize) -> Result<Array2<f64>> {
        self.with_dataset(path, |dataset| {
            band.checked_sub(1)
                .and_then(|idx| dataset.arrays.get(idx))
                .cloned()
                .ok_or_else(|| {
                    RustervrtError::GdalError(format!(
                        "{} has no band {band}",
                        path.display()
                    ))
                })
        })
    }

    fn warp(
        &self,
        array: ArrayView2<f64>,
        from: &Grid,
        to: &Grid,
        resampling: Resampling,
    ) -> Result<Array2<f64>> {
        if from == to {
            return Ok(array.to_owned());
        }
        let (source, target) = match (&from.georef, &to.georef) {
            (
                Georeference::Affine {
                    transform: source,
                    projection: source_projection,
                },
                Georeference::Affine {
                    transform: target,
                    projection: target_projection,
                },
            ) if source_projection == target_projection => (*source, *target),
            (Georeference::Affine { .. }, Georeference::Affine { .. }) => {
                return Err(RustervrtError::ProjectionError(
                    "memory engine cannot warp between projections".to_string(),
                ))
            }
            _ => {
                return Err(RustervrtError::ProjectionError(
                    "memory engine only warps affine grids".to_string(),
                ))
            }
        };
        let to_source_pixel = source.geo_to_pixel().ok_or_else(|| {
            RustervrtError::ProjectionError("source geotransform is not invertible".to_string())
        })?;
        debug!(
            "warping {:?} onto {:?} with {}",
            from.size,
            to.size,
            resampling.name()
        );
        let sampler = Sampler {
            array,
            to_source_pixel,
        };
        Ok(Array2::from_shape_fn(to.shape(), |(row, col)| {
            let geo = target.pixel_to_geo(col as f64 + 0.5, row as f64 + 0.5);
            match resampling {
                Resampling::Nearest | Resampling::Average => sampler.nearest(geo),
                Resampling::Bilinear | Resampling::Cubic => sampler.bilinear(geo),
            }
        }))
    }

    fn create_copy(&self, driver: &str, path: &Path, dataset: &OutputDataset) -> Result<()> {
        debug!("writing {} bands to {} as {driver}", dataset.bands.len(), path.display());
        self.written
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_path_buf(), dataset.clone());
        self.insert(path, MemoryDataset::from_output(driver, dataset));
        Ok(())
    }
}

struct Sampler<'a> {
    array: ArrayView2<'a, f64>,
    to_source_pixel: AffineTransform,
}

impl Sampler<'_> {
    fn source_pixel(&self, geo: Coord) -> Coord {
        self.to_source_pixel.apply(geo)
    }

    fn nearest(&self, geo: Coord) -> f64 {
        let Coord { x, y } = self.source_pixel(geo);
        let (rows, cols) = self.array.dim();
        if x < 0. || y < 0. || x >= cols as f64 || y >= rows as f64 {
            return f64::NAN;
        }
        self.array[[y as usize, x as usize]]
    }

    fn bilinear(&self, geo: Coord) -> f64 {
        let Coord { x, y } = self.source_pixel(geo);
        let (rows, cols) = self.array.dim();
        if x < 0. || y < 0. || x >= cols as f64 || y >= rows as f64 {
            return f64::NAN;
        }
        // pixel centre units, clamped at the edges
        let x = (x - 0.5).clamp(0., (cols - 1) as f64);
        let y = (y - 0.5).clamp(0., (rows - 1) as f64);
        let (col0, row0) = (x.floor() as usize, y.floor() as usize);
        let (col1, row1) = ((col0 + 1).min(cols - 1), (row0 + 1).min(rows - 1));
        let (fx, fy) = (x - col0 as f64, y - row0 as f64);
        let top = self.array[[row0, col0]] * (1. - fx) + self.array[[row0, col1]] * fx;
        let bottom = self.array[[row1, col0]] * (1. - fx) + self.array[[row1, col1]] * fx;
        top * (1. - fy) + bottom * fy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rstest::rstest;

    const UTM: &str = "EPSG:32633";

    #[test]
    fn open_reports_what_was_inserted() {
        let engine = MemoryEngine::new();
        engine.insert(
            "a.tif",
            MemoryDataset::new(Grid::affine((2, 1), [0., 1., 0., 0., 0., -1.], UTM))
                .with_band(array![[1., 2.]], DataType::Byte, Metadata::new())
                .with_metadata(Metadata::from_iter([("sensor", "test")])),
        );
        let info = engine.open(Path::new("a.tif")).unwrap();
        assert_eq!(info.size(), (2, 1));
        assert_eq!(info.band_count(), 1);
        assert_eq!(info.path, PathBuf::from("a.tif"));
        assert_eq!(engine.read_band(Path::new("a.tif"), 1).unwrap(), array![[1., 2.]]);
        assert!(engine.read_band(Path::new("a.tif"), 2).is_err());
        assert!(matches!(
            engine.open(Path::new("b.tif")),
            Err(RustervrtError::GdalError(_))
        ));
    }

    #[rstest]
    #[case(Resampling::Nearest, array![[1., 2.], [5., 6.]])]
    #[case(Resampling::Average, array![[1., 2.], [5., 6.]])]
    #[case(Resampling::Bilinear, array![[1., 2.], [5., 6.]])]
    fn warp_onto_a_finer_window(#[case] resampling: Resampling, #[case] expected: Array2<f64>) {
        let array = Array2::from_shape_fn((4, 4), |(row, col)| (row * 4 + col + 1) as f64);
        let from = Grid::affine((4, 4), [100., 10., 0., 200., 0., -10.], UTM);
        // top left 2x2 pixels of the source
        let to = Grid::affine((2, 2), [100., 10., 0., 200., 0., -10.], UTM);
        let warped = MemoryEngine::new()
            .warp(array.view(), &from, &to, resampling)
            .unwrap();
        assert_eq!(warped, expected);
    }

    #[test]
    fn warp_outside_the_source_is_nan() {
        let from = Grid::affine((2, 2), [0., 1., 0., 2., 0., -1.], UTM);
        let to = Grid::affine((3, 1), [1., 1., 0., 2., 0., -1.], UTM);
        let warped = MemoryEngine::new()
            .warp(array![[1., 2.], [3., 4.]].view(), &from, &to, Resampling::Nearest)
            .unwrap();
        assert_eq!(warped[[0, 0]], 2.);
        assert!(warped[[0, 1]].is_nan());
        assert!(warped[[0, 2]].is_nan());
    }

    #[test]
    fn warp_between_projections_is_refused() {
        let from = Grid::affine((2, 2), [0., 1., 0., 2., 0., -1.], UTM);
        let to = Grid::affine((2, 2), [0., 1., 0., 2., 0., -1.], "EPSG:4326");
        assert!(matches!(
            MemoryEngine::new().warp(
                Array2::zeros((2, 2)).view(),
                &from,
                &to,
                Resampling::Bilinear
            ),
            Err(RustervrtError::ProjectionError(_))
        ));
    }

    #[test]
    fn written_datasets_can_be_opened() {
        let engine = MemoryEngine::new();
        let output = OutputDataset {
            grid: Grid::default_for_size((1, 1)),
            metadata: Metadata::from_iter([("title", "out")]),
            bands: vec![crate::engines::OutputBand {
                data_type: DataType::Int16,
                metadata: Metadata::new(),
                array: array![[5.]],
            }],
        };
        engine
            .create_copy("netCDF", Path::new("out.nc"), &output)
            .unwrap();
        assert_eq!(engine.written("out.nc"), Some(output));
        let info = engine.open(Path::new("out.nc")).unwrap();
        assert_eq!(info.driver, "netCDF");
        assert_eq!(info.bands[0].data_type, DataType::Int16);
    }
}
