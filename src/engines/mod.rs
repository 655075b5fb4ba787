use std::{fmt::Debug, path::Path, path::PathBuf};

use ndarray::{Array2, ArrayView2};

use crate::{
    components::{
        band::{DataType, Resampling},
        georef::{Geolocation, Georeference, Grid},
        metadata::Metadata,
    },
    errors::Result,
};

#[cfg(feature = "gdal")]
pub mod gdal_engine;
pub mod memory;

#[cfg(feature = "gdal")]
pub use gdal_engine::GdalEngine;
pub use memory::{MemoryDataset, MemoryEngine};

/// Description of one native band of an opened dataset.
#[derive(Clone, Debug, PartialEq)]
pub struct BandInfo {
    pub data_type: DataType,
    pub metadata: Metadata,
}

/// Everything known about a dataset without reading its pixels.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterInfo {
    pub path: PathBuf,
    /// Short name of the driver that opened the dataset.
    pub driver: String,
    pub grid: Grid,
    pub metadata: Metadata,
    pub bands: Vec<BandInfo>,
    pub geolocation: Option<Geolocation>,
}

impl RasterInfo {
    pub fn size(&self) -> (usize, usize) {
        self.grid.size
    }

    pub fn georef(&self) -> &Georeference {
        &self.grid.georef
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct OutputBand {
    pub data_type: DataType,
    pub metadata: Metadata,
    pub array: Array2<f64>,
}

/// Fully materialized dataset handed to [RasterEngine::create_copy].
#[derive(Clone, Debug, PartialEq)]
pub struct OutputDataset {
    pub grid: Grid,
    pub metadata: Metadata,
    pub bands: Vec<OutputBand>,
}

/// Raster I/O and warping backend.
///
/// Band numbers are 1-based. Arrays are `(rows, cols)`.
pub trait RasterEngine: Debug + Send + Sync {
    fn open(&self, path: &Path) -> Result<RasterInfo>;

    fn read_band(&self, path: &Path, band: usize) -> Result<Array2<f64>>;

    /// Resamples `array`, laid out on `from`, onto `to`. Pixels of `to`
    /// outside of `from` are NaN.
    fn warp(
        &self,
        array: ArrayView2<f64>,
        from: &Grid,
        to: &Grid,
        resampling: Resampling,
    ) -> Result<Array2<f64>>;

    /// Writes `dataset` to `path` with the driver named `driver`.
    fn create_copy(&self, driver: &str, path: &Path, dataset: &OutputDataset) -> Result<()>;
}
