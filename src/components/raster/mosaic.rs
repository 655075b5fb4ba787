use std::path::{Path, PathBuf};

use itertools::Itertools;
use log::{error, info};
use ndarray::{Array2, Zip};
use rayon::prelude::*;

use crate::{
    components::{
        band::{DataType, Resampling},
        band_id::BAND_NAME,
        georef::Grid,
        metadata::Metadata,
        raster::{BandInput, Raster},
    },
    config::RasterConfig,
    errors::Result,
};

/// Name of the band holding per pixel quality codes.
pub const MASK: &str = "mask";

/// Pixel quality code, ordered by priority when layers are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MaskCode {
    #[default]
    NoData,
    Cloud,
    Land,
    Valid,
}

impl MaskCode {
    /// Unknown codes and NaN are `NoData`.
    pub fn from_value(value: f64) -> Self {
        match value {
            v if v == 1. => MaskCode::Cloud,
            v if v == 2. => MaskCode::Land,
            v if v == 128. => MaskCode::Valid,
            _ => MaskCode::NoData,
        }
    }

    pub fn value(&self) -> u8 {
        match self {
            MaskCode::NoData => 0,
            MaskCode::Cloud => 1,
            MaskCode::Land => 2,
            MaskCode::Valid => 128,
        }
    }
}

/// Outcome of [Raster::mosaic].
#[derive(Clone, Debug, PartialEq)]
pub struct MosaicSummary {
    /// Number of valid layers per pixel.
    pub count: Array2<u32>,
    pub used: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
}

/// Mask and requested bands of one file on the mosaic grid.
struct Layer {
    mask: Array2<f64>,
    bands: Vec<Array2<f64>>,
}

struct Accumulator {
    count: Array2<u32>,
    mask: Array2<MaskCode>,
    sums: Vec<Array2<f64>>,
    sums_sq: Vec<Array2<f64>>,
    used: Vec<PathBuf>,
    skipped: Vec<PathBuf>,
}

impl Accumulator {
    fn new(shape: (usize, usize), bands: usize) -> Self {
        Self {
            count: Array2::zeros(shape),
            mask: Array2::from_elem(shape, MaskCode::NoData),
            sums: vec![Array2::zeros(shape); bands],
            sums_sq: vec![Array2::zeros(shape); bands],
            used: Vec::new(),
            skipped: Vec::new(),
        }
    }

    fn add(mut self, file: &Path, layer: Result<Layer>) -> Self {
        let layer = match layer {
            Ok(layer) => layer,
            Err(err) => {
                error!("skipping {}: {err}", file.display());
                self.skipped.push(file.to_path_buf());
                return self;
            }
        };
        let valid = layer.mask.mapv(MaskCode::from_value);
        Zip::from(&mut self.count)
            .and(&mut self.mask)
            .and(&valid)
            .for_each(|count, mask, &code| {
                if code == MaskCode::Valid {
                    *count += 1;
                }
                *mask = (*mask).max(code);
            });
        for ((sum, sum_sq), band) in self.sums.iter_mut().zip(&mut self.sums_sq).zip(&layer.bands) {
            Zip::from(sum)
                .and(sum_sq)
                .and(band)
                .and(&valid)
                .for_each(|sum, sum_sq, &value, &code| {
                    if code == MaskCode::Valid {
                        *sum += value;
                        *sum_sq += value * value;
                    }
                });
        }
        self.used.push(file.to_path_buf());
        self
    }

    fn merge(mut self, other: Self) -> Self {
        self.count += &other.count;
        Zip::from(&mut self.mask)
            .and(&other.mask)
            .for_each(|mask, &code| *mask = (*mask).max(code));
        for (sum, other) in self.sums.iter_mut().zip(&other.sums) {
            *sum += other;
        }
        for (sum_sq, other) in self.sums_sq.iter_mut().zip(&other.sums_sq) {
            *sum_sq += other;
        }
        self.used.extend(other.used);
        self.skipped.extend(other.skipped);
        self
    }

    /// Mean and standard deviation of band `idx`, NaN where no layer was valid.
    fn statistics(&self, idx: usize) -> (Array2<f64>, Array2<f64>) {
        let mean = Zip::from(&self.sums[idx])
            .and(&self.count)
            .map_collect(|&sum, &count| match count {
                0 => f64::NAN,
                count => sum / count as f64,
            });
        let std = Zip::from(&self.sums[idx])
            .and(&self.sums_sq[idx])
            .and(&mean)
            .and(&self.count)
            .map_collect(|&sum, &sum_sq, &mean, &count| match count {
                0 => f64::NAN,
                count => {
                    let count = count as f64;
                    ((sum_sq - 2. * mean * sum + count * mean * mean) / count)
                        .max(0.)
                        .sqrt()
                }
            });
        (mean, std)
    }
}

fn layer(
    config: &RasterConfig,
    grid: &Grid,
    file: &Path,
    band_names: &[&str],
    resampling: Resampling,
) -> Result<Layer> {
    let mut raster = Raster::open(file, config.clone())?;
    if raster.resolve(MASK).is_err() {
        let shape = raster.raw().shape();
        raster.add_band(
            BandInput::Array {
                array: Array2::from_elem(shape, MaskCode::Valid.value() as f64),
                data_type: DataType::Byte,
            },
            Metadata::from_iter([(BAND_NAME, MASK)]),
            None,
        )?;
    }
    raster.reproject(Some(grid), Some(resampling))?;
    Ok(Layer {
        mask: raster.band_array(MASK)?,
        bands: band_names
            .iter()
            .map(|name| raster.band_array(*name))
            .try_collect()?,
    })
}

impl Raster {
    /// Averages `band_names` of `files` onto the working grid.
    ///
    /// Appends a `mask` band with the highest priority code seen per pixel,
    /// then a mean band `<name>` and a `<name>_std` band per requested name.
    /// Only pixels whose mask is valid contribute. Files that fail to open,
    /// warp or read are skipped.
    pub fn mosaic<P: AsRef<Path> + Sync>(
        &mut self,
        files: &[P],
        band_names: &[&str],
    ) -> Result<MosaicSummary> {
        let grid = self.grid();
        let shape = grid.shape();
        let config = &self.config;
        let resampling = config.options.mosaic_resampling;
        let accumulated = files
            .par_iter()
            .fold(
                || Accumulator::new(shape, band_names.len()),
                |acc, file| {
                    let file = file.as_ref();
                    acc.add(file, layer(config, &grid, file, band_names, resampling))
                },
            )
            .reduce(
                || Accumulator::new(shape, band_names.len()),
                Accumulator::merge,
            );
        info!(
            "mosaic of {} used {} files, skipped {}",
            self.name,
            accumulated.used.len(),
            accumulated.skipped.len()
        );

        self.add_band(
            BandInput::Array {
                array: accumulated.mask.mapv(|code| code.value() as f64),
                data_type: DataType::Byte,
            },
            Metadata::from_iter([(BAND_NAME, MASK)]),
            None,
        )?;
        for (idx, name) in band_names.iter().enumerate() {
            let (mean, std) = accumulated.statistics(idx);
            for (array, band_name) in [(mean, name.to_string()), (std, format!("{name}_std"))] {
                self.add_band(
                    BandInput::Array {
                        array,
                        data_type: DataType::Float32,
                    },
                    Metadata::from_iter([(BAND_NAME.to_string(), band_name)]),
                    None,
                )?;
            }
        }
        Ok(MosaicSummary {
            count: accumulated.count,
            used: accumulated.used,
            skipped: accumulated.skipped,
        })
    }
}
