use std::path::PathBuf;

use log::{debug, info};
use ndarray::Array2;

use crate::{
    components::{
        band::{BandSource, DataType, PixelType, Resampling, VirtualBand},
        band_id::BandId,
        metadata::Metadata,
        raster::Raster,
        store::VrtHandle,
        vrt::Vrt,
    },
    errors::Result,
};

/// Where the pixels of an added band come from.
#[derive(Debug)]
pub enum BandInput<'a> {
    /// Band of a file, opened with the mappers of the receiving raster.
    File { path: PathBuf, band: BandId },
    /// Band of another raster.
    Raster { raster: &'a Raster, band: BandId },
    Array {
        array: Array2<f64>,
        data_type: DataType,
    },
}

impl BandInput<'_> {
    /// Array input typed after `T`.
    pub fn array<T: PixelType>(array: &Array2<T>) -> Self {
        BandInput::Array {
            array: array.mapv(|value| value.as_()),
            data_type: T::DATA_TYPE,
        }
    }
}

impl Raster {
    /// Appends a band and returns its number.
    ///
    /// `parameters` overlay the metadata inherited from the input. Inputs
    /// on another grid are fitted with `resampling`, or the configured
    /// default. Resizing and reprojection are dropped.
    pub fn add_band(
        &mut self,
        input: BandInput,
        parameters: Metadata,
        resampling: Option<Resampling>,
    ) -> Result<usize> {
        let resampling = resampling.unwrap_or(self.config.options.add_band_resampling);
        let (handle, band, template) = match input {
            BandInput::File { path, band } => {
                let mut other = Raster::open(&path, self.config.clone())?;
                let grid = self.raw.grid();
                if other.grid() != grid {
                    other.reproject(Some(&grid), Some(resampling))?;
                }
                let ordinal = other.resolve(band)?;
                self.inherit(&other, ordinal)?
            }
            BandInput::Raster { raster, band } => {
                let ordinal = raster.resolve(band)?;
                self.inherit(raster, ordinal)?
            }
            BandInput::Array { array, data_type } => self.wrap_array(array, data_type, resampling),
        };

        let mut metadata = template.metadata().clone();
        metadata.merge(&parameters);
        let mut added = VirtualBand::new(BandSource::Tree { handle, band }, template.data_type, metadata);
        added.resampling = resampling;
        let ordinal = self.raw.push_band(added);
        self.reset();
        info!(
            "added band {ordinal} ({}) reading {handle}",
            self.raw.band(ordinal)?.name().unwrap_or_default()
        );
        Ok(ordinal)
    }

    /// Imports the working tree of `other` and returns where band
    /// `ordinal` of it now lives, with its definition.
    fn inherit(&mut self, other: &Raster, ordinal: usize) -> Result<(VrtHandle, usize, VirtualBand)> {
        let adopted = self.store.adopt(&other.store, &other.working)?;
        let template = adopted.band(ordinal)?.clone();
        let handle = self.store.insert_tree(adopted);
        Ok((handle, ordinal, template))
    }

    fn wrap_array(
        &mut self,
        array: Array2<f64>,
        data_type: DataType,
        resampling: Resampling,
    ) -> (VrtHandle, usize, VirtualBand) {
        let shape = array.dim();
        let array = self.store.insert_array(array);
        let wrapped = Vrt::from_array(array, shape, data_type);
        let template = VirtualBand::new(BandSource::Array(array), data_type, Metadata::new());
        if shape == self.raw.shape() {
            return (self.store.insert_tree(wrapped), 1, template);
        }
        debug!("array of shape {shape:?} is resampled to {:?}", self.raw.shape());
        let handle = self.store.insert_tree(wrapped.clone());
        let resized = Vrt::resampled(handle, &wrapped, self.raw.size(), resampling);
        (self.store.insert_tree(resized), 1, template)
    }
}
