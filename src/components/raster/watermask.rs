use std::path::Path;

use log::{debug, warn};
use ndarray::Array2;

use crate::{
    components::{band::Resampling, band_id::BAND_NAME, georef::Grid, metadata::Metadata, raster::Raster},
    errors::Result,
};

/// Mosaic of MOD44W tiles inside the configured directory.
pub const MOD44W_VRT: &str = "MOD44W.vrt";

/// Band name given to the empty mask used when no MOD44W data is found.
pub const WATERMASK: &str = "watermask";

impl Raster {
    /// 250 m MOD44W water mask (water 1, land 0) laid out on `target`, or
    /// on the working grid of `self`.
    ///
    /// Tiles are read from `<dir>/MOD44W.vrt` where `dir` is `mod44w_dir`
    /// or `Options::mod44w_dir`. Without readable tiles the mask is all
    /// zeros.
    pub fn watermask(&self, mod44w_dir: Option<&Path>, target: Option<&Grid>) -> Result<Raster> {
        let grid = target.cloned().unwrap_or_else(|| self.grid());
        let dir = mod44w_dir.or(self.config.options.mod44w_dir.as_deref());
        debug!("MOD44W directory: {dir:?}");
        let opened = dir.map(|dir| Raster::open(dir.join(MOD44W_VRT), self.config.clone()));
        match opened {
            Some(Ok(mut watermask)) => {
                watermask.reproject(Some(&grid), Some(Resampling::Nearest))?;
                Ok(watermask)
            }
            Some(Err(err)) => {
                warn!("no MOD44W data in {dir:?}: {err}");
                self.empty_watermask(grid)
            }
            None => {
                warn!("MOD44W directory is not configured");
                self.empty_watermask(grid)
            }
        }
    }

    fn empty_watermask(&self, grid: Grid) -> Result<Raster> {
        let shape = grid.shape();
        Raster::from_array(
            grid,
            &Array2::<u8>::zeros(shape),
            Metadata::from_iter([(BAND_NAME, WATERMASK)]),
            self.config.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::{
            band::DataType,
            raster::fixtures::{config, grid, UTM},
        },
        config::Options,
        engines::MemoryDataset,
    };
    use ndarray::array;

    /// 2x2 tiles of 20 m pixels over the scene, water on the diagonal.
    fn tiles() -> MemoryDataset {
        MemoryDataset::new(Grid::affine(
            (2, 2),
            [500000., 20., 0., 6600000., 0., -20.],
            UTM,
        ))
        .with_band(
            array![[1., 0.], [0., 1.]],
            DataType::Byte,
            Metadata::from_iter([("BandName", "water")]),
        )
    }

    #[test_log::test]
    fn tiles_are_laid_out_on_the_raster() {
        let (config, engine) = config();
        engine.insert("mod44w/MOD44W.vrt", tiles());
        let options = Options {
            mod44w_dir: Some("mod44w".into()),
            ..Default::default()
        };
        let raster = Raster::open("scene.tif", config.with_options(options)).unwrap();
        let watermask = raster.watermask(None, None).unwrap();
        assert_eq!(watermask.grid(), grid());
        assert_eq!(
            watermask.band_array("water").unwrap(),
            array![
                [1., 1., 0., 0.],
                [1., 1., 0., 0.],
                [0., 0., 1., 1.],
                [0., 0., 1., 1.]
            ]
        );
    }

    #[test]
    fn explicit_directory_and_target() {
        let (config, engine) = config();
        engine.insert("elsewhere/MOD44W.vrt", tiles());
        let raster = Raster::open("scene.tif", config).unwrap();
        let target = Grid::affine((1, 1), [500020., 20., 0., 6599980., 0., -20.], UTM);
        let watermask = raster
            .watermask(Some(Path::new("elsewhere")), Some(&target))
            .unwrap();
        assert_eq!(watermask.size(), (1, 1));
        assert_eq!(watermask.band_array(1usize).unwrap(), array![[1.]]);
    }

    #[test]
    fn missing_tiles_give_an_empty_mask() {
        let (config, _) = config();
        let raster = Raster::open("scene.tif", config).unwrap();
        for dir in [None, Some(Path::new("nowhere"))] {
            let watermask = raster.watermask(dir, None).unwrap();
            assert_eq!(watermask.grid(), grid());
            assert_eq!(
                watermask.band_array(WATERMASK).unwrap(),
                Array2::<f64>::zeros((4, 4))
            );
        }
    }
}
