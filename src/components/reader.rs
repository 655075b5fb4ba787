use log::debug;
use ndarray::Array2;

use crate::{
    components::{
        band::BandSource,
        expression::{Expression, BAND_DATA},
        resample::resample,
        store::VrtStore,
        vrt::Vrt,
    },
    engines::RasterEngine,
    errors::Result,
};

/// Materializes bands of trees whose references live in `store`.
#[derive(Debug, Clone, Copy)]
pub struct VrtReader<'a> {
    store: &'a VrtStore,
    engine: &'a dyn RasterEngine,
}

impl<'a> VrtReader<'a> {
    pub fn new(store: &'a VrtStore, engine: &'a dyn RasterEngine) -> Self {
        Self { store, engine }
    }

    /// Pixel values of band `ordinal` of `vrt`, scale/offset and expression
    /// applied.
    pub fn read_band(&self, vrt: &Vrt, ordinal: usize) -> Result<Array2<f64>> {
        let band = vrt.band(ordinal)?;
        let mut array = self.read_source(vrt, ordinal)?;
        if let Some(scale_offset) = band.scale_offset.filter(|so| !so.is_identity()) {
            array.mapv_inplace(|value| value * scale_offset.scale + scale_offset.offset);
        }
        match &band.expression {
            Some(expression) => evaluate(expression, &array),
            None => Ok(array),
        }
    }

    /// Untransformed pixel values of band `ordinal`, fitted to the grid of
    /// `vrt`.
    pub fn read_source(&self, vrt: &Vrt, ordinal: usize) -> Result<Array2<f64>> {
        let descriptor = vrt.band(ordinal)?;
        let array = match &descriptor.source {
            BandSource::File { path, band } => self.engine.read_band(path, *band)?,
            BandSource::Tree { handle, band } => {
                self.read_source(self.store.tree(*handle)?, *band)?
            }
            BandSource::Array(handle) => self.store.array(*handle)?.clone(),
            BandSource::Warped { handle, band } => {
                let source = self.store.tree(*handle)?;
                let array = self.read_source(source, *band)?;
                self.engine
                    .warp(array.view(), &source.grid(), &vrt.grid(), descriptor.resampling)?
            }
        };
        if array.dim() == vrt.shape() {
            return Ok(array);
        }
        debug!(
            "resampling band {ordinal} from {:?} to {:?}",
            array.dim(),
            vrt.shape()
        );
        Ok(resample(array.view(), vrt.shape(), descriptor.resampling))
    }
}

fn evaluate(expression: &Expression, array: &Array2<f64>) -> Result<Array2<f64>> {
    expression.evaluate(&[(BAND_DATA, array)])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        components::{
            band::{DataType, Resampling},
            georef::Grid,
            metadata::Metadata,
        },
        engines::{MemoryDataset, MemoryEngine},
    };
    use ndarray::array;

    fn engine() -> MemoryEngine {
        let engine = MemoryEngine::new();
        engine.insert(
            "dn.tif",
            MemoryDataset::new(Grid::default_for_size((2, 2))).with_band(
                array![[10., 20.], [30., 40.]],
                DataType::UInt16,
                Metadata::new(),
            ),
        );
        engine
    }

    fn file_tree(metadata: Metadata) -> Vrt {
        let mut vrt = Vrt::new(Grid::default_for_size((2, 2)));
        vrt.create_band(
            BandSource::File {
                path: "dn.tif".into(),
                band: 1,
            },
            DataType::UInt16,
            metadata,
        );
        vrt
    }

    #[test_log::test]
    fn scale_offset_then_expression() {
        let engine = engine();
        let store = VrtStore::new();
        let vrt = file_tree(Metadata::from_iter([
            ("scale", "0.5"),
            ("offset", "1"),
            ("expression", "bandData * 2"),
        ]));
        let read = VrtReader::new(&store, &engine).read_band(&vrt, 1).unwrap();
        assert_eq!(read, array![[12., 22.], [32., 42.]]);
    }

    #[test_log::test]
    fn references_return_untransformed_values() {
        let engine = engine();
        let mut store = VrtStore::new();
        let inner = store.insert_tree(file_tree(Metadata::from_iter([("scale", "10")])));
        let mut outer = Vrt::new(Grid::default_for_size((2, 2)));
        outer.create_band(
            BandSource::Tree {
                handle: inner,
                band: 1,
            },
            DataType::UInt16,
            Metadata::new(),
        );
        let read = VrtReader::new(&store, &engine).read_band(&outer, 1).unwrap();
        assert_eq!(read, array![[10., 20.], [30., 40.]]);
    }

    #[test_log::test]
    fn sources_of_another_size_are_resampled() {
        let engine = engine();
        let mut store = VrtStore::new();
        let array = store.insert_array(array![[1., 3.], [5., 7.]]);
        let mut vrt = Vrt::new(Grid::default_for_size((1, 1)));
        let ordinal = vrt.create_band(BandSource::Array(array), DataType::Float64, Metadata::new());
        vrt.band_mut(ordinal).unwrap().resampling = Resampling::Average;
        let read = VrtReader::new(&store, &engine).read_band(&vrt, 1).unwrap();
        assert_eq!(read, array![[4.]]);
    }

    #[test_log::test]
    fn warped_sources_go_through_the_engine() {
        let engine = MemoryEngine::new();
        let source_grid = Grid::affine((2, 2), [0., 1., 0., 2., 0., -1.], "EPSG:32633");
        engine.insert(
            "scene.tif",
            MemoryDataset::new(source_grid.clone()).with_band(
                array![[1., 2.], [3., 4.]],
                DataType::Byte,
                Metadata::new(),
            ),
        );
        let mut store = VrtStore::new();
        let mut raw = Vrt::new(source_grid);
        raw.create_band(
            BandSource::File {
                path: "scene.tif".into(),
                band: 1,
            },
            DataType::Byte,
            Metadata::new(),
        );
        let handle = store.insert_tree(raw.clone());
        let target = Grid::affine((1, 2), [1., 1., 0., 2., 0., -1.], "EPSG:32633");
        let warped = Vrt::warped(handle, &raw, &target, Resampling::Nearest);
        let read = VrtReader::new(&store, &engine).read_band(&warped, 1).unwrap();
        assert_eq!(read, array![[2.], [4.]]);
    }
}
