mod add_band;
mod export;
mod geometry;
mod mosaic;
mod time;
mod watermask;

pub use add_band::BandInput;
pub use geometry::{ResizeMethod, ResizeTarget};
pub use mosaic::{MaskCode, MosaicSummary, MASK};
pub use time::{parse_time, TIME};
pub use watermask::{MOD44W_VRT, WATERMASK};

use log::info;
use ndarray::Array2;
use std::{
    fmt::{Debug, Display},
    path::Path,
};

use crate::{
    components::{
        band::PixelType,
        band_id::{BandId, BAND_NAME},
        georef::{Georeference, Grid},
        metadata::Metadata,
        reader::VrtReader,
        store::VrtStore,
        vrt::Vrt,
    },
    config::RasterConfig,
    errors::{Result, RustervrtError},
};

/// Raster whose bands are read lazily through a tree of band definitions.
///
/// `raw` is the tree as opened (plus added bands), `working` the tree
/// after resizing or reprojection. Every tree and array a band refers to
/// is kept in `store`.
#[derive(Clone)]
pub struct Raster {
    name: String,
    raw: Vrt,
    working: Vrt,
    store: VrtStore,
    config: RasterConfig,
}

impl Debug for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let f = &mut f.debug_struct("Raster");
        let bands: Vec<&str> = self
            .working
            .bands()
            .iter()
            .filter_map(|band| band.name())
            .collect();
        f.field("name", &self.name)
            .field("size", &self.working.size())
            .field("bands", &bands)
            .finish()
    }
}

impl Raster {
    fn init(name: String, raw: Vrt, config: RasterConfig) -> Self {
        let raster = Self {
            name,
            working: raw.clone(),
            raw,
            store: VrtStore::new(),
            config,
        };
        info!("new {raster:?}");
        raster
    }

    /// Opens `path` with the first mapper of `config` that accepts it.
    pub fn open(path: impl AsRef<Path>, config: RasterConfig) -> Result<Self> {
        let path = path.as_ref();
        let (raw, mapper) = config.mappers.dispatch(
            path,
            config.engine.as_ref(),
            config.options.preferred_mapper.as_deref(),
        )?;
        let mut raster = Self::init(path.display().to_string(), raw, config);
        raster.raw.metadata_mut().insert("mapper", mapper);
        raster.working = raster.raw.clone();
        Ok(raster)
    }

    /// Raster without bands laid out on `grid`.
    pub fn from_grid(grid: Grid, config: RasterConfig) -> Self {
        Self::init(String::new(), Vrt::new(grid), config)
    }

    /// Raster on `grid` holding `array` as its single band.
    pub fn from_array<T: PixelType>(
        grid: Grid,
        array: &Array2<T>,
        parameters: Metadata,
        config: RasterConfig,
    ) -> Result<Self> {
        let mut raster = Self::from_grid(grid, config);
        raster.add_band(BandInput::array(array), parameters, None)?;
        Ok(raster)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn raw(&self) -> &Vrt {
        &self.raw
    }

    pub fn working(&self) -> &Vrt {
        &self.working
    }

    pub fn store(&self) -> &VrtStore {
        &self.store
    }

    pub fn config(&self) -> &RasterConfig {
        &self.config
    }

    pub fn reader(&self) -> VrtReader<'_> {
        VrtReader::new(&self.store, self.config.engine.as_ref())
    }

    /// Grid of the working tree; usable as a reprojection target.
    pub fn grid(&self) -> Grid {
        self.working.grid()
    }

    /// (width, height)
    pub fn size(&self) -> (usize, usize) {
        self.working.size()
    }

    /// Array shape (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        self.working.shape()
    }

    pub fn band_count(&self) -> usize {
        self.working.band_count()
    }

    /// Band number of `band` in the working tree.
    pub fn resolve(&self, band: impl Into<BandId>) -> Result<usize> {
        band.into().resolve(&self.working)
    }

    /// Pixels of `band` on the working grid.
    pub fn band_array(&self, band: impl Into<BandId>) -> Result<Array2<f64>> {
        let ordinal = self.resolve(band)?;
        self.reader().read_band(&self.working, ordinal)
    }

    /// Drops every resize and reprojection.
    pub fn reset(&mut self) {
        self.working = self.raw.clone();
        self.release_unused();
    }

    /// Releases intermediate trees that neither `raw` nor `working` reads.
    fn release_unused(&mut self) {
        self.store.retain_reachable(&[&self.raw, &self.working]);
    }

    /// Metadata of `band`, or the global metadata.
    pub fn metadata(&self, band: Option<BandId>) -> Result<&Metadata> {
        match band {
            Some(band) => Ok(self.working.band(band.resolve(&self.working)?)?.metadata()),
            None => Ok(self.working.metadata()),
        }
    }

    pub fn metadata_item(&self, key: &str, band: Option<BandId>) -> Result<Option<&str>> {
        Ok(self.metadata(band)?.get(key))
    }

    /// Sets one metadata entry in both trees.
    pub fn set_metadata(
        &mut self,
        key: impl Into<String>,
        value: impl Into<String>,
        band: Option<BandId>,
    ) -> Result<()> {
        let (key, value) = (key.into(), value.into());
        let Some(band) = band else {
            self.raw.metadata_mut().insert(key.clone(), value.clone());
            self.working.metadata_mut().insert(key, value);
            return Ok(());
        };
        let ordinal = band.resolve(&self.working)?;
        if key == BAND_NAME {
            if let Ok(taken) = BandId::from(value.as_str()).resolve(&self.working) {
                if taken != ordinal {
                    return Err(RustervrtError::InvalidOption(format!(
                        "band name {value} is used by band {taken}"
                    )));
                }
            }
        }
        self.raw
            .band_mut(ordinal)?
            .set_metadata_item(key.clone(), value.clone());
        self.working.band_mut(ordinal)?.set_metadata_item(key, value);
        Ok(())
    }

    /// `(band number, metadata)` of every band.
    pub fn bands(&self) -> Vec<(usize, &Metadata)> {
        self.working
            .bands()
            .iter()
            .enumerate()
            .map(|(idx, band)| (idx + 1, band.metadata()))
            .collect()
    }

    /// Working tree as a document.
    pub fn to_xml(&self) -> Result<String> {
        self.working.to_xml()
    }
}

const SEPARATOR: &str = "----------------------------------------";

impl Display for Raster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}", self.name)?;
        writeln!(f, "{SEPARATOR}")?;
        for (ordinal, band) in self.working.bands().iter().enumerate() {
            writeln!(f, "Band : {} {}", ordinal + 1, band.name().unwrap_or_default())?;
            for (key, value) in band.metadata().iter() {
                writeln!(f, "  {key}: {value}")?;
            }
        }
        writeln!(f, "{SEPARATOR}")?;
        let (width, height) = self.size();
        writeln!(f, "Size: {width} x {height}")?;
        match self.working.georef() {
            Georeference::Affine {
                transform,
                projection,
            } => {
                writeln!(f, "Projection: {projection}")?;
                write!(f, "GeoTransform: {:?}", transform.to_gdal())
            }
            Georeference::Gcps { gcps, projection } => {
                writeln!(f, "GCP projection: {projection}")?;
                write!(f, "GCPs: {}", gcps.len())
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::sync::Arc;

    use ndarray::Array2;

    use crate::{
        components::{band::DataType, georef::Grid, metadata::Metadata},
        config::RasterConfig,
        engines::{MemoryDataset, MemoryEngine},
    };

    pub const UTM: &str = "EPSG:32633";

    /// 4x4 grid of 10 m pixels.
    pub fn grid() -> Grid {
        Grid::affine((4, 4), [500000., 10., 0., 6600000., 0., -10.], UTM)
    }

    /// Memory engine serving `scene.tif`: one `A` band counting 0 to 15.
    pub fn config() -> (RasterConfig, Arc<MemoryEngine>) {
        let (config, engine) = RasterConfig::in_memory();
        engine.insert(
            "scene.tif",
            MemoryDataset::new(grid()).with_band(
                Array2::from_shape_fn((4, 4), |(row, col)| (row * 4 + col) as f64),
                DataType::UInt16,
                Metadata::from_iter([("BandName", "A")]),
            ),
        );
        (config, engine)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::components::band_id::BandId;
    use fixtures::config;
    use rstest::rstest;

    fn scene() -> Raster {
        Raster::open("scene.tif", config().0).unwrap()
    }

    #[test_log::test]
    fn open_goes_through_the_mappers() {
        let raster = scene();
        assert_eq!(raster.size(), (4, 4));
        assert_eq!(raster.shape(), (4, 4));
        assert_eq!(raster.metadata_item("mapper", None).unwrap(), Some("generic"));
        assert_eq!(raster.band_array("A").unwrap()[[3, 3]], 15.);
    }

    #[test]
    fn resolve_numbers_and_names() {
        let mut raster = scene();
        raster
            .add_band(
                BandInput::array(&Array2::<f32>::zeros((4, 4))),
                Metadata::from_iter([("BandName", "B")]),
                None,
            )
            .unwrap();
        for ordinal in 1..=raster.band_count() {
            assert_eq!(raster.resolve(ordinal).unwrap(), ordinal);
        }
        assert_eq!(raster.resolve("A").unwrap(), 1);
        assert_eq!(raster.resolve("B").unwrap(), 2);
    }

    #[rstest]
    #[case(BandId::Number(0))]
    #[case(BandId::Number(2))]
    #[case(BandId::Name("sigma0".into()))]
    fn unknown_bands_are_not_found(#[case] band: BandId) {
        assert!(matches!(
            scene().resolve(band),
            Err(RustervrtError::BandNotFound { count: 1, .. })
        ));
    }

    #[test]
    fn metadata_is_written_to_both_trees() {
        let mut raster = scene();
        raster.set_metadata("units", "W m-2", Some("A".into())).unwrap();
        raster.set_metadata("title", "test", None).unwrap();
        raster.reset();
        assert_eq!(
            raster.metadata_item("units", Some(BandId::Number(1))).unwrap(),
            Some("W m-2")
        );
        assert_eq!(raster.metadata_item("title", None).unwrap(), Some("test"));
        assert_eq!(raster.bands()[0].1.get("units"), Some("W m-2"));
    }

    #[test]
    fn band_names_stay_unique_when_set() {
        let mut raster = scene();
        raster
            .add_band(
                BandInput::array(&Array2::<u8>::zeros((4, 4))),
                Metadata::new(),
                None,
            )
            .unwrap();
        assert!(matches!(
            raster.set_metadata("BandName", "A", Some(BandId::Number(2))),
            Err(RustervrtError::InvalidOption(_))
        ));
        raster.set_metadata("BandName", "A", Some(BandId::Number(1))).unwrap();
    }

    #[test]
    fn display_lists_bands_and_geometry() {
        let text = scene().to_string();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines[0], "scene.tif");
        assert_eq!(lines[1], SEPARATOR);
        assert_eq!(lines[2], "Band : 1 A");
        assert!(lines.contains(&"Size: 4 x 4"));
        assert!(lines.contains(&"Projection: EPSG:32633"));
    }

    #[test]
    fn working_tree_is_serialized() {
        let raster = scene();
        let parsed = Vrt::from_xml(&raster.to_xml().unwrap()).unwrap();
        assert_eq!(&parsed, raster.working());
    }
}
