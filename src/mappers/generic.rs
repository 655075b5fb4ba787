use std::path::Path;

use crate::{
    components::{band::BandSource, vrt::Vrt},
    engines::RasterEngine,
    errors::Result,
    mappers::Mapper,
};

/// One band per native band, native metadata and georeference.
#[derive(Clone, Copy, Debug, Default)]
pub struct GenericMapper;

impl Mapper for GenericMapper {
    fn name(&self) -> &str {
        "generic"
    }

    fn try_open(&self, path: &Path, engine: &dyn RasterEngine) -> Result<Vrt> {
        let info = engine.open(path)?;
        let mut vrt = Vrt::new(info.grid);
        *vrt.metadata_mut() = info.metadata;
        vrt.set_geolocation(info.geolocation);
        for (idx, band) in info.bands.into_iter().enumerate() {
            vrt.create_band(
                BandSource::File {
                    path: path.to_path_buf(),
                    band: idx + 1,
                },
                band.data_type,
                band.metadata,
            );
        }
        Ok(vrt)
    }
}
