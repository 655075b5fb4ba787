use std::{fmt::Debug, path::Path, sync::Arc};

use log::{debug, info, warn};

use crate::{
    components::vrt::Vrt,
    engines::RasterEngine,
    errors::{Result, RustervrtError},
};

mod generic;
mod landsat;

pub use generic::GenericMapper;
pub use landsat::{LandsatMapper, Resolution};

/// Builds the raw tree of a file format.
pub trait Mapper: Debug + Send + Sync {
    fn name(&self) -> &str;

    /// Tree describing `path`, or [RustervrtError::NotThisFormat] when the
    /// file is not handled by this mapper.
    fn try_open(&self, path: &Path, engine: &dyn RasterEngine) -> Result<Vrt>;
}

#[derive(Clone, Debug)]
pub enum MapperKind {
    Landsat(LandsatMapper),
    Custom(Arc<dyn Mapper>),
}

impl MapperKind {
    fn mapper(&self) -> &dyn Mapper {
        match self {
            MapperKind::Landsat(mapper) => mapper,
            MapperKind::Custom(mapper) => mapper.as_ref(),
        }
    }

    pub fn name(&self) -> &str {
        self.mapper().name()
    }
}

/// Ordered set of mappers tried when a file is opened.
#[derive(Clone, Debug)]
pub struct MapperRegistry {
    mappers: Vec<MapperKind>,
}

impl Default for MapperRegistry {
    fn default() -> Self {
        Self::empty().with(MapperKind::Landsat(LandsatMapper::default()))
    }
}

impl MapperRegistry {
    /// Registry where every file goes to the generic mapper.
    pub fn empty() -> Self {
        Self {
            mappers: Vec::new(),
        }
    }

    pub fn with(mut self, mapper: MapperKind) -> Self {
        self.register(mapper);
        self
    }

    pub fn register(&mut self, mapper: MapperKind) {
        self.mappers.push(mapper)
    }

    pub fn get(&self, name: &str) -> Option<&MapperKind> {
        self.mappers.iter().find(|mapper| mapper.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.mappers.iter().map(MapperKind::name)
    }

    /// Raw tree of `path` and the name of the mapper that built it.
    ///
    /// `preferred` is tried first, then every registered mapper in order.
    /// Files no mapper accepts get one band per native band.
    pub fn dispatch(
        &self,
        path: &Path,
        engine: &dyn RasterEngine,
        preferred: Option<&str>,
    ) -> Result<(Vrt, String)> {
        let preferred = preferred.and_then(|name| {
            let found = self.get(name);
            if found.is_none() {
                warn!("no mapper named {name} is registered");
            }
            found
        });
        for mapper in preferred.into_iter().chain(self.mappers.iter()) {
            debug!("Trying {}...", mapper.name());
            match mapper.mapper().try_open(path, engine) {
                Ok(vrt) => {
                    info!("Mapper {} - success!", mapper.name());
                    return Ok((vrt, mapper.name().to_string()));
                }
                Err(err) => debug!("{} rejected {}: {err}", mapper.name(), path.display()),
            }
        }
        info!("No mapper fits {}", path.display());
        let generic = GenericMapper;
        let vrt = generic.try_open(path, engine).map_err(|err| match err {
            RustervrtError::GdalError(_) => err,
            other => RustervrtError::GdalError(other.to_string()),
        })?;
        Ok((vrt, generic.name().to_string()))
    }
}
