use std::{
    fmt::Debug,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    components::band::Resampling,
    engines::{MemoryEngine, RasterEngine},
    errors::Result,
    mappers::MapperRegistry,
};

/// Driver used by [crate::Raster::export] unless told otherwise.
pub const DEFAULT_EXPORT_DRIVER: &str = "netCDF";

/// Tunables of a [crate::Raster]; every field has a default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    /// Mapper tried before the registered ones.
    pub preferred_mapper: Option<String>,
    pub add_band_resampling: Resampling,
    pub reproject_resampling: Resampling,
    pub mosaic_resampling: Resampling,
    pub export_driver: String,
    pub export: ExportOptions,
    /// Directory holding the MOD44W water mask tiles.
    pub mod44w_dir: Option<PathBuf>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            preferred_mapper: None,
            add_band_resampling: Resampling::Nearest,
            reproject_resampling: Resampling::Nearest,
            mosaic_resampling: Resampling::Nearest,
            export_driver: DEFAULT_EXPORT_DRIVER.to_string(),
            export: ExportOptions::default(),
            mod44w_dir: None,
        }
    }
}

impl Options {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportOptions {
    /// Keys removed from the global and every band's metadata.
    pub rm_metadata: Vec<String>,
    pub add_geolocation: bool,
    pub add_gcps: bool,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            rm_metadata: Vec::new(),
            add_geolocation: true,
            add_gcps: true,
        }
    }
}

/// Collaborators and options shared by every raster built from it.
#[derive(Clone, Debug)]
pub struct RasterConfig {
    pub engine: Arc<dyn RasterEngine>,
    pub mappers: MapperRegistry,
    pub options: Options,
}

impl RasterConfig {
    pub fn new(engine: Arc<dyn RasterEngine>) -> Self {
        Self {
            engine,
            mappers: MapperRegistry::default(),
            options: Options::default(),
        }
    }

    pub fn with_mappers(self, mappers: MapperRegistry) -> Self {
        Self { mappers, ..self }
    }

    pub fn with_options(self, options: Options) -> Self {
        Self { options, ..self }
    }

    /// Configuration over a fresh [MemoryEngine], returned alongside it so
    /// datasets can be inserted.
    pub fn in_memory() -> (Self, Arc<MemoryEngine>) {
        let engine = Arc::new(MemoryEngine::new());
        (Self::new(engine.clone()), engine)
    }

    #[cfg(feature = "gdal")]
    pub fn gdal() -> Self {
        Self::new(Arc::new(crate::engines::GdalEngine::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = Options::from_json(
            r#"{"mosaic_resampling": "bilinear", "export": {"rm_metadata": ["history"]}}"#,
        )
        .unwrap();
        assert_eq!(options.mosaic_resampling, Resampling::Bilinear);
        assert_eq!(options.export_driver, "netCDF");
        assert_eq!(options.export.rm_metadata, vec!["history".to_string()]);
        assert!(options.export.add_gcps);
        assert_eq!(options.preferred_mapper, None);
        assert_eq!(options.mod44w_dir, None);
    }

    #[test]
    fn mod44w_directory_is_read() {
        let options = Options::from_json(r#"{"mod44w_dir": "/data/mod44w"}"#).unwrap();
        assert_eq!(options.mod44w_dir, Some(PathBuf::from("/data/mod44w")));
    }

    #[test]
    fn unknown_resampling_is_a_config_error() {
        assert!(matches!(
            Options::from_json(r#"{"reproject_resampling": "lanczos"}"#),
            Err(crate::errors::RustervrtError::ConfigError(_))
        ));
    }

    #[test]
    fn options_survive_a_json_round_trip() {
        let options = Options {
            preferred_mapper: Some("landsat".into()),
            ..Default::default()
        };
        let json = serde_json::to_string(&options).unwrap();
        assert_eq!(Options::from_json(&json).unwrap(), options);
    }
}
