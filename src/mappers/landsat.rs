use std::{
    fs,
    path::{Path, PathBuf},
};

use itertools::Itertools;
use log::debug;

use crate::{
    components::{
        band::{BandSource, DataType},
        band_id::BAND_NAME,
        metadata::Metadata,
        vrt::Vrt,
    },
    engines::{RasterEngine, RasterInfo},
    errors::{Result, RustervrtError},
    mappers::Mapper,
};

const WKV: &str = "toa_outgoing_spectral_radiance";
const SCALE_RATIO: &str = "0.1";

/// Which of the band sizes of a scene to keep.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resolution {
    /// Bands of the smallest width.
    #[default]
    Low,
    /// Bands of the largest width.
    High,
}

/// Landsat 5 to 8 scenes delivered as one GeoTIFF per band.
#[derive(Clone, Debug, Default)]
pub struct LandsatMapper {
    pub resolution: Resolution,
}

impl LandsatMapper {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }

    fn accepts(file_name: &str) -> bool {
        file_name.starts_with(['L', 'M'])
            && [".tif", ".TIF", "_MTL.txt"]
                .iter()
                .any(|ending| file_name.ends_with(ending))
    }

    /// Band files of the scene `path` belongs to, sorted by name.
    fn band_files(path: &Path, core: &str) -> Result<Vec<PathBuf>> {
        let dir = path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        let mut files: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map_ok(|entry| {
                let name = entry.file_name().into_string().ok()?;
                (name.starts_with(core) && name.to_ascii_lowercase().ends_with("tif"))
                    .then(|| entry.path())
            })
            .try_collect()?;
        files.sort();
        Ok(files)
    }
}

fn suffix(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .and_then(|stem| stem.rsplit('_').next())
        .unwrap_or_default()
        .to_string()
}

impl Mapper for LandsatMapper {
    fn name(&self) -> &str {
        "landsat"
    }

    fn try_open(&self, path: &Path, engine: &dyn RasterEngine) -> Result<Vrt> {
        let not_this_format = || RustervrtError::NotThisFormat(path.display().to_string());
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(not_this_format)?;
        if [".tar", ".tar.gz", ".tgz"]
            .iter()
            .any(|ending| file_name.ends_with(ending))
        {
            debug!("landsat archives are not unpacked");
            return Err(not_this_format());
        }
        if !Self::accepts(file_name) {
            return Err(not_this_format());
        }

        let core = file_name.split(['_', '.']).next().unwrap_or(file_name);
        let scenes: Vec<(PathBuf, RasterInfo)> = Self::band_files(path, core)?
            .into_iter()
            .map(|file| engine.open(&file).map(|info| (file, info)))
            .try_collect()?;
        let widths = scenes.iter().map(|(_, info)| info.size().0);
        let width = match self.resolution {
            Resolution::Low => widths.min(),
            Resolution::High => widths.max(),
        }
        .ok_or_else(not_this_format)?;

        let kept: Vec<_> = scenes
            .into_iter()
            .filter(|(_, info)| info.size().0 == width)
            .collect();
        let grid = kept
            .last()
            .map(|(_, info)| info.grid.clone())
            .ok_or_else(not_this_format)?;
        let mut vrt = Vrt::new(grid);
        for (file, info) in kept {
            let suffix = suffix(&file);
            let data_type = info
                .bands
                .first()
                .map(|band| band.data_type)
                .unwrap_or(DataType::UInt16);
            vrt.create_band(
                BandSource::File {
                    path: file,
                    band: 1,
                },
                data_type,
                Metadata::from_iter([
                    ("wkv", WKV.to_string()),
                    ("suffix", suffix.clone()),
                    (BAND_NAME, format!("{WKV}_{suffix}")),
                    ("scale", SCALE_RATIO.to_string()),
                ]),
            );
        }
        Ok(vrt)
    }
}
