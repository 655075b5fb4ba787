use std::path::Path;

use itertools::Itertools;
use log::{debug, info, warn};

use crate::{
    components::{
        band::{BandSource, DataType},
        band_id::{BandId, BAND_NAME},
        georef::{escape_for_metadata, transform_to_metadata, Gcp},
        metadata::Metadata,
        raster::Raster,
        vrt::Vrt,
    },
    config::ExportOptions,
    engines::{OutputBand, OutputDataset},
    errors::{Result, RustervrtError},
};

const NETCDF_VARNAME: &str = "NETCDF_VARNAME";
const SOURCE_KEYS: [&str; 2] = ["SourceFilename", "SourceBand"];

impl Raster {
    /// Tree handed to the export driver: `bands` of the working tree (all
    /// when `None`) with container friendly types and georeference metadata.
    pub fn export_tree(&self, bands: Option<&[BandId]>, options: &ExportOptions) -> Result<Vrt> {
        let mut tree = match bands {
            None => self.working.clone(),
            Some(bands) => self.subset(bands)?,
        };

        for ordinal in 1..=tree.band_count() {
            let band = tree.band_mut(ordinal)?;
            band.data_type = band.data_type.narrowed_for_export();
        }

        if options.add_geolocation {
            if let Some(geolocation) = tree.geolocation().cloned() {
                for (path, band, wkv, name) in [
                    (&geolocation.x_dataset, geolocation.x_band, "longitude", "GEOLOCATION_X_DATASET"),
                    (&geolocation.y_dataset, geolocation.y_band, "latitude", "GEOLOCATION_Y_DATASET"),
                ] {
                    tree.create_band(
                        BandSource::File {
                            path: path.into(),
                            band,
                        },
                        DataType::Float32,
                        Metadata::from_iter([("wkv", wkv), (BAND_NAME, name)]),
                    );
                }
            }
        }

        let georef = self.working.georef().clone();
        let metadata = tree.metadata_mut();
        let gcps = georef.gcps();
        if options.add_gcps && !gcps.is_empty() {
            let join = |value: fn(&Gcp) -> f64| {
                gcps.iter().map(|gcp| format!("{:?}", value(gcp))).join("|")
            };
            metadata.insert("NANSAT_GCPPixel", join(|gcp| gcp.pixel));
            metadata.insert("NANSAT_GCPLine", join(|gcp| gcp.line));
            metadata.insert("NANSAT_GCPX", join(|gcp| gcp.x));
            metadata.insert("NANSAT_GCPY", join(|gcp| gcp.y));
            metadata.insert("NANSAT_GCPZ", join(|gcp| gcp.z));
            metadata.insert(
                "NANSAT_GCPProjection",
                escape_for_metadata(georef.projection()),
            );
        }
        metadata.insert("NANSAT_Projection", escape_for_metadata(georef.projection()));
        metadata.insert("NANSAT_GeoTransform", transform_to_metadata(&georef.transform()));

        for ordinal in 1..=tree.band_count() {
            let band = tree.band_mut(ordinal)?;
            match band.name().map(str::to_string) {
                Some(name) => band.set_metadata_item(NETCDF_VARNAME, name),
                None => warn!("Unable to set {NETCDF_VARNAME} for band {ordinal}"),
            }
            for key in &options.rm_metadata {
                if band.remove_metadata_item(key).is_none() {
                    info!("Unable to remove metadata {key} from band {ordinal}");
                }
            }
        }
        for key in &options.rm_metadata {
            if tree.metadata_mut().remove(key).is_none() {
                info!("Global metadata {key} not found");
            }
        }
        Ok(tree)
    }

    /// Tree with the listed bands of the working tree. The bands keep their
    /// sources, so nothing new is kept alive for the subset.
    fn subset(&self, bands: &[BandId]) -> Result<Vrt> {
        let ordinals: Vec<usize> = bands
            .iter()
            .map(|band| band.resolve(&self.working))
            .try_collect()?;
        let mut tree = Vrt::new(self.working.grid());
        *tree.metadata_mut() = self.working.metadata().clone();
        tree.set_geolocation(self.working.geolocation().cloned());
        for ordinal in ordinals {
            let mut band = self.working.band(ordinal)?.clone();
            for key in SOURCE_KEYS {
                band.remove_metadata_item(key);
            }
            tree.push_band(band);
        }
        Ok(tree)
    }

    /// Writes `bands` (all when `None`) to `path` with the configured
    /// driver. Pixels are written with scale, offset and expression applied.
    pub fn export(
        &self,
        path: impl AsRef<Path>,
        bands: Option<&[BandId]>,
        options: Option<&ExportOptions>,
    ) -> Result<()> {
        let path = path.as_ref();
        let options = options
            .cloned()
            .unwrap_or_else(|| self.config.options.export.clone());
        let tree = self.export_tree(bands, &options)?;
        let reader = self.reader();
        let bands: Vec<OutputBand> = (1..=tree.band_count())
            .map(|ordinal| {
                let band = tree.band(ordinal)?;
                Ok::<_, RustervrtError>(OutputBand {
                    data_type: band.data_type,
                    metadata: band.metadata().clone(),
                    array: reader.read_band(&tree, ordinal)?,
                })
            })
            .try_collect()?;
        let dataset = OutputDataset {
            grid: tree.grid(),
            metadata: tree.metadata().clone(),
            bands,
        };
        let driver = &self.config.options.export_driver;
        debug!("exporting {} bands of {} as {driver}", dataset.bands.len(), self.name);
        self.config.engine.create_copy(driver, path, &dataset)?;
        info!("exported {} to {}", self.name, path.display());
        Ok(())
    }
}
