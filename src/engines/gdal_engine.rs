use std::{ffi::CStr, path::Path, ptr};

use gdal::{
    cpl::CslStringList,
    raster::Buffer,
    spatial_ref::SpatialRef,
    Dataset as GdalDataset, DriverManager, Gcp as GdalGcp, Metadata as GdalMetadata,
    MetadataEntry as GdalMetadataEntry,
};
use gdal_sys::{CPLErr, GDALResampleAlg};
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};

use crate::{
    components::{
        band::{DataType, Resampling},
        georef::{Gcp, GeoTransform, Geolocation, Georeference, Grid, GEOLOCATION_DOMAIN},
        metadata::Metadata,
    },
    engines::{BandInfo, OutputDataset, RasterEngine, RasterInfo},
    errors::{Result, RustervrtError},
};

fn filter_metadata_gdal(metadata: &impl GdalMetadata, wanted: &str) -> Metadata {
    GdalMetadata::metadata(metadata)
        .filter_map(|GdalMetadataEntry { domain, key, value }| {
            if domain.eq(wanted) {
                Some((key, value))
            } else {
                None
            }
        })
        .collect()
}

fn georef_from_gdal(dataset: &GdalDataset) -> Result<Georeference> {
    let gcps = dataset.gcps();
    if !gcps.is_empty() {
        return Ok(Georeference::Gcps {
            gcps: gcps
                .iter()
                .map(|gcp| Gcp {
                    id: gcp.id(),
                    pixel: gcp.pixel(),
                    line: gcp.line(),
                    x: gcp.x(),
                    y: gcp.y(),
                    z: gcp.z(),
                })
                .collect(),
            projection: dataset.gcp_projection().unwrap_or_default(),
        });
    }
    // datasets without a transform report the default one
    let transform = dataset
        .geo_transform()
        .map(GeoTransform::from_gdal)
        .unwrap_or_default();
    Ok(Georeference::Affine {
        transform,
        projection: dataset.projection(),
    })
}

/// In-memory dataset holding `arrays` on `grid`.
fn mem_dataset(grid: &Grid, arrays: &[ArrayView2<f64>]) -> Result<GdalDataset> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let (width, height) = grid.size;
    let mut dataset = driver.create_with_band_type::<f64, _>("", width, height, arrays.len())?;
    match &grid.georef {
        Georeference::Affine {
            transform,
            projection,
        } => {
            dataset.set_geo_transform(&transform.to_gdal())?;
            if !projection.is_empty() {
                dataset.set_projection(projection)?;
            }
        }
        Georeference::Gcps { gcps, projection } => {
            let gcps = gcps
                .iter()
                .map(|gcp| GdalGcp {
                    id: gcp.id.clone(),
                    info: String::new(),
                    pixel: gcp.pixel,
                    line: gcp.line,
                    x: gcp.x,
                    y: gcp.y,
                    z: gcp.z,
                })
                .collect();
            dataset.set_gcps(gcps, &SpatialRef::from_definition(projection)?)?;
        }
    }
    for (idx, array) in arrays.iter().enumerate() {
        let mut raster_band = dataset.rasterband(idx + 1)?;
        let mut buffer = Buffer::new((width, height), array.iter().copied().collect());
        raster_band.write((0, 0), (width, height), &mut buffer)?;
    }
    Ok(dataset)
}

fn resample_alg(resampling: Resampling) -> GDALResampleAlg::Type {
    match resampling {
        Resampling::Nearest => GDALResampleAlg::GRA_NearestNeighbour,
        Resampling::Bilinear => GDALResampleAlg::GRA_Bilinear,
        Resampling::Cubic => GDALResampleAlg::GRA_Cubic,
        Resampling::Average => GDALResampleAlg::GRA_Average,
    }
}

/// Warps every band of `source` into `target` with `resampling`.
fn reproject_image(source: &GdalDataset, target: &GdalDataset, resampling: Resampling) -> Result<()> {
    let rv = unsafe {
        gdal_sys::GDALReprojectImage(
            source.c_dataset(),
            ptr::null(),
            target.c_dataset(),
            ptr::null(),
            resample_alg(resampling),
            0.0,
            0.0,
            None,
            ptr::null_mut(),
            ptr::null_mut(),
        )
    };
    if rv != CPLErr::CE_None {
        let msg = unsafe { CStr::from_ptr(gdal_sys::CPLGetLastErrorMsg()) };
        return Err(RustervrtError::ProjectionError(format!(
            "{} warp failed: {}",
            resampling.name(),
            msg.to_string_lossy()
        )));
    }
    Ok(())
}

/// Engine backed by the GDAL library.
#[derive(Debug, Default)]
pub struct GdalEngine;

impl GdalEngine {
    pub fn new() -> Self {
        Self
    }
}

impl RasterEngine for GdalEngine {
    fn open(&self, path: &Path) -> Result<RasterInfo> {
        let dataset = GdalDataset::open(path)?;
        let bands = dataset
            .rasterbands()
            .map(|raster_band| -> Result<BandInfo> {
                let raster_band = raster_band?;
                let type_name = raster_band.band_type().name();
                let data_type = type_name.parse().unwrap_or_else(|_| {
                    warn!("{type_name} bands of {} are read as Float64", path.display());
                    DataType::Float64
                });
                Ok(BandInfo {
                    data_type,
                    metadata: filter_metadata_gdal(&raster_band, ""),
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(RasterInfo {
            path: path.to_path_buf(),
            driver: dataset.driver().short_name(),
            grid: Grid::new(dataset.raster_size(), georef_from_gdal(&dataset)?),
            metadata: filter_metadata_gdal(&dataset, ""),
            bands,
            geolocation: Geolocation::from_metadata(&filter_metadata_gdal(
                &dataset,
                GEOLOCATION_DOMAIN,
            )),
        })
    }

    fn read_band(&self, path: &Path, band: usize) -> Result<Array2<f64>> {
        let dataset = GdalDataset::open(path)?;
        let raster_band = dataset.rasterband(band)?;
        let (width, height) = dataset.raster_size();
        let buffer = raster_band.read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        let data: Vec<f64> = buffer.into_iter().collect();
        Ok(Array2::from_shape_vec((height, width), data)?)
    }

    fn warp(
        &self,
        array: ArrayView2<f64>,
        from: &Grid,
        to: &Grid,
        resampling: Resampling,
    ) -> Result<Array2<f64>> {
        if from.georef.projection().is_empty() || to.georef.projection().is_empty() {
            return Err(RustervrtError::ProjectionError(
                "both grids need a spatial reference".to_string(),
            ));
        }
        debug!(
            "warping {:?} onto {:?} with {}",
            from.size,
            to.size,
            resampling.name()
        );
        let source = mem_dataset(from, &[array])?;
        let nodata = Array2::from_elem(to.shape(), f64::NAN);
        let target = mem_dataset(to, &[nodata.view()])?;
        reproject_image(&source, &target, resampling)?;
        let (width, height) = to.size;
        let buffer = target
            .rasterband(1)?
            .read_as::<f64>((0, 0), (width, height), (width, height), None)?;
        let data: Vec<f64> = buffer.into_iter().collect();
        Ok(Array2::from_shape_vec((height, width), data)?)
    }

    fn create_copy(&self, driver: &str, path: &Path, output: &OutputDataset) -> Result<()> {
        info!("Creating output dataset: {}", path.display());
        let arrays: Vec<_> = output.bands.iter().map(|band| band.array.view()).collect();
        let mut dataset = mem_dataset(&output.grid, &arrays)?;
        for (key, value) in output.metadata.iter() {
            dataset.set_metadata_item(key, value, "")?;
        }
        for (idx, band) in output.bands.iter().enumerate() {
            let mut raster_band = dataset.rasterband(idx + 1)?;
            for (key, value) in band.metadata.iter() {
                raster_band.set_metadata_item(key, value, "")?;
            }
        }
        let driver = DriverManager::get_driver_by_name(driver)?;
        dataset.create_copy(&driver, path, &CslStringList::new())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Resampling::Nearest, GDALResampleAlg::GRA_NearestNeighbour)]
    #[case(Resampling::Bilinear, GDALResampleAlg::GRA_Bilinear)]
    #[case(Resampling::Cubic, GDALResampleAlg::GRA_Cubic)]
    #[case(Resampling::Average, GDALResampleAlg::GRA_Average)]
    fn every_resampling_reaches_the_warper(
        #[case] resampling: Resampling,
        #[case] expected: GDALResampleAlg::Type,
    ) {
        assert_eq!(resample_alg(resampling), expected);
    }
}
