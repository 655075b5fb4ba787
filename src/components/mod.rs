pub mod band;
pub mod band_id;
pub mod expression;
pub mod georef;
pub mod metadata;
pub mod raster;
pub mod reader;
pub mod resample;
pub mod store;
pub mod vrt;

pub use band::{BandSource, DataType, PixelType, Resampling, VirtualBand};
pub use band_id::BandId;
pub use georef::{Gcp, GeoTransform, Geolocation, Georeference, Grid};
pub use metadata::Metadata;
pub use raster::Raster;
pub use reader::VrtReader;
pub use store::VrtStore;
pub use vrt::Vrt;
