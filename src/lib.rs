pub mod components;
pub mod config;
pub mod engines;
pub mod errors;
pub mod mappers;

pub use components::{
    raster::{BandInput, MaskCode, MosaicSummary, ResizeMethod, ResizeTarget},
    BandId, DataType, Grid, Metadata, Raster, Resampling, Vrt,
};
pub use config::{ExportOptions, Options, RasterConfig};
pub use errors::{Result, RustervrtError};
