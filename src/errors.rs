use crate::components::BandId;

pub type Result<T> = std::result::Result<T, RustervrtError>;

#[derive(thiserror::Error, Debug)]
pub enum RustervrtError {
    /// Raised by a mapper that does not recognise a file. Dispatch moves on.
    #[error("{0} is not handled by this mapper")]
    NotThisFormat(String),
    /// The raster engine could not open, read, warp or write a dataset.
    #[error("raster engine failure: {0}")]
    GdalError(String),
    #[error("Cannot find band {band}! band number is from 1 to {count}")]
    BandNotFound { band: BandId, count: usize },
    #[error("invalid option: {0}")]
    InvalidOption(String),
    #[error("cannot reproject: {0}")]
    ProjectionError(String),
    #[error("expression error: {0}")]
    ExpressionError(String),
    #[error(transparent)]
    XmlError(#[from] quick_xml::Error),
    #[error(transparent)]
    XmlAttrError(#[from] quick_xml::events::attributes::AttrError),
    #[error("malformed raster document: {0}")]
    DocumentError(String),
    #[error(transparent)]
    NdarrayError(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    ConfigError(#[from] serde_json::Error),
    #[error("handle {0} does not belong to this store")]
    DanglingHandle(String),
}

#[cfg(feature = "gdal")]
impl From<gdal::errors::GdalError> for RustervrtError {
    fn from(value: gdal::errors::GdalError) -> Self {
        RustervrtError::GdalError(value.to_string())
    }
}
