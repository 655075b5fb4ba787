use std::{fmt::Display, path::PathBuf, str::FromStr};

use log::warn;
use num_traits::AsPrimitive;

use crate::{
    components::{
        band_id::BAND_NAME,
        expression::Expression,
        metadata::Metadata,
        store::{ArrayHandle, VrtHandle},
    },
    errors::{Result, RustervrtError},
};

pub const SCALE: &str = "scale";
pub const OFFSET: &str = "offset";
pub const EXPRESSION: &str = "expression";

/// Element type of a band, named as GDAL names them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
pub enum DataType {
    Byte,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
    CInt16,
    CInt32,
    CFloat32,
    CFloat64,
}

impl DataType {
    const NAMES: [(DataType, &'static str); 11] = [
        (DataType::Byte, "Byte"),
        (DataType::UInt16, "UInt16"),
        (DataType::Int16, "Int16"),
        (DataType::UInt32, "UInt32"),
        (DataType::Int32, "Int32"),
        (DataType::Float32, "Float32"),
        (DataType::Float64, "Float64"),
        (DataType::CInt16, "CInt16"),
        (DataType::CInt32, "CInt32"),
        (DataType::CFloat32, "CFloat32"),
        (DataType::CFloat64, "CFloat64"),
    ];

    pub fn name(&self) -> &'static str {
        Self::NAMES
            .iter()
            .find(|(data_type, _)| data_type == self)
            .map(|(_, name)| *name)
            .unwrap_or("Float64")
    }

    /// Types a netCDF container can hold: unsigned become signed of the same
    /// width, complex become their real part.
    pub fn narrowed_for_export(&self) -> DataType {
        match self {
            DataType::UInt16 | DataType::CInt16 => DataType::Int16,
            DataType::UInt32 | DataType::CInt32 => DataType::Int32,
            DataType::CFloat32 => DataType::Float32,
            DataType::CFloat64 => DataType::Float64,
            other => *other,
        }
    }
}

impl Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataType {
    type Err = RustervrtError;

    fn from_str(s: &str) -> Result<Self> {
        Self::NAMES
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(s))
            .map(|(data_type, _)| *data_type)
            .ok_or_else(|| RustervrtError::InvalidOption(format!("unknown data type {s}")))
    }
}

/// Pixel types that can be wrapped into a band.
pub trait PixelType: AsPrimitive<f64> {
    const DATA_TYPE: DataType;
}

macro_rules! pixel_type {
    ($($t:ty => $data_type:ident),*) => {
        $(impl PixelType for $t {
            const DATA_TYPE: DataType = DataType::$data_type;
        })*
    };
}

pixel_type!(u8 => Byte, u16 => UInt16, i16 => Int16, u32 => UInt32, i32 => Int32, f32 => Float32, f64 => Float64);

/// How a source is fitted onto a grid of a different size or projection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Resampling {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
    Average,
}

impl Resampling {
    pub fn name(&self) -> &'static str {
        match self {
            Resampling::Nearest => "nearest",
            Resampling::Bilinear => "bilinear",
            Resampling::Cubic => "cubic",
            Resampling::Average => "average",
        }
    }
}

impl FromStr for Resampling {
    type Err = RustervrtError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "nearest" | "0" => Ok(Resampling::Nearest),
            "bilinear" | "1" => Ok(Resampling::Bilinear),
            "cubic" | "2" => Ok(Resampling::Cubic),
            "average" => Ok(Resampling::Average),
            _ => Err(RustervrtError::InvalidOption(format!(
                "unknown resampling algorithm {s}"
            ))),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScaleOffset {
    pub scale: f64,
    pub offset: f64,
}

impl Default for ScaleOffset {
    fn default() -> Self {
        Self {
            scale: 1.,
            offset: 0.,
        }
    }
}

impl ScaleOffset {
    pub fn is_identity(&self) -> bool {
        self.scale == 1. && self.offset == 0.
    }
}

/// Where the pixels of a band come from.
#[derive(Clone, Debug, PartialEq)]
pub enum BandSource {
    /// Band of a file on disk.
    File { path: PathBuf, band: usize },
    /// Band of another tree kept alive by the owning store.
    Tree { handle: VrtHandle, band: usize },
    /// Array kept alive by the owning store.
    Array(ArrayHandle),
    /// Band of another tree warped onto the grid of the owning tree.
    Warped { handle: VrtHandle, band: usize },
}

/// Definition of one band of a virtual raster.
#[derive(Clone, Debug, PartialEq)]
pub struct VirtualBand {
    pub source: BandSource,
    pub data_type: DataType,
    pub scale_offset: Option<ScaleOffset>,
    pub expression: Option<Expression>,
    pub resampling: Resampling,
    metadata: Metadata,
}

impl VirtualBand {
    /// Band reading `source` as is. `scale`, `offset` and `expression`
    /// entries of `metadata` become the band's read transforms.
    pub fn new(source: BandSource, data_type: DataType, metadata: Metadata) -> Self {
        let mut band = Self {
            source,
            data_type,
            scale_offset: None,
            expression: None,
            resampling: Resampling::default(),
            metadata: Metadata::new(),
        };
        for (key, value) in metadata {
            band.set_metadata_item(key, value);
        }
        band
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn name(&self) -> Option<&str> {
        self.metadata.get(BAND_NAME)
    }

    pub(crate) fn set_name(&mut self, name: impl Into<String>) {
        self.metadata.insert(BAND_NAME, name);
    }

    /// Sets one metadata entry, keeping the read transforms in step with
    /// the `scale`, `offset` and `expression` keys.
    pub fn set_metadata_item(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        match key.as_str() {
            SCALE | OFFSET => match value.trim().parse::<f64>() {
                Ok(parsed) => {
                    let scale_offset = self.scale_offset.get_or_insert_with(Default::default);
                    if key == SCALE {
                        scale_offset.scale = parsed
                    } else {
                        scale_offset.offset = parsed
                    }
                }
                Err(_) => warn!("ignoring non numeric {key} {value:?}"),
            },
            EXPRESSION if value.trim().is_empty() => self.expression = None,
            EXPRESSION => match Expression::parse(&value) {
                Ok(expression) => self.expression = Some(expression),
                Err(err) => warn!("ignoring expression {value:?}: {err}"),
            },
            _ => (),
        }
        self.metadata.insert(key, value);
    }

    /// Removes one metadata entry. Removing `scale`, `offset` or
    /// `expression` drops the matching read transform too.
    pub fn remove_metadata_item(&mut self, key: &str) -> Option<String> {
        match key {
            SCALE | OFFSET => {
                if let Some(scale_offset) = self.scale_offset.as_mut() {
                    if key == SCALE {
                        scale_offset.scale = 1.
                    } else {
                        scale_offset.offset = 0.
                    }
                }
                if self.scale_offset.is_some_and(|so| so.is_identity()) {
                    self.scale_offset = None;
                }
            }
            EXPRESSION => self.expression = None,
            _ => (),
        }
        self.metadata.remove(key)
    }

    /// Same band definition reading from `source`.
    pub fn with_source(&self, source: BandSource) -> Self {
        Self {
            source,
            ..self.clone()
        }
    }
}
