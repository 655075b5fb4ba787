use geo::{AffineTransform, Coord};
use itertools::Itertools;
use shrinkwraprs::Shrinkwrap;

use crate::{
    components::metadata::Metadata,
    errors::{Result, RustervrtError},
};

/// Pixel to georeferenced coordinates transform,
/// stored in GDAL coefficient order when serialized.
#[derive(Shrinkwrap, Clone, Copy, Debug)]
pub struct GeoTransform(AffineTransform);

impl Default for GeoTransform {
    fn default() -> Self {
        Self::from_gdal([0., 1., 0., 0., 0., 1.])
    }
}

impl PartialEq for GeoTransform {
    fn eq(&self, other: &Self) -> bool {
        self.to_gdal() == other.to_gdal()
    }
}

impl GeoTransform {
    pub fn from_gdal(gdal_transform: [f64; 6]) -> Self {
        Self(AffineTransform::new(
            gdal_transform[1],
            gdal_transform[2],
            gdal_transform[0],
            gdal_transform[4],
            gdal_transform[5],
            gdal_transform[3],
        ))
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.0.xoff(),
            self.0.a(),
            self.0.b(),
            self.0.yoff(),
            self.0.d(),
            self.0.e(),
        ]
    }

    /// Same origin, pixels `factor` times smaller.
    pub fn scaled(&self, factor: f64) -> Self {
        Self(AffineTransform::new(
            self.0.a() / factor,
            self.0.b() / factor,
            self.0.xoff(),
            self.0.d() / factor,
            self.0.e() / factor,
            self.0.yoff(),
        ))
    }

    /// Georeferenced coordinate of fractional pixel position `(pixel, line)`.
    pub fn pixel_to_geo(&self, pixel: f64, line: f64) -> Coord {
        self.0.apply(Coord { x: pixel, y: line })
    }

    /// Inverse mapping, `None` for degenerate transforms.
    pub fn geo_to_pixel(&self) -> Option<AffineTransform> {
        self.0.inverse()
    }
}

/// Ground control point.
#[derive(Clone, Debug, PartialEq)]
pub struct Gcp {
    pub id: String,
    pub pixel: f64,
    pub line: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

/// The one authoritative pixel to ground mapping of a tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Georeference {
    Affine {
        transform: GeoTransform,
        projection: String,
    },
    Gcps {
        gcps: Vec<Gcp>,
        projection: String,
    },
}

impl Default for Georeference {
    fn default() -> Self {
        Georeference::Affine {
            transform: GeoTransform::default(),
            projection: String::new(),
        }
    }
}

impl Georeference {
    pub fn projection(&self) -> &str {
        match self {
            Georeference::Affine { projection, .. } | Georeference::Gcps { projection, .. } => {
                projection
            }
        }
    }

    /// Regular transform, GCP based references report the GDAL default.
    pub fn transform(&self) -> GeoTransform {
        match self {
            Georeference::Affine { transform, .. } => *transform,
            Georeference::Gcps { .. } => GeoTransform::default(),
        }
    }

    pub fn gcps(&self) -> &[Gcp] {
        match self {
            Georeference::Affine { .. } => &[],
            Georeference::Gcps { gcps, .. } => gcps,
        }
    }
}

/// Size and georeference a raster is laid out on.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Grid {
    /// (width, height)
    pub size: (usize, usize),
    pub georef: Georeference,
}

impl Grid {
    pub fn new(size: (usize, usize), georef: Georeference) -> Self {
        Self { size, georef }
    }

    /// Ungeoreferenced grid of `size` pixels.
    pub fn default_for_size(size: (usize, usize)) -> Self {
        Self {
            size,
            georef: Georeference::default(),
        }
    }

    pub fn affine(size: (usize, usize), gdal_transform: [f64; 6], projection: &str) -> Self {
        Self {
            size,
            georef: Georeference::Affine {
                transform: GeoTransform::from_gdal(gdal_transform),
                projection: projection.to_string(),
            },
        }
    }

    /// Array shape (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.size.1, self.size.0)
    }

    /// Spatial reference to warp onto. Ground control points win over the
    /// regular transform because they carry their own projection.
    pub fn spatial_reference(&self) -> Result<&str> {
        let projection = self.georef.projection();
        if projection.trim().is_empty() {
            return Err(RustervrtError::ProjectionError(
                "target grid has no projection".to_string(),
            ));
        }
        Ok(projection)
    }
}

pub const GEOLOCATION_DOMAIN: &str = "GEOLOCATION";

/// Reference to separate longitude/latitude arrays describing a swath.
#[derive(Clone, Debug, PartialEq)]
pub struct Geolocation {
    pub x_dataset: String,
    pub x_band: usize,
    pub y_dataset: String,
    pub y_band: usize,
}

impl Geolocation {
    pub fn from_metadata(metadata: &Metadata) -> Option<Self> {
        Some(Self {
            x_dataset: metadata.get("X_DATASET")?.to_string(),
            x_band: metadata.get("X_BAND")?.parse().ok()?,
            y_dataset: metadata.get("Y_DATASET")?.to_string(),
            y_band: metadata.get("Y_BAND")?.parse().ok()?,
        })
    }

    pub fn to_metadata(&self) -> Metadata {
        Metadata::from_iter([
            ("X_DATASET", self.x_dataset.clone()),
            ("X_BAND", self.x_band.to_string()),
            ("Y_DATASET", self.y_dataset.clone()),
            ("Y_BAND", self.y_band.to_string()),
        ])
    }
}

/// Store friendly form of a string: commas become pipes and double quotes
/// become ampersands.
pub fn escape_for_metadata(value: &str) -> String {
    value.replace(',', "|").replace('"', "&")
}

/// `(x0| dx| rx| y0| ry| dy)`
pub fn transform_to_metadata(transform: &GeoTransform) -> String {
    format!(
        "({})",
        transform.to_gdal().iter().map(|c| format!("{c:?}")).join("| ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gdal_order_round_trips() {
        let coefficients = [500000., 10., 0., 7000000., 0., -10.];
        assert_eq!(GeoTransform::from_gdal(coefficients).to_gdal(), coefficients);
    }

    #[test]
    fn pixel_to_geo_uses_origin_and_pixel_size() {
        let transform = GeoTransform::from_gdal([100., 2., 0., 50., 0., -2.]);
        let coord = transform.pixel_to_geo(3., 1.);
        assert_eq!((coord.x, coord.y), (106., 48.));
    }

    #[test]
    fn scaled_keeps_origin_and_footprint() {
        let transform = GeoTransform::from_gdal([0., 1., 0., 0., 0., -1.]).scaled(0.5);
        assert_eq!(transform.to_gdal(), [0., 2., 0., 0., 0., -2.]);
    }

    #[test]
    fn gcp_references_prefer_their_own_projection() {
        let grid = Grid::new(
            (10, 10),
            Georeference::Gcps {
                gcps: vec![],
                projection: "EPSG:4326".into(),
            },
        );
        assert_eq!(grid.spatial_reference().unwrap(), "EPSG:4326");
        assert_eq!(grid.georef.transform(), GeoTransform::default());
    }

    #[test]
    fn empty_projection_is_not_a_reference() {
        let grid = Grid::default_for_size((2, 2));
        assert!(matches!(
            grid.spatial_reference(),
            Err(RustervrtError::ProjectionError(_))
        ));
    }

    #[test]
    fn metadata_strings_are_escaped() {
        assert_eq!(
            escape_for_metadata(r#"GEOGCS["WGS 84",DATUM["WGS_1984"]]"#),
            "GEOGCS[&WGS 84&|DATUM[&WGS_1984&]]"
        );
        assert_eq!(
            transform_to_metadata(&GeoTransform::from_gdal([0., 1., 0., 0., 0., -1.])),
            "(0.0| 1.0| 0.0| 0.0| 0.0| -1.0)"
        );
    }
}
