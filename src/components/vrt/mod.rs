pub mod document;

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    components::{
        band::{BandSource, DataType, Resampling, VirtualBand},
        band_id::BandId,
        georef::{Geolocation, Georeference, Grid},
        metadata::Metadata,
        store::{ArrayHandle, VrtHandle},
    },
    errors::{Result, RustervrtError},
};

/// Virtual raster: a grid plus an ordered, append only list of band
/// definitions. No pixels are held.
///
/// Clones share band definitions until one side modifies a band.
#[derive(Clone, Debug, PartialEq)]
pub struct Vrt {
    /// (width, height)
    size: (usize, usize),
    georef: Georeference,
    bands: Vec<Arc<VirtualBand>>,
    metadata: Metadata,
    geolocation: Option<Geolocation>,
}

impl Vrt {
    /// Tree without bands laid out on `grid`.
    pub fn new(grid: Grid) -> Self {
        Self {
            size: grid.size,
            georef: grid.georef,
            bands: Vec::new(),
            metadata: Metadata::new(),
            geolocation: None,
        }
    }

    /// Single band tree reading an in-memory array of `shape` (rows, cols).
    pub fn from_array(handle: ArrayHandle, shape: (usize, usize), data_type: DataType) -> Self {
        let mut vrt = Self::new(Grid::default_for_size((shape.1, shape.0)));
        vrt.create_band(BandSource::Array(handle), data_type, Metadata::new());
        vrt
    }

    /// Tree reading every band of `source` (stored at `handle`),
    /// resampled to `size`.
    pub fn resampled(
        handle: VrtHandle,
        source: &Vrt,
        size: (usize, usize),
        resampling: Resampling,
    ) -> Self {
        let mut vrt = source.referencing(handle, |band| BandSource::Tree { handle, band });
        let factor = size.0 as f64 / source.size.0.max(1) as f64;
        vrt.rescale(factor, size);
        vrt.set_resampling(resampling);
        vrt
    }

    /// Tree on `target` whose bands are those of `source` (stored at
    /// `handle`) warped onto it. Geolocation arrays do not follow.
    pub fn warped(handle: VrtHandle, source: &Vrt, target: &Grid, resampling: Resampling) -> Self {
        let mut vrt = source.referencing(handle, |band| BandSource::Warped { handle, band });
        vrt.size = target.size;
        vrt.georef = target.georef.clone();
        vrt.geolocation = None;
        vrt.set_resampling(resampling);
        vrt
    }

    /// Copy of `self` whose band `n` reads `source(n)`.
    fn referencing(&self, handle: VrtHandle, source: impl Fn(usize) -> BandSource) -> Self {
        debug!("building tree on top of {handle}");
        let bands = self
            .bands
            .iter()
            .enumerate()
            .map(|(idx, band)| Arc::new(band.with_source(source(idx + 1))))
            .collect();
        Self {
            bands,
            ..self.clone()
        }
    }

    /// (width, height)
    pub fn size(&self) -> (usize, usize) {
        self.size
    }

    /// Array shape (rows, cols).
    pub fn shape(&self) -> (usize, usize) {
        (self.size.1, self.size.0)
    }

    pub fn georef(&self) -> &Georeference {
        &self.georef
    }

    pub fn grid(&self) -> Grid {
        Grid::new(self.size, self.georef.clone())
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn metadata_mut(&mut self) -> &mut Metadata {
        &mut self.metadata
    }

    pub fn geolocation(&self) -> Option<&Geolocation> {
        self.geolocation.as_ref()
    }

    pub fn set_geolocation(&mut self, geolocation: Option<Geolocation>) {
        self.geolocation = geolocation
    }

    pub fn bands(&self) -> &[Arc<VirtualBand>] {
        &self.bands
    }

    pub fn band_count(&self) -> usize {
        self.bands.len()
    }

    /// Band at 1-based `ordinal`.
    pub fn band(&self, ordinal: usize) -> Result<&VirtualBand> {
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.bands.get(idx))
            .map(Arc::as_ref)
            .ok_or_else(|| self.not_found(ordinal))
    }

    /// Mutable band at 1-based `ordinal`, unsharing it from clones first.
    pub fn band_mut(&mut self, ordinal: usize) -> Result<&mut VirtualBand> {
        let count = self.bands.len();
        ordinal
            .checked_sub(1)
            .and_then(|idx| self.bands.get_mut(idx))
            .map(Arc::make_mut)
            .ok_or(RustervrtError::BandNotFound {
                band: BandId::Number(ordinal),
                count,
            })
    }

    fn not_found(&self, ordinal: usize) -> RustervrtError {
        RustervrtError::BandNotFound {
            band: BandId::Number(ordinal),
            count: self.bands.len(),
        }
    }

    pub fn resolve(&self, band: &BandId) -> Result<usize> {
        band.resolve(self)
    }

    /// Appends a band reading `source` and returns its number.
    pub fn create_band(&mut self, source: BandSource, data_type: DataType, metadata: Metadata) -> usize {
        self.push_band(VirtualBand::new(source, data_type, metadata))
    }

    /// Appends `band`, giving it a name unique within this tree.
    pub fn push_band(&mut self, mut band: VirtualBand) -> usize {
        let ordinal = self.bands.len() + 1;
        let requested = band
            .name()
            .map(str::to_string)
            .unwrap_or_else(|| format!("band_{ordinal}"));
        let name = self.unique_name(&requested);
        if name != requested {
            warn!("band name {requested} already taken, using {name}");
        }
        band.set_name(name);
        self.bands.push(Arc::new(band));
        ordinal
    }

    fn has_name(&self, name: &str) -> bool {
        self.bands.iter().any(|band| band.name() == Some(name))
    }

    fn unique_name(&self, requested: &str) -> String {
        if !self.has_name(requested) {
            return requested.to_string();
        }
        let mut suffix = 1;
        loop {
            let candidate = format!("{requested}_{suffix}");
            if !self.has_name(&candidate) {
                return candidate;
            }
            suffix += 1;
        }
    }

    /// Sets the grid size to `size` and rescales the georeference by
    /// `factor`. Ground control points are kept inside the new grid.
    pub(crate) fn rescale(&mut self, factor: f64, size: (usize, usize)) {
        self.size = size;
        match &mut self.georef {
            Georeference::Affine { transform, .. } => *transform = transform.scaled(factor),
            Georeference::Gcps { gcps, .. } => {
                for gcp in gcps.iter_mut() {
                    gcp.pixel = (gcp.pixel * factor).min(size.0 as f64);
                    gcp.line = (gcp.line * factor).min(size.1 as f64);
                }
            }
        }
    }

    /// Sets the resampling of every band.
    pub(crate) fn set_resampling(&mut self, resampling: Resampling) {
        for band in self.bands.iter_mut() {
            Arc::make_mut(band).resampling = resampling;
        }
    }
}
