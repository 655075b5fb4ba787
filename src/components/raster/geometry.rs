use std::str::FromStr;

use log::{debug, info};

use crate::{
    components::{band::Resampling, georef::Grid, raster::Raster, vrt::Vrt},
    errors::{Result, RustervrtError},
};

/// Size a raster is resized to.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ResizeTarget {
    /// Multiplier of the current width and height.
    Factor(f64),
    /// New width, height follows.
    Width(usize),
    /// New height, width follows.
    Height(usize),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ResizeMethod {
    #[default]
    Average,
    Nearest,
}

impl FromStr for ResizeMethod {
    type Err = RustervrtError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "average" => Ok(ResizeMethod::Average),
            "nearest" | "subsample" => Ok(ResizeMethod::Nearest),
            _ => Err(RustervrtError::InvalidOption(format!(
                "resize method must be average or nearest, got {s}"
            ))),
        }
    }
}

impl From<ResizeMethod> for Resampling {
    fn from(value: ResizeMethod) -> Self {
        match value {
            ResizeMethod::Average => Resampling::Average,
            ResizeMethod::Nearest => Resampling::Nearest,
        }
    }
}

impl ResizeTarget {
    fn factor(&self, size: (usize, usize)) -> Result<f64> {
        let factor = match *self {
            ResizeTarget::Factor(factor) => factor,
            ResizeTarget::Width(width) => width as f64 / size.0 as f64,
            ResizeTarget::Height(height) => height as f64 / size.1 as f64,
        };
        if !factor.is_finite() || factor <= 0. {
            return Err(RustervrtError::InvalidOption(format!(
                "cannot resize by {self:?} from {size:?}"
            )));
        }
        Ok(factor)
    }
}

fn scaled_size(size: (usize, usize), factor: f64) -> (usize, usize) {
    let scale = |len: usize| ((len as f64 * factor).round() as usize).max(1);
    (scale(size.0), scale(size.1))
}

impl Raster {
    /// Changes the working size, keeping the covered area.
    ///
    /// `Factor(1.0)` drops every earlier resize and reprojection. A width or
    /// height equal to the current one keeps the working geometry.
    pub fn resize(&mut self, target: ResizeTarget, method: ResizeMethod) -> Result<()> {
        let factor = target.factor(self.working.size())?;
        if target == ResizeTarget::Factor(1.) {
            self.reset();
            return Ok(());
        }
        let size = scaled_size(self.working.size(), factor);
        info!("resizing {} from {:?} to {size:?}", self.name, self.working.size());
        self.working.rescale(factor, size);
        self.working.set_resampling(method.into());
        Ok(())
    }

    /// Lays the working tree out on `target`, warping every band onto it at
    /// read time. `None` drops every earlier resize and reprojection.
    pub fn reproject(&mut self, target: Option<&Grid>, resampling: Option<Resampling>) -> Result<()> {
        let Some(target) = target else {
            self.reset();
            return Ok(());
        };
        let projection = target.spatial_reference()?;
        let resampling = resampling.unwrap_or(self.config.options.reproject_resampling);
        debug!("reprojecting {} onto {projection}", self.name);
        let snapshot = self.store.insert_tree(self.raw.clone());
        self.working = Vrt::warped(snapshot, &self.raw, target, resampling);
        self.release_unused();
        info!(
            "reprojected {} to {:?} with {}",
            self.name,
            target.size,
            resampling.name()
        );
        Ok(())
    }
}
