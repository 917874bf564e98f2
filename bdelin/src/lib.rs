//! Boundary delineation from UAV imagery: attributes of candidate boundary
//! lines and their classification into boundary / no boundary.

pub mod classify;
pub mod commons;
pub mod error;
pub mod geo_core;
pub mod geometric;
pub mod layer;
pub mod pipeline;
pub mod raster;
pub mod segmentation;
pub mod settings;

pub use error::{BoundaryError, ErrorKind, Result};
pub use pipeline::{Pipeline, PipelineError, Stage};
pub use settings::Settings;
