//! Per-segment attributes: geometry metrics, single-sided buffers, zonal
//! statistics and the ID-keyed merge back into the line layer.

pub mod attributes;
pub mod buffer;
pub mod metrics;
pub mod populate;
pub mod zonal;

pub use attributes::{AttributeCalculation, AttributeReport};
pub use buffer::{BufferBuilder, GeosBufferBuilder, Side};
pub use populate::{FeatureValue, FieldPopulator, PopulateReport};
pub use zonal::StatsMeasure;
