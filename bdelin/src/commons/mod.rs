pub mod artifact;
pub mod logging;
