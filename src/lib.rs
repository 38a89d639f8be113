// Ward-level flood resilience scoring and hotspot grids.
//
// The engine takes a ward boundary layer, drain, flood-incident and
// low-lying layers and a rainfall series, and produces a 0..=100
// vulnerability score per ward plus a clipped hotspot grid inside each
// ward. `pipeline::run` drives the whole thing.

pub mod config;
pub mod crs;
pub mod error;
pub mod factors;
pub mod hotspot;
pub mod join;
pub mod loader;
pub mod normalize;
pub mod output;
pub mod pipeline;
pub mod rainfall;
pub mod reports;
pub mod scoring;
pub mod types;
pub mod util;

pub use config::EngineConfig;
pub use crs::Crs;
pub use error::{EngineError, Result, RunReport, RunStatus, Warning};
pub use pipeline::{run, Inputs, RunOutput};
