pub mod catalog;
pub mod config;
pub mod conninfo;
pub mod control;
pub mod convert;
pub mod engine;
pub mod error;
pub mod objmap;
pub mod source;
pub mod stats;
pub mod target;

pub use config::EngineConfig;
pub use control::ControlPlane;
pub use error::{Error, Result};
