pub mod config;
pub mod error;
pub mod ids;
pub mod limits;
pub mod model;
pub mod sampling;
pub mod time;
pub mod wire;

pub use error::{BeaconError, Result};
