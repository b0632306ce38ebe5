//! KDL configuration parsing for the runqueue controller.
//!
//! This crate handles parsing of the controller configuration
//! (`runqueue.kdl`): which labels carry admission state, and where the
//! repository and pipeline run resources live.

pub mod controller;
pub mod error;

pub use controller::{
    ControllerConfig, ResourceCoordinates, StateValues, load, parse_controller_config,
};
pub use error::{ConfigError, ConfigResult};
