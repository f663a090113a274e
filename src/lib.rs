pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod infrastructure;

pub use application::{agent, bridge, stream};
pub use domain::types;
pub use infrastructure::{model, server, terminal};
