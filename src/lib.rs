pub mod coerce;
pub mod config;
pub mod error;
pub mod middleware;
pub mod model;
pub mod protocols;
pub mod store;
pub mod update;
pub mod validate;
