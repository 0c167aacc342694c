//! Business logic services

pub mod geo;
pub mod lifecycle;
pub mod location;
pub mod matcher;
pub mod notify;
pub mod pricing;
pub mod route_optimizer;
pub mod tracking;
