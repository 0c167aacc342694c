//! Type definitions

pub mod batch;
pub mod delivery;
pub mod driver;
pub mod geo;
pub mod messages;
pub mod shipment;

pub use batch::*;
pub use delivery::*;
pub use driver::*;
pub use geo::*;
pub use messages::*;
pub use shipment::*;
