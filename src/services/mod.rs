//! Concrete service assemblies.
//!
//! Each one builds a [`Service`](crate::hap::service::Service), creates its
//! characteristics with explicit permissions, attaches them and registers
//! handlers. The service converts into a plain `Service` for the accessory
//! while the caller keeps `Arc` handles to the characteristics it drives.

pub mod config;
pub mod switch;
pub mod temperature;

pub use config::ConfigService;
pub use switch::SwitchService;
pub use temperature::TemperatureSensorService;
