pub mod error;
pub mod hap;
pub mod lifecycle;
pub mod server;
pub mod services;
pub mod store;
pub mod uuid;

pub use self::lifecycle::Controller;
pub use self::server::HttpServer;
