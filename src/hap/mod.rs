pub mod accessory;
pub mod characteristic;
pub mod emulator_event;
pub mod properties;
pub mod service;
