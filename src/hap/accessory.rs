use super::characteristic::Characteristic;
use super::properties::Permission;
use super::service::Service;
use crate::error::Error;
use crate::uuid::{characteristic, service};
use std::sync::Arc;

/// Identity metadata reported through the Accessory Information service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessoryInfo {
    pub name: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub model: String,
    pub firmware: String,
}

impl Default for AccessoryInfo {
    fn default() -> Self {
        AccessoryInfo {
            name: "HAA-Emulator-Switch".to_string(),
            manufacturer: "José A. Jiménez Campos".to_string(),
            serial_number: "112233".to_string(),
            model: "RavenSystem HAA Peregrine".to_string(),
            firmware: "11.9.1".to_string(),
        }
    }
}

/// The emulated device: identity plus an ordered set of services.
///
/// The Accessory Information service is always the first service.
#[derive(Debug)]
pub struct Accessory {
    info: AccessoryInfo,
    identify: Arc<Characteristic>,
    services: Vec<Service>,
}

impl Accessory {
    pub fn new(info: AccessoryInfo) -> Result<Accessory, Error> {
        let read_only = &[Permission::Read];
        let mut information = Service::new(service::ACCESSORY_INFORMATION);

        let identify = Characteristic::new(
            characteristic::IDENTIFY,
            false,
            &[Permission::Write],
            "Identify",
        )?;
        information.add_characteristic(identify.clone())?;
        for (kind, value, description) in [
            (characteristic::MANUFACTURER, &info.manufacturer, "Manufacturer"),
            (characteristic::MODEL, &info.model, "Model"),
            (characteristic::NAME, &info.name, "Name"),
            (characteristic::SERIAL_NUMBER, &info.serial_number, "Serial Number"),
            (characteristic::FIRMWARE_REVISION, &info.firmware, "Firmware Revision"),
        ] {
            information.add_characteristic(Characteristic::new(
                kind,
                value.as_str(),
                read_only,
                description,
            )?)?;
        }

        Ok(Accessory {
            info,
            identify,
            services: vec![information],
        })
    }

    pub fn add_service<S: Into<Service>>(&mut self, service: S) {
        self.services.push(service.into());
    }

    pub fn info(&self) -> &AccessoryInfo {
        &self.info
    }

    /// Write-only trigger asking the device to identify itself.
    pub fn identify(&self) -> &Arc<Characteristic> {
        &self.identify
    }

    pub fn services(&self) -> &[Service] {
        &self.services
    }

    pub fn characteristics(&self) -> impl Iterator<Item = &Arc<Characteristic>> {
        self.services.iter().flat_map(|s| s.characteristics().iter())
    }
}
