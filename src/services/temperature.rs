use crate::error::Error;
use crate::hap::characteristic::Characteristic;
use crate::hap::properties::Permission;
use crate::hap::service::Service;
use crate::uuid::{characteristic, service};
use std::sync::Arc;

/// Read-only temperature sensor. Controllers subscribe to readings.
#[derive(Debug)]
pub struct TemperatureSensorService {
    service: Service,
    current: Arc<Characteristic>,
}

impl TemperatureSensorService {
    pub fn new() -> Result<TemperatureSensorService, Error> {
        let mut service = Service::new(service::TEMPERATURE_SENSOR);
        service.set_primary(true);

        let current = Characteristic::new(
            characteristic::CURRENT_TEMPERATURE,
            0.0,
            &[Permission::Read, Permission::Notify],
            "Current Temperature",
        )?;
        service.add_characteristic(current.clone())?;
        Ok(TemperatureSensorService { service, current })
    }

    pub fn current_temperature(&self) -> &Arc<Characteristic> {
        &self.current
    }
}

impl From<TemperatureSensorService> for Service {
    fn from(sensor: TemperatureSensorService) -> Service {
        sensor.service
    }
}
