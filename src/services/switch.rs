use crate::error::Error;
use crate::hap::characteristic::Characteristic;
use crate::hap::properties::Permission;
use crate::hap::service::Service;
use crate::uuid::{characteristic, service};
use std::sync::Arc;

/// Standard on/off switch.
#[derive(Debug)]
pub struct SwitchService {
    service: Service,
    on: Arc<Characteristic>,
}

impl SwitchService {
    pub fn new() -> Result<SwitchService, Error> {
        let mut service = Service::new(service::SWITCH);
        service.set_primary(true);

        let on = Characteristic::new(
            characteristic::ON,
            false,
            &[Permission::Read, Permission::Write, Permission::Notify],
            "On",
        )?;
        service.add_characteristic(on.clone())?;
        Ok(SwitchService { service, on })
    }

    pub fn on(&self) -> &Arc<Characteristic> {
        &self.on
    }
}

impl From<SwitchService> for Service {
    fn from(switch: SwitchService) -> Service {
        switch.service
    }
}
