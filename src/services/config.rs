use crate::error::Error;
use crate::hap::characteristic::Characteristic;
use crate::hap::emulator_event::EmulatorEvent;
use crate::hap::properties::Permission;
use crate::hap::service::Service;
use crate::uuid::{characteristic, service};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Vendor configuration service carrying a single identifier string.
///
/// Both the service and the identifier are hidden: only a controller that
/// already knows the identifier type will find it.
#[derive(Debug)]
pub struct ConfigService {
    service: Service,
    identifier: Arc<Characteristic>,
}

impl ConfigService {
    /// Assembles the service and reports every identifier written remotely.
    pub fn new(events: UnboundedSender<EmulatorEvent>) -> Result<ConfigService, Error> {
        let mut service = Service::new(service::HAA_CONFIG);
        service.set_hidden(true);
        service.set_primary(false);

        let identifier = Characteristic::new(
            characteristic::HAA_CONFIG_IDENTIFIER,
            "",
            &[Permission::Read, Permission::Hidden, Permission::Write],
            "ID",
        )?;
        service.add_characteristic(identifier.clone())?;

        identifier.on_string_update(move |value| {
            log::info!("HAA custom value: {value}");
            let event = EmulatorEvent::ConfigIdentifierUpdate {
                identifier: value.to_string(),
            };
            if events.send(event).is_err() {
                log::debug!("No listener for configuration identifier updates");
            }
        })?;

        Ok(ConfigService {
            service,
            identifier,
        })
    }

    pub fn identifier(&self) -> &Arc<Characteristic> {
        &self.identifier
    }
}

impl From<ConfigService> for Service {
    fn from(config: ConfigService) -> Service {
        config.service
    }
}
