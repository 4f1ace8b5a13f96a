use super::characteristic::Characteristic;
use crate::error::Error;
use crate::uuid::HapType;
use std::sync::Arc;

/// A typed grouping of characteristics.
///
/// Flags and membership can only change while the caller still owns the
/// service; once handed to an [`Accessory`](super::accessory::Accessory) it is
/// reachable through shared references only.
#[derive(Debug)]
pub struct Service {
    kind: HapType,
    primary: bool,
    hidden: bool,
    characteristics: Vec<Arc<Characteristic>>,
}

impl Service {
    pub fn new(kind: HapType) -> Self {
        Service {
            kind,
            primary: false,
            hidden: false,
            characteristics: Vec::new(),
        }
    }

    pub fn set_primary(&mut self, primary: bool) {
        self.primary = primary;
    }

    pub fn set_hidden(&mut self, hidden: bool) {
        self.hidden = hidden;
    }

    /// Appends `characteristic`, which must not belong to any other service.
    pub fn add_characteristic(&mut self, characteristic: Arc<Characteristic>) -> Result<(), Error> {
        characteristic.claim()?;
        self.characteristics.push(characteristic);
        Ok(())
    }

    pub fn kind(&self) -> HapType {
        self.kind
    }

    pub fn is_primary(&self) -> bool {
        self.primary
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Characteristics in discovery order.
    pub fn characteristics(&self) -> &[Arc<Characteristic>] {
        &self.characteristics
    }

    pub fn characteristic(&self, kind: HapType) -> Option<&Arc<Characteristic>> {
        self.characteristics.iter().find(|c| c.kind() == kind)
    }
}
