use crate::hap::accessory::Accessory;
use crate::hap::characteristic::Characteristic;
use crate::hap::properties::{Format, Permission, Value};
use crate::uuid::HapType;
use serde::Serialize;
use std::sync::Arc;

/// Accessory id of the single registered accessory.
pub const AID: u64 = 1;

#[derive(Debug)]
pub(crate) struct Entry {
    pub iid: u64,
    pub characteristic: Arc<Characteristic>,
}

/// The registered accessory with instance ids assigned in discovery order.
#[derive(Debug)]
pub struct AttributeDatabase {
    accessory: Accessory,
    service_iids: Vec<u64>,
    entries: Vec<Entry>,
}

#[derive(Serialize)]
struct AccessoriesDoc {
    accessories: Vec<AccessoryDoc>,
}

#[derive(Serialize)]
struct AccessoryDoc {
    aid: u64,
    services: Vec<ServiceDoc>,
}

#[derive(Serialize)]
struct ServiceDoc {
    iid: u64,
    #[serde(rename = "type")]
    kind: HapType,
    primary: bool,
    hidden: bool,
    characteristics: Vec<CharacteristicDoc>,
}

#[derive(Serialize)]
struct CharacteristicDoc {
    iid: u64,
    #[serde(rename = "type")]
    kind: HapType,
    format: Format,
    perms: Vec<Permission>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
}

impl AttributeDatabase {
    /// Takes ownership of the accessory; its structure is fixed from here on.
    pub fn new(accessory: Accessory) -> Self {
        let mut next_iid = 1;
        let mut service_iids = Vec::new();
        let mut entries = Vec::new();
        for service in accessory.services() {
            service_iids.push(next_iid);
            next_iid += 1;
            for characteristic in service.characteristics() {
                entries.push(Entry {
                    iid: next_iid,
                    characteristic: characteristic.clone(),
                });
                next_iid += 1;
            }
        }
        AttributeDatabase {
            accessory,
            service_iids,
            entries,
        }
    }

    pub fn accessory(&self) -> &Accessory {
        &self.accessory
    }

    pub fn characteristic(&self, aid: u64, iid: u64) -> Option<&Arc<Characteristic>> {
        if aid != AID {
            return None;
        }
        self.entries
            .iter()
            .find(|e| e.iid == iid)
            .map(|e| &e.characteristic)
    }

    pub(crate) fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// The `/accessories` document. Values are left out when `with_values` is
    /// false, which gives a snapshot of the structure alone.
    pub fn to_json(&self, with_values: bool) -> serde_json::Value {
        let mut entries = self.entries.iter();
        let services = self
            .accessory
            .services()
            .iter()
            .zip(&self.service_iids)
            .map(|(service, iid)| ServiceDoc {
                iid: *iid,
                kind: service.kind(),
                primary: service.is_primary(),
                hidden: service.is_hidden(),
                characteristics: entries
                    .by_ref()
                    .take(service.characteristics().len())
                    .map(|e| {
                        let c = &e.characteristic;
                        let value = if with_values && c.has_permission(Permission::Read) {
                            Some(c.value())
                        } else {
                            None
                        };
                        CharacteristicDoc {
                            iid: e.iid,
                            kind: c.kind(),
                            format: c.format(),
                            perms: c.permissions().to_vec(),
                            description: c.description().to_string(),
                            value,
                        }
                    })
                    .collect(),
            })
            .collect();
        let doc = AccessoriesDoc {
            accessories: vec![AccessoryDoc { aid: AID, services }],
        };
        serde_json::to_value(doc).unwrap_or(serde_json::Value::Null)
    }
}
