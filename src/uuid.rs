use crate::error::{Error, ErrorType};
use std::fmt;
use uuid::Uuid;

/// Last 96 bits shared by every Apple-defined service and characteristic type.
const HAP_BASE_SUFFIX: u128 = 0x0000_1000_8000_0026_BB76_5291;

pub trait ShortUuid {
    fn from_short(uuid: u32) -> Uuid;

    fn short(&self) -> Option<u32>;
}

impl ShortUuid for Uuid {
    fn from_short(uuid: u32) -> Uuid {
        Uuid::from_u128(((uuid as u128) << 96) | HAP_BASE_SUFFIX)
    }

    fn short(&self) -> Option<u32> {
        let value = self.as_u128();
        if value & ((1u128 << 96) - 1) == HAP_BASE_SUFFIX {
            Some((value >> 96) as u32)
        } else {
            None
        }
    }
}

/// Protocol-level type identifier of a service or characteristic.
///
/// Treated as an opaque token: nothing in the object model branches on it.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HapType(Uuid);

impl HapType {
    pub const fn from_uuid(uuid: Uuid) -> Self {
        HapType(uuid)
    }

    pub const fn from_short(short: u32) -> Self {
        HapType(Uuid::from_u128(((short as u128) << 96) | HAP_BASE_SUFFIX))
    }

    /// Parse a type from its canonical form `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX`,
    /// or from the short hexadecimal form used for Apple-defined types.
    pub fn parse(value: &str) -> Result<Self, Error> {
        if value.len() == 36 {
            let hyphens_ok = value
                .char_indices()
                .all(|(i, c)| matches!(i, 8 | 13 | 18 | 23) == (c == '-'));
            if !hyphens_ok {
                return Err(Error::from_string(
                    format!("malformed type identifier {value:?}"),
                    ErrorType::InvalidType,
                ));
            }
            return Ok(HapType(Uuid::parse_str(value)?));
        }
        if (1..=8).contains(&value.len()) {
            if let Ok(short) = u32::from_str_radix(value, 16) {
                return Ok(HapType::from_short(short));
            }
        }
        Err(Error::from_string(
            format!("malformed type identifier {value:?}"),
            ErrorType::InvalidType,
        ))
    }

    pub fn uuid(&self) -> Uuid {
        self.0
    }

    pub fn is_apple_defined(&self) -> bool {
        self.0.short().is_some()
    }
}

impl fmt::Display for HapType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.0.short() {
            Some(short) => write!(f, "{short:X}"),
            None => {
                let mut buffer = Uuid::encode_buffer();
                f.write_str(self.0.as_hyphenated().encode_upper(&mut buffer))
            }
        }
    }
}

impl fmt::Debug for HapType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "HapType({self})")
    }
}

impl serde::Serialize for HapType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub mod service {
    use super::HapType;

    pub const ACCESSORY_INFORMATION: HapType = HapType::from_short(0x3E);
    pub const SWITCH: HapType = HapType::from_short(0x49);
    pub const TEMPERATURE_SENSOR: HapType = HapType::from_short(0x8A);

    /// Vendor configuration service.
    pub const HAA_CONFIG: HapType =
        HapType::from_uuid(uuid::Uuid::from_u128(0xF0000100_0218_2017_81BF_AF2B7C833922));
}

pub mod characteristic {
    use super::HapType;

    /// Celsius, as a float.
    pub const CURRENT_TEMPERATURE: HapType = HapType::from_short(0x11);
    pub const IDENTIFY: HapType = HapType::from_short(0x14);
    pub const MANUFACTURER: HapType = HapType::from_short(0x20);
    pub const MODEL: HapType = HapType::from_short(0x21);
    pub const NAME: HapType = HapType::from_short(0x23);
    /// On/Off state of a switch.
    pub const ON: HapType = HapType::from_short(0x25);
    pub const SERIAL_NUMBER: HapType = HapType::from_short(0x30);
    pub const FIRMWARE_REVISION: HapType = HapType::from_short(0x52);

    /// Configuration identifier written by the vendor app.
    pub const HAA_CONFIG_IDENTIFIER: HapType =
        HapType::from_uuid(uuid::Uuid::from_u128(0xF0000101_0218_2017_81BF_AF2B7C833922));
}
