use super::properties::{Format, Permission, Value};
use crate::error::{Error, ErrorType};
use crate::uuid::HapType;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tokio::sync::broadcast;

const NOTIFY_CAPACITY: usize = 16;

pub type RemoteUpdateHandler = Box<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    Local,
    Remote,
}

/// Published to subscribers after every value change.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueChange {
    pub kind: HapType,
    pub value: Value,
    pub origin: Origin,
}

/// A single typed, permissioned value slot.
///
/// Each characteristic synchronizes on its own. Every mutation stores the value
/// and publishes its notification under the value lock, so the order of
/// notifications is the order of writes and the last notification always
/// matches [`Characteristic::value`]. Remote writes are additionally
/// serialized with the invocation of the remote update handler. There is no
/// lock spanning a service or accessory.
pub struct Characteristic {
    kind: HapType,
    format: Format,
    permissions: Vec<Permission>,
    description: String,
    value: RwLock<Value>,
    // Held across a remote write and its handler call, never by local writes.
    handler: Mutex<Option<RemoteUpdateHandler>>,
    notifier: broadcast::Sender<ValueChange>,
    owned: AtomicBool,
}

impl Characteristic {
    /// Creates a characteristic whose format is fixed by `initial`.
    pub fn new<V: Into<Value>>(
        kind: HapType,
        initial: V,
        permissions: &[Permission],
        description: &str,
    ) -> Result<Arc<Characteristic>, Error> {
        let initial = initial.into();
        initial.check_supported()?;
        let (notifier, _) = broadcast::channel(NOTIFY_CAPACITY);
        let mut perms: Vec<Permission> = Vec::with_capacity(permissions.len());
        for permission in permissions {
            if !perms.contains(permission) {
                perms.push(*permission);
            }
        }
        Ok(Arc::new(Characteristic {
            kind,
            format: initial.format(),
            permissions: perms,
            description: description.to_string(),
            value: RwLock::new(initial),
            handler: Mutex::new(None),
            notifier,
            owned: AtomicBool::new(false),
        }))
    }

    pub fn kind(&self) -> HapType {
        self.kind
    }

    pub fn format(&self) -> Format {
        self.format
    }

    pub fn permissions(&self) -> &[Permission] {
        &self.permissions
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn value(&self) -> Value {
        self.value
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Local mutation. Subscribers are notified even when the value is unchanged.
    pub fn set_value<V: Into<Value>>(&self, value: V) -> Result<(), Error> {
        let value = value.into();
        self.check_value(&value)?;
        self.store(value, Origin::Local);
        Ok(())
    }

    /// Atomic read-modify-write as a local mutation. Returns the stored value.
    pub fn update<F>(&self, f: F) -> Result<Value, Error>
    where
        F: FnOnce(&Value) -> Value,
    {
        let mut current = self.value.write().unwrap_or_else(PoisonError::into_inner);
        let value = f(&current);
        self.check_value(&value)?;
        *current = value.clone();
        self.publish(value.clone(), Origin::Local);
        Ok(value)
    }

    /// Registers the handler invoked after every remote write.
    ///
    /// Only one handler may be registered, and only on writable characteristics.
    /// The handler may read the value or change it with
    /// [`Characteristic::set_value`]. It must not call
    /// [`Characteristic::remote_write`] on the same characteristic: remote
    /// writes are serialized with handler calls, so that would never return.
    pub fn on_remote_update<F>(&self, handler: F) -> Result<(), Error>
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        if !self.has_permission(Permission::Write) {
            return Err(Error::from_string(
                format!("characteristic {} is not writable", self.kind),
                ErrorType::PermissionDenied,
            ));
        }
        let mut slot = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return Err(Error::from_string(
                format!("characteristic {} already has a remote update handler", self.kind),
                ErrorType::HandlerAlreadyRegistered,
            ));
        }
        *slot = Some(Box::new(handler));
        Ok(())
    }

    pub fn on_bool_update<F>(&self, handler: F) -> Result<(), Error>
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.expect_format(Format::Bool)?;
        self.on_remote_update(move |value| {
            if let Some(b) = value.as_bool() {
                handler(b)
            }
        })
    }

    pub fn on_string_update<F>(&self, handler: F) -> Result<(), Error>
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.expect_format(Format::String)?;
        self.on_remote_update(move |value| {
            if let Some(s) = value.as_str() {
                handler(s)
            }
        })
    }

    /// Entry point for writes arriving through the protocol server.
    ///
    /// The value is stored and subscribers are notified before the handler
    /// runs, so the handler observes the written value and any local change it
    /// makes is announced after the remote one.
    pub fn remote_write(&self, value: Value) -> Result<(), Error> {
        if !self.has_permission(Permission::Write) {
            return Err(Error::from_string(
                format!("characteristic {} is read-only", self.kind),
                ErrorType::PermissionDenied,
            ));
        }
        self.check_value(&value)?;

        let handler = self.handler.lock().unwrap_or_else(PoisonError::into_inner);
        self.store(value.clone(), Origin::Remote);
        if let Some(handler) = handler.as_ref() {
            handler(&value);
        }
        Ok(())
    }

    pub fn remote_write_json(&self, value: &serde_json::Value) -> Result<(), Error> {
        let value = Value::from_json(self.format, value)?;
        self.remote_write(value)
    }

    /// Entry point for reads arriving through the protocol server.
    pub fn remote_read(&self) -> Result<Value, Error> {
        if !self.has_permission(Permission::Read) {
            return Err(Error::from_string(
                format!("characteristic {} is write-only", self.kind),
                ErrorType::PermissionDenied,
            ));
        }
        Ok(self.value())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ValueChange> {
        self.notifier.subscribe()
    }

    /// Marks the characteristic as owned by a service. Fails if it already is.
    pub(crate) fn claim(&self) -> Result<(), Error> {
        self.owned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| {
                Error::from_string(
                    format!("characteristic {} already belongs to a service", self.kind),
                    ErrorType::AlreadyOwned,
                )
            })
    }

    fn check_value(&self, value: &Value) -> Result<(), Error> {
        if value.format() != self.format {
            return Err(Error::from_string(
                format!(
                    "characteristic {} holds {} values, got {}",
                    self.kind,
                    self.format,
                    value.format()
                ),
                ErrorType::FormatMismatch,
            ));
        }
        value.check_supported()
    }

    fn expect_format(&self, format: Format) -> Result<(), Error> {
        if self.format != format {
            return Err(Error::from_string(
                format!("characteristic {} holds {} values", self.kind, self.format),
                ErrorType::FormatMismatch,
            ));
        }
        Ok(())
    }

    fn store(&self, value: Value, origin: Origin) {
        let mut current = self.value.write().unwrap_or_else(PoisonError::into_inner);
        *current = value.clone();
        self.publish(value, origin);
    }

    // Callers hold the value write lock.
    fn publish(&self, value: Value, origin: Origin) {
        // No subscribers is not an error.
        let _ = self.notifier.send(ValueChange {
            kind: self.kind,
            value,
            origin,
        });
    }
}

impl fmt::Debug for Characteristic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Characteristic")
            .field("kind", &self.kind)
            .field("format", &self.format)
            .field("permissions", &self.permissions)
            .field("description", &self.description)
            .field("value", &self.value())
            .finish()
    }
}
