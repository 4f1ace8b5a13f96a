//! The protocol server the accessory is handed to.
//!
//! [`AccessoryServer`] is the interface the lifecycle controller consumes:
//! register an accessory against a durable store, then serve until the
//! lifetime token is cancelled. [`HttpServer`] implements it over the
//! unencrypted HAP-IP JSON attribute surface. Pairing, session encryption and
//! service advertisement are not handled here.

pub mod database;
mod http;

pub use self::database::{AttributeDatabase, AID};
pub use self::http::{HapStatus, HttpServer, ServerConfig};

use crate::{error::Error, hap::accessory::Accessory, store::Store};
use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) const DEVICE_ID_KEY: &str = "uuid";
pub(crate) const CONFIGURATION_NUMBER_KEY: &str = "configuration-number";
pub(crate) const SNAPSHOT_KEY: &str = "accessories.json";

#[async_trait]
pub trait AccessoryServer: Send + Sized {
    type Config: Send;

    /// Takes ownership of the assembled accessory. Any error is fatal.
    async fn register(
        store: Arc<dyn Store>,
        accessory: Accessory,
        config: Self::Config,
    ) -> Result<Self, Error>;

    /// Serves until `token` is cancelled, letting in-flight exchanges finish.
    async fn serve(self, token: CancellationToken) -> Result<(), Error>;
}

/// State persisted for a registered accessory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub device_id: String,
    pub configuration_number: u64,
}

/// Loads or creates the device id, and bumps the configuration number when
/// the accessory structure differs from the previous run.
pub(crate) async fn load_registration(
    store: &dyn Store,
    db: &AttributeDatabase,
) -> Result<Registration, Error> {
    let device_id = match store.get(DEVICE_ID_KEY).await? {
        Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
        None => {
            let id = uuid::Uuid::new_v4().to_string();
            store.set(DEVICE_ID_KEY, id.as_bytes()).await?;
            log::debug!("Generated device id {id}");
            id
        }
    };

    let stored_number = store
        .get(CONFIGURATION_NUMBER_KEY)
        .await?
        .and_then(|bytes| String::from_utf8_lossy(&bytes).trim().parse::<u64>().ok());
    let snapshot = serde_json::to_vec(&db.to_json(false))?;
    let unchanged = store.get(SNAPSHOT_KEY).await?.as_deref() == Some(snapshot.as_slice());

    let configuration_number = match stored_number {
        Some(number) if unchanged => number,
        Some(number) => number.wrapping_add(1).max(1),
        None => 1,
    };
    if !unchanged || stored_number != Some(configuration_number) {
        store.set(SNAPSHOT_KEY, &snapshot).await?;
        store
            .set(
                CONFIGURATION_NUMBER_KEY,
                configuration_number.to_string().as_bytes(),
            )
            .await?;
    }

    Ok(Registration {
        device_id,
        configuration_number,
    })
}
