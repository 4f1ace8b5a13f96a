//! Process lifetime around the protocol server.
//!
//! ```text
//! Idle -> Assembling -> Serving -> ShuttingDown -> Stopped
//!              \______________________________________^   (fatal startup error)
//! ```
//!
//! Assembly builds the accessory tree for the configured [`Profile`] and
//! registers handlers. Serving runs the server and the profile's periodic task
//! (switch toggler or temperature sampler) side by side until the lifetime
//! token is cancelled, normally by the first termination signal. A controller
//! runs once.

mod sampler;
mod signals;
mod toggler;

pub use self::sampler::{sample, sample_loop, TEMPERATURE_RANGE};
pub use self::signals::listen_for_shutdown;
pub use self::toggler::{toggle, toggle_loop};

use crate::error::{Error, ErrorType};
use crate::hap::accessory::{Accessory, AccessoryInfo};
use crate::hap::characteristic::{Characteristic, Origin};
use crate::hap::emulator_event::EmulatorEvent;
use crate::server::AccessoryServer;
use crate::services::{ConfigService, SwitchService, TemperatureSensorService};
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc::UnboundedSender, watch};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_TOGGLE_INTERVAL: Duration = Duration::from_secs(20);
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Assembling,
    Serving,
    ShuttingDown,
    Stopped,
}

impl LifecycleState {
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;
        matches!(
            (self, next),
            (Idle, Assembling)
                | (Assembling, Serving)
                | (Assembling, Stopped)
                | (Serving, ShuttingDown)
                | (ShuttingDown, Stopped)
        )
    }
}

/// The kind of device being emulated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// On/off switch, flipped periodically.
    #[default]
    Switch,
    /// Temperature sensor reporting a random reading periodically.
    TemperatureSensor,
}

impl Profile {
    pub fn default_name(self) -> &'static str {
        match self {
            Profile::Switch => "HAA-Emulator-Switch",
            Profile::TemperatureSensor => "HAA Simulator",
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmulatorConfig {
    pub info: AccessoryInfo,
    pub profile: Profile,
    pub toggle_interval: Duration,
    pub sample_interval: Duration,
}

impl EmulatorConfig {
    /// Default configuration for `profile`, named after it.
    pub fn for_profile(profile: Profile) -> Self {
        EmulatorConfig {
            info: AccessoryInfo {
                name: profile.default_name().to_string(),
                ..Default::default()
            },
            profile,
            toggle_interval: DEFAULT_TOGGLE_INTERVAL,
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
        }
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        EmulatorConfig::for_profile(Profile::default())
    }
}

/// The characteristic the emulator changes on its own while serving.
#[derive(Debug, Clone)]
pub enum Driven {
    Switch(Arc<Characteristic>),
    Temperature(Arc<Characteristic>),
}

/// The assembled accessory plus handles to the characteristics driven locally.
#[derive(Debug)]
pub struct Assembly {
    pub accessory: Accessory,
    pub driven: Driven,
    pub identifier: Arc<Characteristic>,
}

pub struct Controller {
    config: EmulatorConfig,
    events: UnboundedSender<EmulatorEvent>,
    state: watch::Sender<LifecycleState>,
}

impl Controller {
    pub fn new(config: EmulatorConfig, events: UnboundedSender<EmulatorEvent>) -> Self {
        let (state, _) = watch::channel(LifecycleState::Idle);
        Controller {
            config,
            events,
            state,
        }
    }

    pub fn state(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    fn transition(&self, next: LifecycleState) -> bool {
        let changed = self.state.send_if_modified(|current| {
            if current.can_transition_to(next) {
                *current = next;
                true
            } else {
                if *current != next {
                    log::debug!("Ignoring lifecycle transition {current:?} -> {next:?}");
                }
                false
            }
        });
        if changed {
            log::debug!("Lifecycle state {next:?}");
            let _ = self.events.send(EmulatorEvent::StateUpdate { state: next });
        }
        changed
    }

    /// Builds the accessory tree and registers the remote update handlers.
    pub fn assemble(&self) -> Result<Assembly, Error> {
        let mut accessory = Accessory::new(self.config.info.clone())?;

        let driven = match self.config.profile {
            Profile::Switch => {
                let switch = SwitchService::new()?;
                let on = switch.on().clone();
                accessory.add_service(switch);

                let events = self.events.clone();
                on.on_bool_update(move |state| {
                    log::info!("Client changed switch to {}", if state { "on" } else { "off" });
                    let _ = events.send(EmulatorEvent::SwitchUpdate {
                        on: state,
                        origin: Origin::Remote,
                    });
                })?;
                Driven::Switch(on)
            }
            Profile::TemperatureSensor => {
                let sensor = TemperatureSensorService::new()?;
                let current = sensor.current_temperature().clone();
                accessory.add_service(sensor);
                Driven::Temperature(current)
            }
        };

        let config = ConfigService::new(self.events.clone())?;
        let identifier = config.identifier().clone();
        accessory.add_service(config);

        let events = self.events.clone();
        accessory.identify().on_bool_update(move |_| {
            log::info!("Identify requested");
            let _ = events.send(EmulatorEvent::Identify);
        })?;

        Ok(Assembly {
            accessory,
            driven,
            identifier,
        })
    }

    /// Assembles, registers and serves until `token` is cancelled.
    ///
    /// Assembly and registration errors are returned without retry. A
    /// controller that already left `Idle` refuses to run again.
    pub async fn run<S: AccessoryServer>(
        &self,
        store: Arc<dyn Store>,
        server_config: S::Config,
        token: CancellationToken,
    ) -> Result<(), Error> {
        if !self.transition(LifecycleState::Assembling) {
            return Err(Error::from_string(
                format!("controller cannot start from {:?}", *self.state.borrow()),
                ErrorType::InvalidState,
            ));
        }
        log::info!(
            "Starting emulator {:?} ({:?}) with firmware version {}",
            self.config.info.name,
            self.config.profile,
            self.config.info.firmware
        );

        let server = match self.assemble() {
            Ok(assembly) => {
                let driven = assembly.driven;
                S::register(store, assembly.accessory, server_config)
                    .await
                    .map(|server| (server, driven))
            }
            Err(err) => Err(err),
        };
        let (server, driven) = match server {
            Ok(started) => started,
            Err(err) => {
                log::error!("Startup failed: {err}");
                self.transition(LifecycleState::Stopped);
                return Err(err);
            }
        };
        self.transition(LifecycleState::Serving);

        let periodic = match driven {
            Driven::Switch(on) => tokio::spawn(toggle_loop(
                on,
                self.config.toggle_interval,
                self.events.clone(),
                token.clone(),
            )),
            Driven::Temperature(current) => tokio::spawn(sample_loop(
                current,
                self.config.sample_interval,
                self.events.clone(),
                token.clone(),
            )),
        };

        let serve = server.serve(token.clone());
        tokio::pin!(serve);
        let result = tokio::select! {
            result = &mut serve => result,
            _ = token.cancelled() => {
                self.transition(LifecycleState::ShuttingDown);
                serve.await
            }
        };
        // The serve loop may also end on its own after a fatal error.
        self.transition(LifecycleState::ShuttingDown);
        token.cancel();

        if let Err(err) = periodic.await {
            log::error!("Periodic task failed: {err}");
        }
        self.transition(LifecycleState::Stopped);
        result
    }

    /// Like [`Controller::run`], with the token cancelled by SIGINT or SIGTERM.
    pub async fn run_until_signal<S: AccessoryServer>(
        &self,
        store: Arc<dyn Store>,
        server_config: S::Config,
    ) -> Result<(), Error> {
        let token = CancellationToken::new();
        let listener = tokio::spawn(listen_for_shutdown(token.clone()));
        let result = self.run::<S>(store, server_config, token.clone()).await;
        token.cancel();
        let _ = listener.await;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorType;
    use crate::hap::properties::Value;
    use crate::server::{AttributeDatabase, AID};
    use crate::store::MemStore;
    use crate::uuid::{characteristic, service};
    use async_trait::async_trait;
    use tokio::sync::{mpsc, oneshot};

    /// Hands the registered database back to the test, then idles until cancelled.
    struct LoopbackServer;

    #[async_trait]
    impl AccessoryServer for LoopbackServer {
        type Config = oneshot::Sender<Arc<AttributeDatabase>>;

        async fn register(
            _store: Arc<dyn Store>,
            accessory: Accessory,
            config: Self::Config,
        ) -> Result<Self, Error> {
            let _ = config.send(Arc::new(AttributeDatabase::new(accessory)));
            Ok(LoopbackServer)
        }

        async fn serve(self, token: CancellationToken) -> Result<(), Error> {
            token.cancelled().await;
            Ok(())
        }
    }

    struct BrokenStoreServer;

    #[async_trait]
    impl AccessoryServer for BrokenStoreServer {
        type Config = ();

        async fn register(
            _store: Arc<dyn Store>,
            _accessory: Accessory,
            _config: (),
        ) -> Result<Self, Error> {
            Err(Error::from_string(
                "store is read-only".to_string(),
                ErrorType::Storage,
            ))
        }

        async fn serve(self, _token: CancellationToken) -> Result<(), Error> {
            Ok(())
        }
    }

    async fn next_device_event(rx: &mut mpsc::UnboundedReceiver<EmulatorEvent>) -> EmulatorEvent {
        loop {
            match rx.recv().await {
                Some(EmulatorEvent::StateUpdate { .. }) => continue,
                Some(event) => return event,
                None => panic!("event channel closed"),
            }
        }
    }

    #[test]
    fn transitions_follow_the_state_machine() {
        use LifecycleState::*;
        assert!(Idle.can_transition_to(Assembling));
        assert!(Assembling.can_transition_to(Stopped));
        assert!(!Idle.can_transition_to(Serving));
        assert!(!Stopped.can_transition_to(Serving));
        assert!(!ShuttingDown.can_transition_to(Serving));
    }

    #[test]
    fn assembly_wires_switch_and_configuration() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Controller::new(EmulatorConfig::default(), tx);
        let assembly = controller.assemble().unwrap();
        assert_eq!(assembly.accessory.services().len(), 3);
        let Driven::Switch(on) = assembly.driven else {
            panic!("switch profile drives the switch");
        };

        on.remote_write(Value::Bool(true)).unwrap();
        assert_eq!(
            rx.try_recv().unwrap(),
            EmulatorEvent::SwitchUpdate {
                on: true,
                origin: Origin::Remote
            }
        );
        assert!(on.on_remote_update(|_| {}).is_err());
    }

    #[test]
    fn temperature_profile_replaces_the_switch() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = EmulatorConfig::for_profile(Profile::TemperatureSensor);
        assert_eq!(config.info.name, "HAA Simulator");
        let controller = Controller::new(config, tx);
        let assembly = controller.assemble().unwrap();

        let kinds: Vec<_> = assembly.accessory.services().iter().map(|s| s.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                service::ACCESSORY_INFORMATION,
                service::TEMPERATURE_SENSOR,
                service::HAA_CONFIG
            ]
        );
        assert!(matches!(assembly.driven, Driven::Temperature(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn temperature_profile_samples_while_serving() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Controller::new(
            EmulatorConfig::for_profile(Profile::TemperatureSensor),
            tx,
        ));
        let (db_tx, db_rx) = oneshot::channel();
        let token = CancellationToken::new();

        let running = {
            let controller = controller.clone();
            let token = token.clone();
            tokio::spawn(async move {
                controller
                    .run::<LoopbackServer>(Arc::new(MemStore::new()), db_tx, token)
                    .await
            })
        };

        let db = db_rx.await.unwrap();
        let current = db.characteristic(AID, 9).unwrap();
        assert_eq!(current.kind(), characteristic::CURRENT_TEMPERATURE);

        let EmulatorEvent::TemperatureUpdate { celsius } = next_device_event(&mut rx).await
        else {
            panic!("expected a temperature reading");
        };
        assert!(TEMPERATURE_RANGE.contains(&(celsius as i32)));
        assert_eq!(current.value(), Value::Float(celsius));

        db.characteristic(AID, 11)
            .unwrap()
            .remote_write_json(&serde_json::json!("ABC123"))
            .unwrap();
        loop {
            match next_device_event(&mut rx).await {
                EmulatorEvent::TemperatureUpdate { .. } => continue,
                event => {
                    assert_eq!(
                        event,
                        EmulatorEvent::ConfigIdentifierUpdate {
                            identifier: "ABC123".to_string()
                        }
                    );
                    break;
                }
            }
        }

        token.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(*controller.state().borrow(), LifecycleState::Stopped);
    }

    #[tokio::test]
    async fn a_stopped_controller_does_not_run_again() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Controller::new(EmulatorConfig::default(), tx);
        let token = CancellationToken::new();
        token.cancel();
        let (db_tx, _db_rx) = oneshot::channel();
        controller
            .run::<LoopbackServer>(Arc::new(MemStore::new()), db_tx, token.clone())
            .await
            .unwrap();
        assert_eq!(*controller.state().borrow(), LifecycleState::Stopped);
        while rx.try_recv().is_ok() {}

        let (db_tx, db_rx) = oneshot::channel();
        let err = controller
            .run::<LoopbackServer>(Arc::new(MemStore::new()), db_tx, token)
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::InvalidState);
        assert_eq!(*controller.state().borrow(), LifecycleState::Stopped);
        // Nothing was assembled or registered.
        assert!(db_rx.await.is_err());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn serves_remote_writes_toggles_and_stops() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Arc::new(Controller::new(EmulatorConfig::default(), tx));
        let mut state = controller.state();
        let (db_tx, db_rx) = oneshot::channel();
        let token = CancellationToken::new();

        let running = {
            let controller = controller.clone();
            let token = token.clone();
            tokio::spawn(async move {
                controller
                    .run::<LoopbackServer>(Arc::new(MemStore::new()), db_tx, token)
                    .await
            })
        };

        let db = db_rx.await.unwrap();
        state
            .wait_for(|s| *s == LifecycleState::Serving)
            .await
            .unwrap();

        let identifier = db.characteristic(AID, 11).unwrap();
        identifier
            .remote_write_json(&serde_json::json!("ABC123"))
            .unwrap();
        assert_eq!(
            next_device_event(&mut rx).await,
            EmulatorEvent::ConfigIdentifierUpdate {
                identifier: "ABC123".to_string()
            }
        );
        assert_eq!(identifier.value(), Value::from("ABC123"));

        let on = db.characteristic(AID, 9).unwrap();
        on.remote_write(Value::Bool(true)).unwrap();
        assert_eq!(
            next_device_event(&mut rx).await,
            EmulatorEvent::SwitchUpdate {
                on: true,
                origin: Origin::Remote
            }
        );

        // One interval later the toggler turns it back off.
        assert_eq!(
            next_device_event(&mut rx).await,
            EmulatorEvent::SwitchUpdate {
                on: false,
                origin: Origin::Local
            }
        );
        assert_eq!(on.value(), Value::Bool(false));

        token.cancel();
        running.await.unwrap().unwrap();
        assert_eq!(*state.borrow(), LifecycleState::Stopped);
        assert_eq!(on.value(), Value::Bool(false));
    }

    #[tokio::test]
    async fn registration_failure_is_fatal() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = Controller::new(EmulatorConfig::default(), tx);
        let err = controller
            .run::<BrokenStoreServer>(Arc::new(MemStore::new()), (), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::Storage);
        assert_eq!(*controller.state().borrow(), LifecycleState::Stopped);

        let mut states = Vec::new();
        while let Ok(event) = rx.try_recv() {
            if let EmulatorEvent::StateUpdate { state } = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![LifecycleState::Assembling, LifecycleState::Stopped]
        );
    }

    #[tokio::test]
    async fn assembly_failure_is_fatal() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let config = EmulatorConfig {
            info: AccessoryInfo {
                model: "m".repeat(65),
                ..Default::default()
            },
            ..Default::default()
        };
        let controller = Controller::new(config, tx);
        let err = controller
            .run::<BrokenStoreServer>(Arc::new(MemStore::new()), (), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), ErrorType::UnsupportedValue);
        assert_eq!(*controller.state().borrow(), LifecycleState::Stopped);
    }
}
