use super::characteristic::Origin;
use crate::lifecycle::LifecycleState;

/// Informational events reported to the operator.
#[derive(Debug, Clone, PartialEq)]
pub enum EmulatorEvent {
    StateUpdate {
        state: LifecycleState,
    },
    /// The switch changed, either remotely or through the periodic toggle.
    SwitchUpdate {
        on: bool,
        origin: Origin,
    },
    /// A new reading from the temperature sampler.
    TemperatureUpdate {
        celsius: f64,
    },
    ConfigIdentifierUpdate {
        identifier: String,
    },
    Identify,
}
