use crate::error::{Error, ErrorType};
use crate::hap::characteristic::{Characteristic, Origin};
use crate::hap::emulator_event::EmulatorEvent;
use crate::hap::properties::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Flips a boolean characteristic and returns the new state.
pub fn toggle(on: &Characteristic) -> Result<bool, Error> {
    let next = on.update(|current| Value::Bool(!current.as_bool().unwrap_or(false)))?;
    next.as_bool()
        .ok_or_else(|| Error::from_type(ErrorType::FormatMismatch))
}

/// Flips `on` after every `interval` until `token` is cancelled.
pub async fn toggle_loop(
    on: Arc<Characteristic>,
    interval: Duration,
    events: UnboundedSender<EmulatorEvent>,
    token: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
        match toggle(&on) {
            Ok(state) => {
                log::info!("Switch is {}", if state { "on" } else { "off" });
                let _ = events.send(EmulatorEvent::SwitchUpdate {
                    on: state,
                    origin: Origin::Local,
                });
            }
            Err(err) => log::error!("Failed to toggle switch: {err}"),
        }
    }
    log::debug!("Toggler stopped");
}
