use crate::error::Error;
use crate::hap::characteristic::Characteristic;
use crate::hap::emulator_event::EmulatorEvent;
use rand::Rng;
use std::ops::RangeInclusive;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

/// Whole degrees Celsius reported by the sampler.
pub const TEMPERATURE_RANGE: RangeInclusive<i32> = 18..=26;

/// Stores a fresh random reading in `current` and returns it.
pub fn sample(current: &Characteristic) -> Result<f64, Error> {
    let celsius = f64::from(rand::thread_rng().gen_range(TEMPERATURE_RANGE));
    current.set_value(celsius)?;
    Ok(celsius)
}

/// Samples a new temperature after every `interval` until `token` is cancelled.
pub async fn sample_loop(
    current: Arc<Characteristic>,
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
        match sample(&current) {
            Ok(celsius) => {
                log::info!("Temperature is {celsius}");
                let _ = events.send(EmulatorEvent::TemperatureUpdate { celsius });
            }
            Err(err) => log::error!("Failed to update temperature: {err}"),
        }
    }
    log::debug!("Sampler stopped");
}
