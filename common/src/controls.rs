use std::ops::DerefMut;

use log::{info, warn};

use crate::{
    settings::{ConfigStore, NvMedium},
    timer::{MonotonicTimer, TickSource},
};

pub const FACTORY_RESET_HOLD_MS: u32 = 10_000;
pub const RELEASE_TIMEOUT_MS: u32 = 30_000;

/// Physical buttons, already debounced by the platform.
pub trait ControlInputs {
    fn override_pressed(&mut self) -> bool;
    fn reset_pressed(&mut self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlEvent {
    None,
    Toggled { on: bool, persisted: bool },
    /// Settings were reset at runtime; the platform should reboot.
    FactoryReset { saved: bool },
}

/// Resets immediately when the reset button is already held at power-on.
/// Returns the save result if a reset happened.
pub fn check_power_on_reset<M: NvMedium>(
    inputs: &mut impl ControlInputs,
    store: &mut ConfigStore<M>,
) -> Option<bool> {
    if !inputs.reset_pressed() {
        return None;
    }
    let saved = store.factory_reset();
    info!(
        "power-on factory reset {}",
        if saved { "successful" } else { "failed" }
    );
    Some(saved)
}

/// One pass over the buttons from the main loop. A reset needs the button
/// held for [`FACTORY_RESET_HOLD_MS`]; the override button toggles the
/// output once per press.
///
/// `lock_store` is only called around the settings update itself, never
/// while waiting on a button.
pub fn poll_controls<M, S, G>(
    inputs: &mut impl ControlInputs,
    mut lock_store: impl FnMut() -> G,
    timer: &MonotonicTimer<S>,
    mut idle: impl FnMut(),
) -> ControlEvent
where
    M: NvMedium,
    S: TickSource,
    G: DerefMut<Target = ConfigStore<M>>,
{
    if inputs.reset_pressed() {
        let held = timer.hold_duration(FACTORY_RESET_HOLD_MS, || inputs.reset_pressed(), &mut idle);
        if held >= u64::from(FACTORY_RESET_HOLD_MS) {
            let saved = lock_store().factory_reset();
            warn!(
                "factory reset after {held}ms hold {}",
                if saved { "successful" } else { "failed" }
            );
            return ControlEvent::FactoryReset { saved };
        }
    }

    if !inputs.override_pressed() {
        return ControlEvent::None;
    }

    let (on, persisted) = {
        let mut store = lock_store();
        let on = !store.is_lights_on();
        store.set_lights_on(on);
        (on, store.save())
    };

    if !timer.wait_until(RELEASE_TIMEOUT_MS, || !inputs.override_pressed(), &mut idle) {
        warn!("override button still held after {RELEASE_TIMEOUT_MS}ms");
    }
    ControlEvent::Toggled { on, persisted }
}
