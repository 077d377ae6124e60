use crate::gpio::{Gpio, GpioResult, PinMode, Pull};
use std::sync::{Arc, Mutex};

/// What the lamp indicator shows in the window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LampState {
    #[default]
    Dark,
    Photo,
    Error,
}

/// Read side of the lamp state, shared with the window while a session runs.
#[derive(Debug, Clone, Default)]
pub struct LampIndicator(Arc<Mutex<LampState>>);

impl LampIndicator {
    pub fn get(&self) -> LampState {
        self.0.lock().map(|s| *s).unwrap_or(LampState::Error)
    }

    fn set(&self, state: LampState) {
        if let Ok(mut s) = self.0.lock() {
            *s = state;
        }
    }
}

/// Status LED lit while a shot is being taken.
#[derive(Debug)]
pub struct StatusLamp {
    pin: u32,
    indicator: LampIndicator,
}

impl StatusLamp {
    pub fn init(gpio: &mut dyn Gpio, pin: u32) -> GpioResult<Self> {
        let mut lamp = Self {
            pin,
            indicator: LampIndicator::default(),
        };

        let setup = gpio
            .set_mode(pin, PinMode::Output)
            .and_then(|_| gpio.set_pull_up_down(pin, Pull::Up));
        if let Err(e) = setup {
            log::error!("Unable to initialize GPIO{} as output: {}", pin, e);
            lamp.indicator.set(LampState::Error);
            return Err(e);
        }

        lamp.switch_off(gpio)?;
        Ok(lamp)
    }

    pub fn pin(&self) -> u32 {
        self.pin
    }

    pub fn state(&self) -> LampState {
        self.indicator.get()
    }

    pub fn indicator(&self) -> LampIndicator {
        self.indicator.clone()
    }

    pub fn switch_on(&mut self, gpio: &mut dyn Gpio) -> GpioResult<()> {
        self.set(gpio, true, LampState::Photo)
    }

    pub fn switch_off(&mut self, gpio: &mut dyn Gpio) -> GpioResult<()> {
        self.set(gpio, false, LampState::Dark)
    }

    fn set(&mut self, gpio: &mut dyn Gpio, level: bool, next: LampState) -> GpioResult<()> {
        match gpio.write(self.pin, level) {
            Ok(()) => {
                self.indicator.set(next);
                Ok(())
            }
            Err(e) => {
                log::error!(
                    "Unable to set GPIO{} {}: {}",
                    self.pin,
                    if level { "On" } else { "Off" },
                    e
                );
                self.indicator.set(LampState::Error);
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpio::mock::RecordingGpio;

    #[test]
    fn init_configures_pin_and_turns_off() {
        let mut gpio = RecordingGpio::default();
        let lamp = StatusLamp::init(&mut gpio, 23).unwrap();

        assert_eq!(lamp.state(), LampState::Dark);
        assert_eq!(
            gpio.events(),
            vec!["mode 23 Output", "pud 23 Up", "write 23 0"]
        );
    }

    #[test]
    fn switching_tracks_state() {
        let mut gpio = RecordingGpio::default();
        let mut lamp = StatusLamp::init(&mut gpio, 23).unwrap();

        assert_eq!(lamp.pin(), 23);
        let indicator = lamp.indicator();
        lamp.switch_on(&mut gpio).unwrap();
        assert_eq!(indicator.get(), LampState::Photo);
        lamp.switch_off(&mut gpio).unwrap();
        assert_eq!(lamp.state(), LampState::Dark);
    }

    #[test]
    fn failed_write_marks_error() {
        let mut gpio = RecordingGpio::default();
        let mut lamp = StatusLamp::init(&mut gpio, 23).unwrap();

        gpio.fail_on = Some(("write 23 1".to_string(), -41));
        assert!(lamp.switch_on(&mut gpio).is_err());
        assert_eq!(lamp.state(), LampState::Error);
    }

    #[test]
    fn failed_mode_aborts_init() {
        let mut gpio = RecordingGpio {
            fail_on: Some(("mode 99 Output".to_string(), -3)),
            ..Default::default()
        };
        assert!(StatusLamp::init(&mut gpio, 99).is_err());
        assert_eq!(gpio.events(), vec!["mode 99 Output"]);
    }
}
