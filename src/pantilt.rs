use crate::constants::servo;
use crate::gpio::{Gpio, GpioError};
use thiserror::Error;

#[derive(Error, Debug)]
#[error("{axis}: {step}: {source}")]
pub struct AimError {
    pub axis: &'static str,
    pub step: &'static str,
    #[source]
    pub source: GpioError,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ServoCalibration {
    pub pwm_frequency: u32,
    pub pulse_at_minus_90: f64,
    pub pulse_at_plus_90: f64,
}

impl Default for ServoCalibration {
    fn default() -> Self {
        Self {
            pwm_frequency: servo::PWM_FREQUENCY,
            pulse_at_minus_90: servo::PULSE_AT_MINUS_90,
            pulse_at_plus_90: servo::PULSE_AT_PLUS_90,
        }
    }
}

impl ServoCalibration {
    /// Pulse width in microseconds for an angle in degrees, clamped to -90..90.
    pub fn pulse_width(&self, angle: f64) -> u32 {
        let angle = if angle.is_nan() { 0.0 } else { angle.clamp(-90.0, 90.0) };
        let span = self.pulse_at_plus_90 - self.pulse_at_minus_90;
        (self.pulse_at_minus_90 + span / 180.0 * (angle + 90.0)).round() as u32
    }
}

/// Two-axis servo mount holding the camera.
#[derive(Debug, Clone)]
pub struct PanTilt {
    pan_pin: u32,
    tilt_pin: u32,
    calibration: ServoCalibration,
    position: Option<(f64, f64)>,
}

impl PanTilt {
    pub fn new(pan_pin: u32, tilt_pin: u32, calibration: ServoCalibration) -> Self {
        Self {
            pan_pin,
            tilt_pin,
            calibration,
            position: None,
        }
    }

    /// Last angles successfully sent to the servos.
    pub fn position(&self) -> Option<(f64, f64)> {
        self.position
    }

    pub fn aim(&mut self, gpio: &mut dyn Gpio, pan: f64, tilt: f64) -> Result<(), AimError> {
        self.move_axis(gpio, "Pan", self.pan_pin, pan)?;
        self.move_axis(gpio, "Tilt", self.tilt_pin, tilt)?;
        self.position = Some((pan, tilt));
        log::info!("Camera aimed at pan {:.1}°, tilt {:.1}°", pan, tilt);
        Ok(())
    }

    fn move_axis(
        &self,
        gpio: &mut dyn Gpio,
        axis: &'static str,
        pin: u32,
        angle: f64,
    ) -> Result<(), AimError> {
        let fail = |step, source| AimError { axis, step, source };

        gpio.set_pwm_frequency(pin, self.calibration.pwm_frequency)
            .map_err(|e| fail("cannot set PWM frequency", e))?;

        let pulse_width = self.calibration.pulse_width(angle);
        log::debug!("{} GPIO{}: {:.1}° -> {} us", axis, pin, angle, pulse_width);
        gpio.set_servo_pulsewidth(pin, pulse_width)
            .map_err(|e| fail("cannot start servo PWM", e))?;

        match gpio.set_pwm_frequency(pin, 0) {
            Err(e @ (GpioError::BadUserGpio | GpioError::NotPermitted)) => {
                Err(fail("cannot release PWM", e))
            }
            Err(e) => {
                log::debug!("{} GPIO{}: ignoring PWM release result: {}", axis, pin, e);
                Ok(())
            }
            Ok(_) => Ok(()),
        }
    }
}
