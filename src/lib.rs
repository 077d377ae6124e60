pub mod constants;
pub mod gpio;
pub mod gui;
pub mod lamp;
pub mod logging;
pub mod pantilt;
pub mod preview;
pub mod recorder;
pub mod session;
pub mod settings;

use anyhow::{Context, Result};
use gpio::{Gpio, LocalGpio, NullGpio, PigpioClient};
use lamp::{LampIndicator, StatusLamp};
use pantilt::{PanTilt, ServoCalibration};
use recorder::{ImageRecorder, RecorderCommand};
use session::{CaptureSession, SessionReport, SessionStatus};
use settings::{GpioBackend, Settings};
use std::sync::{Arc, Mutex};

/// The camera rig: GPIO connection, status lamp and pan/tilt mount.
pub struct Rig {
    gpio: Box<dyn Gpio>,
    lamp: StatusLamp,
    mount: PanTilt,
    description: String,
}

impl Rig {
    /// Opens the configured GPIO backend (or runs without GPIO), sets up the lamp and aims the camera.
    pub fn connect(settings: &Settings, use_gpio: bool) -> Result<Self> {
        settings.validate_angles()?;

        if !use_gpio {
            log::warn!("Running without GPIO: lamp and servos are simulated");
            return Self::with_gpio(Box::new(NullGpio), settings, "no GPIO".to_string());
        }

        match settings.gpio_backend {
            GpioBackend::Pigpiod => {
                let client = PigpioClient::connect(&settings.gpio_host, settings.gpio_port)
                    .context("Unable to initialize the GPIO")?;
                let description = format!("pigpiod at {}", client.addr());
                Self::with_gpio(Box::new(client), settings, description)
            }
            GpioBackend::Local => {
                let local = LocalGpio::open().context("Unable to open the local GPIO")?;
                Self::with_gpio(Box::new(local), settings, "local GPIO".to_string())
            }
        }
    }

    pub fn with_gpio(mut gpio: Box<dyn Gpio>, settings: &Settings, description: String) -> Result<Self> {
        settings.validate_angles()?;

        let lamp = StatusLamp::init(gpio.as_mut(), settings.led_pin)
            .with_context(|| format!("Unable to initialize GPIO{} as output", settings.led_pin))?;

        let mut mount = PanTilt::new(settings.pan_pin, settings.tilt_pin, ServoCalibration::default());
        mount.aim(gpio.as_mut(), settings.pan_angle, settings.tilt_angle)?;

        Ok(Self {
            gpio,
            lamp,
            mount,
            description,
        })
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn lamp_indicator(&self) -> LampIndicator {
        self.lamp.indicator()
    }

    pub fn position(&self) -> Option<(f64, f64)> {
        self.mount.position()
    }

    pub fn aim(&mut self, pan: f64, tilt: f64) -> Result<()> {
        settings::check_angle("Pan", pan)?;
        settings::check_angle("Tilt", tilt)?;
        self.mount.aim(self.gpio.as_mut(), pan, tilt)?;
        Ok(())
    }

    pub fn run_session(
        &mut self,
        settings: &Settings,
        should_stop: &Arc<Mutex<bool>>,
        status: &Arc<Mutex<SessionStatus>>,
    ) -> Result<SessionReport> {
        let cmd = RecorderCommand::raspistill(settings);
        self.run_session_with(settings, &cmd, should_stop, status)
    }

    pub fn run_session_with(
        &mut self,
        settings: &Settings,
        cmd: &RecorderCommand,
        should_stop: &Arc<Mutex<bool>>,
        status: &Arc<Mutex<SessionStatus>>,
    ) -> Result<SessionReport> {
        settings.validate()?;
        std::fs::create_dir_all(&settings.base_dir)
            .with_context(|| format!("Cannot create {}", settings.base_dir.display()))?;

        let mut recorder = ImageRecorder::start(cmd)?;
        log::info!(
            "Session started: recorder pid {}, lamp on GPIO{}",
            recorder.pid(),
            self.lamp.pin()
        );
        let session = CaptureSession::from_settings(settings);
        let result = session.run(
            self.gpio.as_mut(),
            &mut self.lamp,
            &mut recorder,
            should_stop,
            status,
        );

        let stopped = recorder.stop();
        let report = result?;
        stopped?;
        Ok(report)
    }
}
