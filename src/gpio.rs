//! Client for the pigpio daemon (pigpiod) socket interface.
//!
//! Each request is four little-endian `u32` words `(cmd, p1, p2, p3)`.
//! The daemon answers with four words, echoing the first three; the last one
//! is the signed result, negative on failure.

use crate::constants::{pigpiod, servo};
use rppal::gpio::{IoPin, Mode, PullUpDown};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;
use thiserror::Error;

mod cmd {
    pub const MODES: u32 = 0;
    pub const PUD: u32 = 2;
    pub const WRITE: u32 = 4;
    pub const PFS: u32 = 7;
    pub const SERVO: u32 = 8;
    pub const HWVER: u32 = 17;
    pub const PIGPV: u32 = 26;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinMode {
    Input = 0,
    Output = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull {
    Off = 0,
    Down = 1,
    Up = 2,
}

#[derive(Error, Debug)]
pub enum GpioError {
    #[error("Cannot reach pigpiod at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("pigpiod I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bad User GPIO")]
    BadUserGpio,

    #[error("Bad GPIO")]
    BadGpio,

    #[error("Bad GPIO mode")]
    BadMode,

    #[error("Bad GPIO level")]
    BadLevel,

    #[error("Bad pull-up/down")]
    BadPud,

    #[error("Bad servo pulse width")]
    BadPulseWidth,

    #[error("Bad PWM duty cycle")]
    BadDutyCycle,

    #[error("GPIO operation not permitted")]
    NotPermitted,

    #[error("pigpiod error code {0}")]
    Code(i32),

    #[error("Local GPIO: {0}")]
    Local(#[from] rppal::gpio::Error),
}

impl GpioError {
    pub fn from_code(code: i32) -> Self {
        match code {
            -2 => GpioError::BadUserGpio,
            -3 => GpioError::BadGpio,
            -4 => GpioError::BadMode,
            -5 => GpioError::BadLevel,
            -6 => GpioError::BadPud,
            -7 => GpioError::BadPulseWidth,
            -8 => GpioError::BadDutyCycle,
            -41 => GpioError::NotPermitted,
            other => GpioError::Code(other),
        }
    }
}

pub type GpioResult<T> = Result<T, GpioError>;

/// The GPIO operations the rig needs from the daemon.
pub trait Gpio: Send {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()>;
    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> GpioResult<()>;
    fn write(&mut self, pin: u32, level: bool) -> GpioResult<()>;
    /// Returns the frequency the daemon actually selected.
    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> GpioResult<u32>;
    fn set_servo_pulsewidth(&mut self, pin: u32, pulse_width: u32) -> GpioResult<()>;
}

pub struct PigpioClient {
    stream: TcpStream,
    addr: String,
}

impl PigpioClient {
    pub fn connect(host: &str, port: u16) -> GpioResult<Self> {
        let addr = format!("{}:{}", host, port);
        let connect_err = |source| GpioError::Connect {
            addr: addr.clone(),
            source,
        };

        let timeout = Duration::from_millis(pigpiod::IO_TIMEOUT_MS);
        let socket_addr = addr
            .to_socket_addrs()
            .map_err(connect_err)?
            .next()
            .ok_or_else(|| {
                connect_err(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "host did not resolve",
                ))
            })?;

        let stream = TcpStream::connect_timeout(&socket_addr, timeout).map_err(connect_err)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        let mut client = Self { stream, addr };

        match (client.version(), client.hardware_revision()) {
            (Ok(version), Ok(revision)) => log::info!(
                "Connected to pigpiod {} at {} (hardware revision {:x})",
                version,
                client.addr,
                revision
            ),
            _ => log::info!("Connected to pigpiod at {}", client.addr),
        }

        Ok(client)
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    pub fn version(&mut self) -> GpioResult<u32> {
        self.command(cmd::PIGPV, 0, 0)
    }

    pub fn hardware_revision(&mut self) -> GpioResult<u32> {
        self.command(cmd::HWVER, 0, 0)
    }

    fn command(&mut self, cmd: u32, p1: u32, p2: u32) -> GpioResult<u32> {
        let mut request = [0u8; 16];
        for (i, word) in [cmd, p1, p2, 0].iter().enumerate() {
            request[i * 4..i * 4 + 4].copy_from_slice(&word.to_le_bytes());
        }
        self.stream.write_all(&request)?;

        let mut response = [0u8; 16];
        self.stream.read_exact(&mut response)?;

        let echoed = u32::from_le_bytes([response[0], response[1], response[2], response[3]]);
        if echoed != cmd {
            log::warn!("pigpiod answered command {} to request {}", echoed, cmd);
        }

        let result = i32::from_le_bytes([response[12], response[13], response[14], response[15]]);
        log::trace!("pigpiod cmd={} p1={} p2={} -> {}", cmd, p1, p2, result);

        if result < 0 {
            Err(GpioError::from_code(result))
        } else {
            Ok(result as u32)
        }
    }
}

impl Gpio for PigpioClient {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        self.command(cmd::MODES, pin, mode as u32).map(|_| ())
    }

    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> GpioResult<()> {
        self.command(cmd::PUD, pin, pull as u32).map(|_| ())
    }

    fn write(&mut self, pin: u32, level: bool) -> GpioResult<()> {
        self.command(cmd::WRITE, pin, level as u32).map(|_| ())
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> GpioResult<u32> {
        self.command(cmd::PFS, pin, frequency)
    }

    fn set_servo_pulsewidth(&mut self, pin: u32, pulse_width: u32) -> GpioResult<()> {
        self.command(cmd::SERVO, pin, pulse_width).map(|_| ())
    }
}

/// Stand-in used when the rig runs without a Raspberry Pi attached.
#[derive(Debug, Default)]
pub struct NullGpio;

impl Gpio for NullGpio {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        log::debug!("[no gpio] GPIO{} mode {:?}", pin, mode);
        Ok(())
    }

    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> GpioResult<()> {
        log::debug!("[no gpio] GPIO{} pull {:?}", pin, pull);
        Ok(())
    }

    fn write(&mut self, pin: u32, level: bool) -> GpioResult<()> {
        log::debug!("[no gpio] GPIO{} <- {}", pin, level as u8);
        Ok(())
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> GpioResult<u32> {
        log::debug!("[no gpio] GPIO{} PWM {} Hz", pin, frequency);
        Ok(frequency)
    }

    fn set_servo_pulsewidth(&mut self, pin: u32, pulse_width: u32) -> GpioResult<()> {
        log::debug!("[no gpio] GPIO{} servo {} us", pin, pulse_width);
        Ok(())
    }
}

/// Drives the header pins in-process through `/dev/gpiomem`, without pigpiod.
///
/// Servo pulses use rppal's software PWM at the frequency last set on the pin.
pub struct LocalGpio {
    chip: rppal::gpio::Gpio,
    pins: HashMap<u32, IoPin>,
    frequencies: HashMap<u32, u32>,
}

impl LocalGpio {
    pub fn open() -> GpioResult<Self> {
        let chip = rppal::gpio::Gpio::new()?;
        log::info!("Using local GPIO");
        Ok(Self {
            chip,
            pins: HashMap::new(),
            frequencies: HashMap::new(),
        })
    }

    fn pin(&mut self, pin: u32) -> GpioResult<&mut IoPin> {
        let bcm = u8::try_from(pin).map_err(|_| GpioError::BadGpio)?;
        match self.pins.entry(pin) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let io = self.chip.get(bcm)?.into_io(Mode::Input);
                Ok(entry.insert(io))
            }
        }
    }
}

/// pigpio accepts 500..=2500 us, or 0 to switch the pulses off.
fn check_pulse_width(pulse_width: u32) -> GpioResult<()> {
    if pulse_width == 0 || (500..=2500).contains(&pulse_width) {
        Ok(())
    } else {
        Err(GpioError::BadPulseWidth)
    }
}

fn pwm_period(frequency: u32) -> Duration {
    let frequency = if frequency == 0 { servo::PWM_FREQUENCY } else { frequency };
    Duration::from_micros(1_000_000 / u64::from(frequency))
}

impl Gpio for LocalGpio {
    fn set_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
        let mode = match mode {
            PinMode::Input => Mode::Input,
            PinMode::Output => Mode::Output,
        };
        self.pin(pin)?.set_mode(mode);
        Ok(())
    }

    fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> GpioResult<()> {
        let pud = match pull {
            Pull::Off => PullUpDown::Off,
            Pull::Down => PullUpDown::PullDown,
            Pull::Up => PullUpDown::PullUp,
        };
        self.pin(pin)?.set_pullupdown(pud);
        Ok(())
    }

    fn write(&mut self, pin: u32, level: bool) -> GpioResult<()> {
        let io = self.pin(pin)?;
        if level {
            io.set_high();
        } else {
            io.set_low();
        }
        Ok(())
    }

    fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> GpioResult<u32> {
        let io = self.pin(pin)?;
        if frequency == 0 {
            io.clear_pwm()?;
        }
        self.frequencies.insert(pin, frequency);
        Ok(frequency)
    }

    fn set_servo_pulsewidth(&mut self, pin: u32, pulse_width: u32) -> GpioResult<()> {
        check_pulse_width(pulse_width)?;
        let period = pwm_period(self.frequencies.get(&pin).copied().unwrap_or(0));

        let io = self.pin(pin)?;
        if pulse_width == 0 {
            io.clear_pwm()?;
            return Ok(());
        }
        io.set_mode(Mode::Output);
        io.set_pwm(period, Duration::from_micros(u64::from(pulse_width)))?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every call into a shared event log; `fail_on` makes one call fail.
    #[derive(Clone, Default)]
    pub struct RecordingGpio {
        pub events: Arc<Mutex<Vec<String>>>,
        pub fail_on: Option<(String, i32)>,
    }

    impl RecordingGpio {
        pub fn with_log(events: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                events,
                fail_on: None,
            }
        }

        fn record(&mut self, event: String) -> GpioResult<()> {
            let failing = matches!(&self.fail_on, Some((name, _)) if *name == event);
            self.events.lock().unwrap().push(event);
            match &self.fail_on {
                Some((_, code)) if failing => Err(GpioError::from_code(*code)),
                _ => Ok(()),
            }
        }

        pub fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    impl Gpio for RecordingGpio {
        fn set_mode(&mut self, pin: u32, mode: PinMode) -> GpioResult<()> {
            self.record(format!("mode {} {:?}", pin, mode))
        }

        fn set_pull_up_down(&mut self, pin: u32, pull: Pull) -> GpioResult<()> {
            self.record(format!("pud {} {:?}", pin, pull))
        }

        fn write(&mut self, pin: u32, level: bool) -> GpioResult<()> {
            self.record(format!("write {} {}", pin, level as u8))
        }

        fn set_pwm_frequency(&mut self, pin: u32, frequency: u32) -> GpioResult<u32> {
            self.record(format!("pfs {} {}", pin, frequency))
                .map(|_| frequency)
        }

        fn set_servo_pulsewidth(&mut self, pin: u32, pulse_width: u32) -> GpioResult<()> {
            self.record(format!("servo {} {}", pin, pulse_width))
        }
    }
}
