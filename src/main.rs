use anyhow::Result;
use clap::Parser;
use crossterm::event::{Event, KeyCode, KeyEvent, poll, read};
use picam_rig::constants::timing;
use picam_rig::recorder::RecorderCommand;
use picam_rig::session::SessionStatus;
use picam_rig::settings::{self, GpioBackend, Settings, SettingsError};
use picam_rig::{Rig, logging};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "picam-rig")]
#[command(about = "Raspberry Pi time-lapse camera rig", long_about = None)]
struct Args {
    #[arg(long, help = "Launch GUI mode")]
    gui: bool,

    #[arg(short, long, help = "Directory the frames are saved to")]
    dir: Option<PathBuf>,

    #[arg(short, long, help = "File name prefix; frames are saved as <name>_0000.jpg")]
    name: Option<String>,

    #[arg(
        short,
        long,
        value_parser = settings::parse_seconds,
        help = "Time between shots: seconds (e.g. 2.5) or h:mm:ss"
    )]
    interval: Option<u64>,

    #[arg(
        short,
        long,
        value_parser = settings::parse_seconds,
        help = "Total capture time, 0 runs until stopped"
    )]
    total: Option<u64>,

    #[arg(long, allow_negative_numbers = true, help = "Pan angle in degrees (-90..90)")]
    pan: Option<f64>,

    #[arg(long, allow_negative_numbers = true, help = "Tilt angle in degrees (-90..90)")]
    tilt: Option<f64>,

    #[arg(long, help = "pigpiod host")]
    host: Option<String>,

    #[arg(long, help = "pigpiod port")]
    port: Option<u16>,

    #[arg(long, help = "BCM number of the status LED")]
    led_pin: Option<u32>,

    #[arg(long, help = "Run without pigpiod (lamp and servos are simulated)")]
    no_gpio: bool,

    #[arg(long, conflicts_with = "no_gpio", help = "Drive the pins directly instead of through pigpiod")]
    local_gpio: bool,

    #[arg(long, help = "Capture program to run instead of raspistill")]
    program: Option<String>,

    #[arg(long, help = "Aim the camera and exit")]
    aim_only: bool,

    #[arg(long, help = "Print the stored settings and exit")]
    show_settings: bool,

    #[arg(long, help = "Store the given options as the new defaults")]
    save_settings: bool,

    #[arg(short, long, help = "Debug logging")]
    verbose: bool,
}

impl Args {
    fn apply(&self, settings: &mut Settings) {
        if let Some(dir) = &self.dir {
            settings.base_dir = dir.clone();
        }
        if let Some(name) = &self.name {
            settings.file_name = name.clone();
        }
        if let Some(ms) = self.interval {
            settings.interval_ms = ms;
        }
        if let Some(ms) = self.total {
            settings.total_time_ms = ms;
        }
        if let Some(pan) = self.pan {
            settings.pan_angle = pan;
        }
        if let Some(tilt) = self.tilt {
            settings.tilt_angle = tilt;
        }
        if let Some(host) = &self.host {
            settings.gpio_host = host.clone();
        }
        if let Some(port) = self.port {
            settings.gpio_port = port;
        }
        if let Some(pin) = self.led_pin {
            settings.led_pin = pin;
        }
        if self.local_gpio {
            settings.gpio_backend = GpioBackend::Local;
        }
    }

    /// Checks run before any pin is touched; aiming alone only needs valid angles.
    fn check(&self, settings: &Settings) -> Result<(), SettingsError> {
        if self.aim_only {
            settings.validate_angles()
        } else {
            settings.validate()
        }
    }
}

fn show_settings(settings: &Settings) -> Result<()> {
    let path = settings::get_settings_file_path()?;
    println!("\nSETTINGS ({})", path.display());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("{}", serde_json::to_string_pretty(settings)?);
    if !path.exists() {
        println!("\n(defaults; save with --save-settings)");
    }
    println!();
    Ok(())
}

/// Runs the session on a worker thread; Q on the keyboard stops it early.
fn run_headless(mut rig: Rig, settings: Settings, cmd: RecorderCommand) -> Result<()> {
    let should_stop = Arc::new(Mutex::new(false));
    let status = Arc::new(Mutex::new(SessionStatus::Idle));

    let worker = {
        let should_stop = Arc::clone(&should_stop);
        let status = Arc::clone(&status);
        thread::spawn(move || rig.run_session_with(&settings, &cmd, &should_stop, &status))
    };

    println!("Press 'Q' to stop\n");

    let mut keyboard = true;
    let mut last_shots = 0;
    while !worker.is_finished() {
        if keyboard {
            match poll(Duration::from_millis(timing::KEYBOARD_POLL_MS)) {
                Ok(true) => {
                    if let Ok(Event::Key(KeyEvent {
                        code: KeyCode::Char('q') | KeyCode::Char('Q'),
                        ..
                    })) = read()
                    {
                        println!("\nStopping...");
                        if let Ok(mut s) = should_stop.lock() {
                            *s = true;
                        }
                    }
                }
                Ok(false) => {}
                Err(e) => {
                    log::debug!("No keyboard, stop with Ctrl-C: {}", e);
                    keyboard = false;
                }
            }
        } else {
            thread::sleep(Duration::from_millis(timing::KEYBOARD_POLL_MS));
        }

        let current = status.lock().map(|s| s.clone()).unwrap_or_default();
        if let SessionStatus::Capturing {
            shots,
            planned,
            next_in,
        } = current
        {
            if shots != last_shots {
                last_shots = shots;
                match planned {
                    Some(p) => println!("[{}/{}] next in {}", shots, p, settings::format_duration(next_in)),
                    None => println!("[{}] next in {}", shots, settings::format_duration(next_in)),
                }
            }
        }
    }

    // Clear any remaining events
    while keyboard && poll(Duration::from_millis(0)).unwrap_or(false) {
        let _ = read();
    }

    let report = worker
        .join()
        .map_err(|_| anyhow::anyhow!("Capture thread panicked"))??;
    println!("\nDone, {}", report);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(args.verbose);

    // Launch GUI mode if requested
    if args.gui {
        picam_rig::gui::run_gui(!args.no_gpio).map_err(|e| anyhow::anyhow!("GUI error: {:?}", e))?;
        return Ok(());
    }

    let mut settings = Settings::load()?;
    args.apply(&mut settings);

    if args.show_settings {
        return show_settings(&settings);
    }

    if args.save_settings {
        settings.validate()?;
        settings.save()?;
        println!("Settings saved to {}", settings::get_settings_file_path()?.display());
        return Ok(());
    }

    args.check(&settings)?;

    // Connecting aims the camera at the configured angles
    let rig = Rig::connect(&settings, !args.no_gpio)?;

    if args.aim_only {
        println!(
            "Camera aimed at pan {:.1}°, tilt {:.1}° ({})",
            settings.pan_angle,
            settings.tilt_angle,
            rig.description()
        );
        return Ok(());
    }

    let mut cmd = RecorderCommand::raspistill(&settings);
    if let Some(program) = &args.program {
        cmd = cmd.with_program(program.clone());
    }

    println!("📸 TIME-LAPSE");
    println!("Configuration:");
    println!("  Frames: {}", settings.frame_pattern().display());
    println!("  Interval: {}", settings::format_duration(settings.interval()));
    match settings.total_time() {
        Some(total) => println!(
            "  Total time: {} ({} shots)",
            settings::format_duration(total),
            settings.planned_shots().unwrap_or(0)
        ),
        None => println!("  Total time: until stopped"),
    }
    println!("  Pan/Tilt: {:.1}° / {:.1}°", settings.pan_angle, settings.tilt_angle);
    println!("  GPIO: {}", rig.description());
    println!("  Command: {}", cmd.command_line());
    println!();

    run_headless(rig, settings, cmd)
}
