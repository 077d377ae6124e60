// GUI-related constants
pub mod gui {
    // Window settings
    pub const WINDOW_WIDTH: f32 = 520.0;
    pub const WINDOW_HEIGHT: f32 = 760.0;
    pub const MIN_WINDOW_WIDTH: f32 = 440.0;
    pub const MIN_WINDOW_HEIGHT: f32 = 560.0;

    // Slider ranges
    pub const ANGLE_MIN: f64 = -90.0;
    pub const ANGLE_MAX: f64 = 90.0;

    // Preview
    pub const PREVIEW_MAX_SIDE: u32 = 320;
    pub const PREVIEW_REFRESH_MS: u64 = 1500;

    // Status polling while a session runs
    pub const REPAINT_MS: u64 = 200;
}

// GPIO numbers are Broadcom (BCM) numbers, see https://pinout.xyz/
//
// +5V on pins 2 or 4 of the 40 pin connector.
// GND on pins 6, 9, 14, 20, 25, 30, 34 or 39.
pub mod pins {
    pub const LED: u32 = 23;
    // BCM14 is pin 8 of the 40 pin connector.
    pub const PAN: u32 = 14;
    // BCM26 is pin 37 of the 40 pin connector.
    pub const TILT: u32 = 26;
}

pub mod pigpiod {
    pub const HOST: &str = "localhost";
    pub const PORT: u16 = 8888;
    pub const IO_TIMEOUT_MS: u64 = 3000;
}

// Values to be checked with the servos in use
pub mod servo {
    pub const PWM_FREQUENCY: u32 = 50; // Hz
    pub const PULSE_AT_MINUS_90: f64 = 600.0; // us
    pub const PULSE_AT_PLUS_90: f64 = 2200.0; // us
}

pub mod recorder {
    pub const PROGRAM: &str = "raspistill";
    // How long a freshly spawned process must stay up to count as started
    pub const START_CHECK_MS: u64 = 500;
    pub const STOP_TIMEOUT_MS: u64 = 3000;
    // Exit code of a process stopped with Ctrl-C
    pub const INTERRUPTED_EXIT_CODE: i32 = 130;
}

// Capture configuration defaults
pub mod defaults {
    pub const FILE_NAME: &str = "image";
    pub const BASE_DIR_NAME: &str = "Pictures/picam-rig";
    pub const INTERVAL_MS: u64 = 10_000;
    pub const TOTAL_TIME_MS: u64 = 3_600_000;
    pub const FLASH_MS: u64 = 500;
    pub const WARMUP_MS: u64 = 2000;
    pub const WIDTH: u32 = 1640;
    pub const HEIGHT: u32 = 1232;
    pub const QUALITY: u8 = 85;
}

pub mod timing {
    pub const MIN_INTERVAL_MS: u64 = 1000;
    // Upper bound for typed times: one leap year
    pub const MAX_TIME_MS: u64 = 366 * 24 * 3600 * 1000;
    pub const STOP_POLL_MS: u64 = 50;
    pub const KEYBOARD_POLL_MS: u64 = 200;
}
