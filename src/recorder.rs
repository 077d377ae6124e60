//! The external still-capture process, run in signal mode.
//!
//! The process stays up for the whole session and saves one frame every time
//! it receives SIGUSR1.

use crate::constants::recorder;
use crate::session::Shutter;
use crate::settings::Settings;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Unable to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' quit while starting ({status})")]
    EarlyExit { program: String, status: ExitStatus },

    #[error("'{program}' exited with status: {status}, exit code: {code:?}")]
    Exited {
        program: String,
        status: ExitStatus,
        code: Option<i32>,
    },

    #[error("Cannot signal '{program}': {source}")]
    Signal {
        program: String,
        #[source]
        source: nix::errno::Errno,
    },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecorderCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl RecorderCommand {
    pub fn raspistill(settings: &Settings) -> Self {
        let args = vec![
            "-s".to_string(), // wait for SIGUSR1 between frames
            "-t".to_string(),
            "0".to_string(), // run until stopped
            "-n".to_string(), // no preview window
            "-w".to_string(),
            settings.width.to_string(),
            "-h".to_string(),
            settings.height.to_string(),
            "-q".to_string(),
            settings.quality.to_string(),
            "-o".to_string(),
            settings.frame_pattern().to_string_lossy().into_owned(),
        ];

        Self {
            program: recorder::PROGRAM.to_string(),
            args,
        }
    }

    pub fn custom(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// A stop through SIGINT shows up either as exit code 130 or as death by SIGINT.
pub fn is_clean_stop(status: &ExitStatus) -> bool {
    status.code() == Some(recorder::INTERRUPTED_EXIT_CODE)
        || status.signal() == Some(Signal::SIGINT as i32)
}

pub struct ImageRecorder {
    child: Child,
    program: String,
    pid: Pid,
    exit: Option<ExitStatus>,
}

impl ImageRecorder {
    pub fn start(cmd: &RecorderCommand) -> Result<Self, RecorderError> {
        Self::start_with(cmd, Duration::from_millis(recorder::START_CHECK_MS))
    }

    pub fn start_with(cmd: &RecorderCommand, start_check: Duration) -> Result<Self, RecorderError> {
        log::info!("Starting capture process: {}", cmd.command_line());

        let child = Command::new(&cmd.program)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .spawn()
            .map_err(|source| RecorderError::Spawn {
                program: cmd.program.clone(),
                source,
            })?;

        let pid = Pid::from_raw(child.id() as i32);
        let mut recorder = Self {
            child,
            program: cmd.program.clone(),
            pid,
            exit: None,
        };

        let deadline = Instant::now() + start_check;
        while Instant::now() < deadline {
            if let Some(status) = recorder.poll_exit()? {
                return Err(RecorderError::EarlyExit {
                    program: recorder.program.clone(),
                    status,
                });
            }
            thread::sleep(Duration::from_millis(20));
        }

        log::info!("'{}' running with pid {}", recorder.program, recorder.pid);
        Ok(recorder)
    }

    pub fn pid(&self) -> u32 {
        self.pid.as_raw() as u32
    }

    pub fn trigger(&mut self) -> Result<(), RecorderError> {
        log::debug!("SIGUSR1 -> {}", self.pid);
        signal::kill(self.pid, Signal::SIGUSR1).map_err(|source| RecorderError::Signal {
            program: self.program.clone(),
            source,
        })
    }

    /// Returns the exit status once the process has finished.
    pub fn poll_exit(&mut self) -> Result<Option<ExitStatus>, RecorderError> {
        if self.exit.is_none() {
            self.exit = self.child.try_wait()?;
        }
        Ok(self.exit)
    }

    fn check_exit(&self, status: ExitStatus) -> Result<(), RecorderError> {
        if is_clean_stop(&status) {
            log::info!("'{}' closed ({})", self.program, status);
            Ok(())
        } else {
            Err(RecorderError::Exited {
                program: self.program.clone(),
                status,
                code: status.code(),
            })
        }
    }

    /// Interrupts the process like Ctrl-C would, killing it if it does not quit in time.
    pub fn stop(&mut self) -> Result<(), RecorderError> {
        self.stop_with(Duration::from_millis(recorder::STOP_TIMEOUT_MS))
    }

    pub fn stop_with(&mut self, timeout: Duration) -> Result<(), RecorderError> {
        if let Some(status) = self.poll_exit()? {
            return self.check_exit(status);
        }

        log::debug!("SIGINT -> {}", self.pid);
        if let Err(e) = signal::kill(self.pid, Signal::SIGINT) {
            log::warn!("Cannot interrupt '{}': {}", self.program, e);
        }

        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if let Some(status) = self.poll_exit()? {
                return self.check_exit(status);
            }
            thread::sleep(Duration::from_millis(20));
        }

        log::warn!("'{}' ignored SIGINT, killing it", self.program);
        self.child.kill()?;
        self.exit = Some(self.child.wait()?);
        Ok(())
    }
}

impl Drop for ImageRecorder {
    fn drop(&mut self) {
        if self.exit.is_none() {
            if let Err(e) = self.stop() {
                log::warn!("{}", e);
            }
        }
    }
}

impl Shutter for ImageRecorder {
    fn trigger(&mut self) -> anyhow::Result<()> {
        ImageRecorder::trigger(self)?;
        Ok(())
    }

    fn is_alive(&mut self) -> anyhow::Result<bool> {
        match self.poll_exit()? {
            None => Ok(true),
            Some(status) => {
                self.check_exit(status)?;
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    // Counts SIGUSR1 into a file and exits 130 on SIGINT, like raspistill -s
    fn fake_camera(counter: &std::path::Path) -> RecorderCommand {
        let script = format!(
            "n=0; trap 'n=$((n+1)); echo $n > {}' USR1; trap 'exit 130' INT; \
             while :; do sleep 0.05; done",
            counter.display()
        );
        RecorderCommand::custom("sh", &["-c", &script])
    }

    #[test]
    fn raspistill_command_uses_signal_mode() {
        let mut settings = Settings::default();
        settings.base_dir = PathBuf::from("/data");
        settings.file_name = "sky".to_string();
        settings.width = 800;
        settings.height = 600;
        settings.quality = 90;

        let cmd = RecorderCommand::raspistill(&settings);
        assert_eq!(
            cmd.command_line(),
            "raspistill -s -t 0 -n -w 800 -h 600 -q 90 -o /data/sky_%04d.jpg"
        );
        assert_eq!(cmd.with_program("/opt/bin/raspistill").program, "/opt/bin/raspistill");
    }

    #[test]
    fn missing_program_is_a_spawn_error() {
        let cmd = RecorderCommand::custom("/nonexistent/picam-capture-tool", &[]);
        assert!(matches!(
            ImageRecorder::start(&cmd),
            Err(RecorderError::Spawn { .. })
        ));
    }

    #[test]
    fn immediate_exit_is_a_start_error() {
        let cmd = RecorderCommand::custom("sh", &["-c", "exit 1"]);
        match ImageRecorder::start(&cmd) {
            Err(RecorderError::EarlyExit { status, .. }) => assert_eq!(status.code(), Some(1)),
            Err(other) => panic!("unexpected error: {}", other),
            Ok(_) => panic!("started a process that exited"),
        }
    }

    #[test]
    fn triggers_reach_the_process_and_stop_is_clean() {
        let dir = tempfile::tempdir().unwrap();
        let counter = dir.path().join("count");

        let mut rec = ImageRecorder::start_with(&fake_camera(&counter), Duration::from_millis(200))
            .unwrap();
        assert!(rec.pid() > 0);
        for _ in 0..3 {
            rec.trigger().unwrap();
            thread::sleep(Duration::from_millis(250));
        }

        assert_eq!(std::fs::read_to_string(&counter).unwrap().trim(), "3");
        assert!(Shutter::is_alive(&mut rec).unwrap());
        rec.stop().unwrap();
        assert!(is_clean_stop(&rec.poll_exit().unwrap().unwrap()));
    }

    #[test]
    fn unexpected_exit_is_reported() {
        let cmd = RecorderCommand::custom("sh", &["-c", "sleep 0.2; exit 3"]);
        let mut rec = ImageRecorder::start_with(&cmd, Duration::from_millis(20)).unwrap();
        thread::sleep(Duration::from_millis(600));

        let err = Shutter::is_alive(&mut rec).unwrap_err();
        match err.downcast_ref::<RecorderError>() {
            Some(RecorderError::Exited { code, .. }) => assert_eq!(*code, Some(3)),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn stubborn_process_is_killed() {
        let cmd = RecorderCommand::custom("sh", &["-c", "trap '' INT; while :; do sleep 0.05; done"]);
        let mut rec = ImageRecorder::start_with(&cmd, Duration::from_millis(20)).unwrap();
        rec.stop_with(Duration::from_millis(300)).unwrap();
        assert!(rec.poll_exit().unwrap().is_some());
    }

    #[test]
    fn clean_stop_detection() {
        assert!(is_clean_stop(&ExitStatus::from_raw(130 << 8)));
        assert!(is_clean_stop(&ExitStatus::from_raw(Signal::SIGINT as i32)));
        assert!(!is_clean_stop(&ExitStatus::from_raw(0)));
        assert!(!is_clean_stop(&ExitStatus::from_raw(1 << 8)));
    }
}
