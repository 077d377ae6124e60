use crate::constants::gui;
use crate::gpio::GpioError;
use crate::lamp::{LampIndicator, LampState};
use crate::pantilt::AimError;
use crate::preview::{self, Thumbnail};
use crate::recorder::RecorderError;
use crate::session::{self, SessionStatus};
use crate::settings::{self, GpioBackend, Settings};
use crate::Rig;
use eframe::egui;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

#[derive(Clone, Debug, PartialEq)]
struct Alert {
    title: String,
    message: String,
}

impl Alert {
    fn from_error(err: &anyhow::Error) -> Self {
        Self {
            title: alert_title(err).to_string(),
            message: format!("{:#}", err),
        }
    }
}

/// Dialog title naming the service that failed.
fn alert_title(err: &anyhow::Error) -> &'static str {
    if err.chain().any(|e| e.is::<RecorderError>()) {
        "raspistill"
    } else if err
        .chain()
        .any(|e| e.is::<GpioError>() || e.is::<AimError>())
    {
        "pigpiod Error"
    } else {
        "Camera Rig"
    }
}

/// Text field whose content is only committed once it parses.
struct TimeField {
    text: String,
    committed_ms: u64,
}

impl TimeField {
    fn new(ms: u64) -> Self {
        Self {
            text: settings::format_seconds(ms),
            committed_ms: ms,
        }
    }

    fn parsed(&self) -> Result<u64, settings::SettingsError> {
        settings::parse_seconds(&self.text)
    }

    fn commit(&mut self) -> Option<u64> {
        let ms = self.parsed().ok()?;
        self.committed_ms = ms;
        self.text = settings::format_seconds(ms);
        Some(ms)
    }

    fn show(&mut self, ui: &mut egui::Ui) -> bool {
        let valid = self.parsed().is_ok();
        let mut edit = egui::TextEdit::singleline(&mut self.text).desired_width(90.0);
        if !valid {
            edit = edit.text_color(egui::Color32::RED);
        }
        let response = ui.add(edit);
        if response.lost_focus() && valid {
            self.commit();
        }
        valid
    }
}

pub struct RigApp {
    settings: Settings,
    interval: TimeField,
    total_time: TimeField,
    use_gpio: bool,

    rig: Option<Arc<Mutex<Rig>>>,
    connection: Option<String>,
    lamp: LampIndicator,
    status: Arc<Mutex<SessionStatus>>,
    is_running: Arc<Mutex<bool>>,
    should_stop: Arc<Mutex<bool>>,
    worker: Option<JoinHandle<()>>,
    alert: Arc<Mutex<Option<Alert>>>,

    preview: Arc<Mutex<Option<Thumbnail>>>,
    preview_loading: Arc<Mutex<bool>>,
    preview_texture: Option<egui::TextureHandle>,
    preview_source: Option<PathBuf>,
    last_preview_check: Option<Instant>,
}

impl RigApp {
    pub fn new(_cc: &eframe::CreationContext<'_>, use_gpio: bool) -> Self {
        let settings = Settings::load().unwrap_or_else(|e| {
            log::warn!("Using default settings: {}", e);
            Settings::default()
        });
        Self::with_settings(settings, use_gpio)
    }

    fn with_settings(settings: Settings, use_gpio: bool) -> Self {
        let mut app = Self {
            interval: TimeField::new(settings.interval_ms),
            total_time: TimeField::new(settings.total_time_ms),
            settings,
            use_gpio,
            rig: None,
            connection: None,
            lamp: LampIndicator::default(),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            is_running: Arc::new(Mutex::new(false)),
            should_stop: Arc::new(Mutex::new(false)),
            worker: None,
            alert: Arc::new(Mutex::new(None)),
            preview: Arc::new(Mutex::new(None)),
            preview_loading: Arc::new(Mutex::new(false)),
            preview_texture: None,
            preview_source: None,
            last_preview_check: None,
        };
        app.connect_rig();
        app
    }

    fn connect_rig(&mut self) {
        match Rig::connect(&self.settings, self.use_gpio) {
            Ok(rig) => {
                self.lamp = rig.lamp_indicator();
                self.connection = Some(rig.description().to_string());
                self.rig = Some(Arc::new(Mutex::new(rig)));
            }
            Err(e) => {
                log::error!("{:#}", e);
                self.rig = None;
                self.connection = None;
                self.raise(Alert {
                    title: "pigpiod Error !".to_string(),
                    message: format!("{:#}", e),
                });
            }
        }
    }

    fn raise(&self, alert: Alert) {
        if let Ok(mut slot) = self.alert.lock() {
            *slot = Some(alert);
        }
    }

    fn running(&self) -> bool {
        self.is_running.lock().map(|r| *r).unwrap_or(false)
    }

    /// Applies the edit fields; `Err` names the first invalid value.
    fn commit_edits(&mut self) -> Result<(), String> {
        self.settings.interval_ms = self
            .interval
            .commit()
            .ok_or_else(|| format!("Invalid interval '{}'", self.interval.text))?;
        self.settings.total_time_ms = self
            .total_time
            .commit()
            .ok_or_else(|| format!("Invalid total time '{}'", self.total_time.text))?;
        self.settings.validate().map_err(|e| e.to_string())
    }

    fn start_capture(&mut self) {
        if let Err(msg) = self.commit_edits() {
            self.raise(Alert {
                title: "Camera Rig".to_string(),
                message: msg,
            });
            return;
        }
        let Some(rig) = self.rig.clone() else {
            return;
        };

        if let Err(e) = self.settings.save() {
            log::warn!("Could not save settings: {}", e);
        }

        let settings = self.settings.clone();
        let status = Arc::clone(&self.status);
        let is_running = Arc::clone(&self.is_running);
        let should_stop = Arc::clone(&self.should_stop);
        let alert = Arc::clone(&self.alert);

        if let Ok(mut r) = is_running.lock() {
            *r = true;
        }
        if let Ok(mut s) = should_stop.lock() {
            *s = false;
        }
        session::publish(&status, SessionStatus::WarmingUp);

        self.worker = Some(thread::spawn(move || {
            session_worker(&rig, &settings, &should_stop, &status, &is_running, &alert)
        }));
    }

    fn stop_capture(&mut self) {
        if let Ok(mut s) = self.should_stop.lock() {
            *s = true;
        }
    }

    fn aim(&mut self) {
        let Some(rig) = self.rig.clone() else {
            return;
        };
        let result = match rig.lock() {
            Ok(mut rig) => rig.aim(self.settings.pan_angle, self.settings.tilt_angle),
            Err(_) => Err(anyhow::anyhow!("Rig state is unusable after a crash")),
        };
        if let Err(e) = result {
            log::error!("{:#}", e);
            self.raise(Alert::from_error(&e));
        }
    }

    fn shutdown(&mut self) {
        if let Err(msg) = self.commit_edits() {
            log::warn!("Not saving edits: {}", msg);
        }
        if let Err(e) = self.settings.save() {
            log::warn!("Could not save settings: {}", e);
        }

        self.stop_capture();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }

    fn refresh_preview(&mut self, ctx: &egui::Context) {
        if let Some(thumb) = self.preview.lock().ok().and_then(|mut p| p.take()) {
            let image = egui::ColorImage::from_rgba_unmultiplied(
                [thumb.width as usize, thumb.height as usize],
                &thumb.rgba,
            );
            self.preview_texture =
                Some(ctx.load_texture("latest-frame", image, egui::TextureOptions::LINEAR));
            self.preview_source = Some(thumb.source);
        }

        let due = self
            .last_preview_check
            .is_none_or(|t| t.elapsed() >= Duration::from_millis(gui::PREVIEW_REFRESH_MS));
        if !due {
            return;
        }
        self.last_preview_check = Some(Instant::now());

        let latest = match preview::latest_frame(&self.settings.base_dir, self.settings.file_name.trim()) {
            Ok(Some(path)) => path,
            Ok(None) => return,
            Err(e) => {
                log::debug!("No preview: {}", e);
                return;
            }
        };
        if self.preview_source.as_ref() == Some(&latest) {
            return;
        }

        let loading = Arc::clone(&self.preview_loading);
        if let Ok(mut busy) = loading.lock() {
            if *busy {
                return;
            }
            *busy = true;
        }

        let slot = Arc::clone(&self.preview);
        let ctx = ctx.clone();
        thread::spawn(move || {
            match preview::load_thumbnail(&latest, gui::PREVIEW_MAX_SIDE) {
                Ok(thumb) => {
                    if let Ok(mut p) = slot.lock() {
                        *p = Some(thumb);
                    }
                    ctx.request_repaint();
                }
                // Usually a frame still being written
                Err(e) => log::debug!("{}", e),
            }
            if let Ok(mut busy) = loading.lock() {
                *busy = false;
            }
        });
    }

    fn show_alert(&mut self, ctx: &egui::Context) {
        let current = self.alert.lock().ok().and_then(|a| a.clone());
        let Some(alert) = current else {
            return;
        };

        let mut dismissed = false;
        egui::Window::new(egui::RichText::new(&alert.title).strong())
            .collapsible(false)
            .resizable(false)
            .anchor(egui::Align2::CENTER_CENTER, egui::Vec2::ZERO)
            .show(ctx, |ui| {
                ui.colored_label(egui::Color32::RED, "✗");
                ui.label(&alert.message);
                ui.add_space(8.0);
                if ui.button("OK").clicked() {
                    dismissed = true;
                }
            });

        if dismissed {
            if let Ok(mut slot) = self.alert.lock() {
                *slot = None;
            }
        }
    }

    fn lamp_label(state: LampState) -> egui::RichText {
        let (fg, bg) = match state {
            LampState::Dark => (egui::Color32::WHITE, egui::Color32::BLACK),
            LampState::Photo => (egui::Color32::BLACK, egui::Color32::YELLOW),
            LampState::Error => (egui::Color32::WHITE, egui::Color32::RED),
        };
        egui::RichText::new("  LAMP  ")
            .monospace()
            .color(fg)
            .background_color(bg)
    }

    fn status_text(status: &SessionStatus) -> (egui::Color32, String) {
        match status {
            SessionStatus::Idle => (egui::Color32::GRAY, "Ready".to_string()),
            SessionStatus::WarmingUp => (egui::Color32::BLUE, "Starting camera...".to_string()),
            SessionStatus::Capturing {
                shots,
                planned,
                next_in,
            } => {
                let count = match planned {
                    Some(p) => format!("{}/{}", shots, p),
                    None => shots.to_string(),
                };
                (
                    egui::Color32::BLUE,
                    format!(
                        "Shot {} taken, next in {}",
                        count,
                        settings::format_duration(*next_in)
                    ),
                )
            }
            SessionStatus::Completed(report) => (egui::Color32::GREEN, format!("✓ {}", report)),
            SessionStatus::Error(msg) => (egui::Color32::RED, format!("✗ {}", msg)),
        }
    }
}

impl eframe::App for RigApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        if ctx.input(|i| i.viewport().close_requested()) {
            self.shutdown();
        }

        let is_running = self.running();
        if is_running {
            ctx.request_repaint_after(Duration::from_millis(gui::REPAINT_MS));
        }
        self.refresh_preview(ctx);

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.horizontal(|ui| {
                ui.heading("Pi Camera Rig");
                ui.with_layout(egui::Layout::right_to_left(egui::Align::Center), |ui| {
                    ui.label(Self::lamp_label(self.lamp.get()));
                });
            });

            // Connection
            ui.horizontal(|ui| match self.connection.clone() {
                Some(label) => {
                    ui.label(format!("GPIO: {}", label));
                }
                None => {
                    ui.colored_label(egui::Color32::RED, "GPIO: not connected");
                    ui.checkbox(&mut self.use_gpio, "use pigpiod");
                    if ui.button("Reconnect").clicked() {
                        self.connect_rig();
                    }
                }
            });

            let current_status = self.status.lock().map(|s| s.clone()).unwrap_or_default();
            let (color, text) = Self::status_text(&current_status);
            ui.colored_label(color, text);

            ui.add_space(10.0);
            ui.separator();
            ui.add_space(10.0);

            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.add_enabled_ui(!is_running, |ui| {
                    ui.group(|ui| {
                        ui.label("Output");

                        ui.horizontal(|ui| {
                            ui.label("Directory:");
                            let mut dir = self.settings.base_dir.to_string_lossy().into_owned();
                            if ui.text_edit_singleline(&mut dir).changed() {
                                self.settings.base_dir = PathBuf::from(dir);
                            }
                            if ui.button("Browse...").clicked() {
                                if let Some(picked) = rfd::FileDialog::new()
                                    .set_directory(&self.settings.base_dir)
                                    .pick_folder()
                                {
                                    self.settings.base_dir = picked;
                                }
                            }
                        });

                        ui.horizontal(|ui| {
                            ui.label("File name:");
                            ui.text_edit_singleline(&mut self.settings.file_name);
                            ui.label("_0000.jpg");
                        });
                    });

                    ui.add_space(10.0);

                    ui.group(|ui| {
                        ui.label("Timing");

                        ui.horizontal(|ui| {
                            ui.label("Interval (seconds):");
                            if !self.interval.show(ui) {
                                ui.colored_label(egui::Color32::RED, "invalid");
                            }
                        });

                        ui.horizontal(|ui| {
                            ui.label("Total time (seconds or h:mm:ss, 0 = until stopped):");
                            if !self.total_time.show(ui) {
                                ui.colored_label(egui::Color32::RED, "invalid");
                            }
                        });

                        if let Some(shots) = settings::planned_shots(
                            self.interval.committed_ms,
                            self.total_time.committed_ms,
                        ) {
                            ui.label(format!("{} shots planned", shots));
                        }
                    });

                    ui.add_space(10.0);

                    ui.group(|ui| {
                        ui.label("Pan / Tilt");

                        ui.horizontal(|ui| {
                            ui.label("Pan:");
                            ui.add(
                                egui::Slider::new(
                                    &mut self.settings.pan_angle,
                                    gui::ANGLE_MIN..=gui::ANGLE_MAX,
                                )
                                .suffix("°"),
                            );
                        });

                        ui.horizontal(|ui| {
                            ui.label("Tilt:");
                            ui.add(
                                egui::Slider::new(
                                    &mut self.settings.tilt_angle,
                                    gui::ANGLE_MIN..=gui::ANGLE_MAX,
                                )
                                .suffix("°"),
                            );
                        });

                        if ui
                            .add_enabled(self.rig.is_some(), egui::Button::new("Aim"))
                            .clicked()
                        {
                            self.aim();
                        }
                    });
                });

                ui.add_space(20.0);

                // Action buttons
                let inputs_ok = self.interval.parsed().is_ok() && self.total_time.parsed().is_ok();
                let can_start = !is_running && inputs_ok && self.rig.is_some();

                ui.horizontal(|ui| {
                    if ui
                        .add_enabled(can_start, egui::Button::new("▶ Start"))
                        .clicked()
                    {
                        self.start_capture();
                    }

                    if ui
                        .add_enabled(is_running, egui::Button::new("⏹ Stop"))
                        .clicked()
                    {
                        self.stop_capture();
                    }

                    if ui.button("📋 Copy Command").clicked() {
                        let cmd = self.generate_cli_command();
                        ui.ctx().copy_text(cmd);
                    }
                });

                ui.add_space(10.0);

                if let Some(texture) = &self.preview_texture {
                    ui.group(|ui| {
                        ui.label("Latest frame:");
                        if let Some(source) = &self.preview_source {
                            ui.small(source.display().to_string());
                        }
                        ui.add(egui::Image::new(texture).max_width(gui::PREVIEW_MAX_SIDE as f32));
                    });
                    ui.add_space(10.0);
                }

                // Show equivalent CLI command
                ui.group(|ui| {
                    ui.label("Equivalent CLI command:");
                    ui.add_space(5.0);
                    let cmd = self.generate_cli_command();
                    ui.code(&cmd);
                });
            });
        });

        self.show_alert(ctx);
    }
}

/// Body of the capture thread. `is_running` is cleared only after the final status is published.
fn session_worker(
    rig: &Mutex<Rig>,
    settings: &Settings,
    should_stop: &Arc<Mutex<bool>>,
    status: &Arc<Mutex<SessionStatus>>,
    is_running: &Mutex<bool>,
    alert: &Mutex<Option<Alert>>,
) {
    let result = match rig.lock() {
        Ok(mut rig) => rig.run_session(settings, should_stop, status),
        Err(_) => Err(anyhow::anyhow!("Rig state is unusable after a crash")),
    };

    match result {
        Ok(report) => session::publish(status, SessionStatus::Completed(report)),
        Err(e) => {
            log::error!("Session failed: {:#}", e);
            session::publish(status, SessionStatus::Error(format!("{:#}", e)));
            if let Ok(mut slot) = alert.lock() {
                *slot = Some(Alert::from_error(&e));
            }
        }
    }

    if let Ok(mut r) = is_running.lock() {
        *r = false;
    }
}

impl RigApp {
    fn generate_cli_command(&self) -> String {
        let mut cmd = vec!["picam-rig".to_string()];

        cmd.push(format!("--dir \"{}\"", self.settings.base_dir.display()));
        cmd.push(format!("--name {}", self.settings.file_name.trim()));
        cmd.push(format!("--interval {}", self.interval.text.trim()));
        cmd.push(format!("--total {}", self.total_time.text.trim()));
        cmd.push(format!("--pan {}", self.settings.pan_angle));
        cmd.push(format!("--tilt {}", self.settings.tilt_angle));

        if !self.use_gpio {
            cmd.push("--no-gpio".to_string());
        } else if self.settings.gpio_backend == GpioBackend::Local {
            cmd.push("--local-gpio".to_string());
        }

        cmd.join(" ")
    }
}

pub fn run_gui(use_gpio: bool) -> Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([gui::WINDOW_WIDTH, gui::WINDOW_HEIGHT])
            .with_min_inner_size([gui::MIN_WINDOW_WIDTH, gui::MIN_WINDOW_HEIGHT]),
        ..Default::default()
    };

    eframe::run_native(
        "Pi Camera Rig",
        options,
        Box::new(move |cc| Ok(Box::new(RigApp::new(cc, use_gpio)))),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn app() -> RigApp {
        let dir = std::env::temp_dir().join("picam-rig-gui-test");
        let settings = Settings {
            base_dir: dir,
            ..Settings::default()
        };
        RigApp::with_settings(settings, false)
    }

    #[test]
    fn titles_name_the_failing_service() {
        let err = anyhow::Error::new(GpioError::NotPermitted).context("Unable to set lamp");
        assert_eq!(alert_title(&err), "pigpiod Error");

        let err = anyhow::Error::new(RecorderError::Io(std::io::Error::other("gone")));
        assert_eq!(alert_title(&err), "raspistill");

        assert_eq!(alert_title(&anyhow::anyhow!("disk full")), "Camera Rig");
    }

    #[test]
    fn time_field_commits_only_valid_text() {
        let mut field = TimeField::new(10_000);
        field.text = "abc".to_string();
        assert_eq!(field.commit(), None);
        assert_eq!(field.committed_ms, 10_000);

        field.text = "1:30".to_string();
        assert_eq!(field.commit(), Some(90_000));
        assert_eq!(field.text, "90");
    }

    #[test]
    fn simulated_rig_connects_and_builds_command() {
        let mut app = app();
        assert!(app.rig.is_some());
        assert_eq!(app.lamp.get(), LampState::Dark);

        app.settings.file_name = "garden".to_string();
        app.interval.text = "5".to_string();
        let cmd = app.generate_cli_command();
        assert!(cmd.starts_with("picam-rig --dir"));
        assert!(cmd.contains("--name garden --interval 5"));
        assert!(cmd.ends_with("--no-gpio"));
    }

    #[test]
    fn final_status_is_published_before_widgets_unlock() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();
        let settings = Settings {
            base_dir: blocker.join("shots"),
            warmup_ms: 0,
            ..Settings::default()
        };

        let rig = Arc::new(Mutex::new(Rig::connect(&settings, false).unwrap()));
        let should_stop = Arc::new(Mutex::new(false));
        let status = Arc::new(Mutex::new(SessionStatus::WarmingUp));
        let is_running = Arc::new(Mutex::new(true));
        let alert = Arc::new(Mutex::new(None));

        let worker = {
            let (rig, should_stop, status, is_running, alert) = (
                Arc::clone(&rig),
                Arc::clone(&should_stop),
                Arc::clone(&status),
                Arc::clone(&is_running),
                Arc::clone(&alert),
            );
            thread::spawn(move || {
                session_worker(&rig, &settings, &should_stop, &status, &is_running, &alert)
            })
        };

        // Whenever the widgets are unlocked, the status must already be final
        loop {
            let running = *is_running.lock().unwrap();
            let current = status.lock().unwrap().clone();
            if !running {
                assert!(matches!(current, SessionStatus::Error(_)), "{:?}", current);
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        worker.join().unwrap();
        assert!(alert.lock().unwrap().is_some());
    }

    #[test]
    fn bad_edit_blocks_commit() {
        let mut app = app();
        app.total_time.text = "2".to_string();
        let err = app.commit_edits().unwrap_err();
        assert!(err.contains("Total time"), "{}", err);
    }
}
