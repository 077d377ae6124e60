fn main() -> Result<(), Box<dyn std::error::Error>> {
    picam_rig::logging::init_logging(false);
    picam_rig::gui::run_gui(true)?;
    Ok(())
}
