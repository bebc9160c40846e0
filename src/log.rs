//! Logging setup — combined terminal + rotating-by-restart file logger.
//!
//! Adapted from the GUI client's logger: there is no frontend target to
//! split out here, so the single log stream goes to stdout and to
//! `<data_dir>/logs/engine.log`.

use anyhow::{Context, Result};
use simplelog::{ColorChoice, CombinedLogger, ConfigBuilder, LevelFilter, SharedLogger, TermLogger, TerminalMode, WriteLogger};
use std::fs::File;
use std::path::Path;

pub fn setup_logger(data_dir: &Path) -> Result<()> {
    let log_dir = data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).context("failed to create log dir")?;

    let log_file = File::create(log_dir.join("engine.log")).context("failed to create log file")?;

    let file_config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap_or_else(|b| b)
        .add_filter_ignore_str("rustls")
        .build();

    let term_config = ConfigBuilder::new()
        .set_time_offset_to_local()
        .unwrap_or_else(|b| b)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = Vec::new();
    loggers.push(TermLogger::new(LevelFilter::Info, term_config, TerminalMode::Mixed, ColorChoice::Auto));
    loggers.push(WriteLogger::new(LevelFilter::Debug, file_config, log_file));

    CombinedLogger::init(loggers).ok();
    log::info!("engine logging initialized (log dir: {})", log_dir.display());
    Ok(())
}
