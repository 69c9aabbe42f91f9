use std::io::{self, IsTerminal};
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use fern::colors::{Color, ColoredLevelConfig};
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::config::{CommonConfig, PathSet};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LogsConfig {
    #[serde(default = "LogsConfig::default_name")]
    pub name: LogName,

    #[serde(default = "LogsConfig::default_level")]
    pub level: String,

    #[serde(skip)]
    file_path: PathBuf,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub enum LogName {
    #[serde(rename = "stdout")]
    Stdout,
    #[serde(rename = "stderr")]
    Stderr,
    #[serde(rename = "file")]
    File,
}

impl Default for LogsConfig {
    fn default() -> Self {
        Self {
            name: Self::default_name(),
            level: Self::default_level(),
            file_path: PathBuf::new(),
        }
    }
}

impl CommonConfig for LogsConfig {
    fn complete(&mut self, ps: &PathSet) -> Result<()> {
        self.level_filter()?;
        if matches!(self.name, LogName::File) {
            self.file_path = ps.data_dir.join("gateway.log");
        }
        Ok(())
    }
}

impl LogsConfig {
    pub fn init(&self) -> Result<()> {
        let level = self.level_filter()?;
        let colored = match self.name {
            LogName::Stdout => io::stdout().is_terminal(),
            LogName::Stderr => io::stderr().is_terminal(),
            LogName::File => false,
        };

        let colors = ColoredLevelConfig::new()
            .info(Color::Green)
            .debug(Color::Magenta);

        let dispatch = fern::Dispatch::new()
            .format(move |out, message, record| {
                let now = humantime::format_rfc3339_millis(std::time::SystemTime::now());
                if colored {
                    out.finish(format_args!(
                        "{} [{}] {}",
                        now,
                        colors.color(record.level()),
                        message
                    ))
                } else {
                    out.finish(format_args!("{} [{}] {}", now, record.level(), message))
                }
            })
            .level(level)
            // The http client stack is chatty at debug level.
            .level_for("hyper_util", LevelFilter::Info)
            .level_for("reqwest", LevelFilter::Info);

        let dispatch = match self.name {
            LogName::Stdout => dispatch.chain(io::stdout()),
            LogName::Stderr => dispatch.chain(io::stderr()),
            LogName::File => {
                let file = fern::log_file(&self.file_path).with_context(|| {
                    format!("open log file: {}", self.file_path.display())
                })?;
                dispatch.chain(file)
            }
        };

        dispatch.apply().context("init logger")?;
        Ok(())
    }

    fn level_filter(&self) -> Result<LevelFilter> {
        let level = match self.level.as_str() {
            "error" => LevelFilter::Error,
            "warn" => LevelFilter::Warn,
            "info" => LevelFilter::Info,
            "debug" => LevelFilter::Debug,
            _ => bail!("unknown log level '{}'", self.level),
        };
        Ok(level)
    }

    fn default_name() -> LogName {
        LogName::Stdout
    }

    fn default_level() -> String {
        String::from("info")
    }
}
