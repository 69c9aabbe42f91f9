use std::path::PathBuf;
use std::{env, fs, io};

use anyhow::{Context, Result};
use clap::Args;
use log::warn;
use serde::de::DeserializeOwned;

use crate::dirs;

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// The config directory. Defaults to `$SVNGATE_CONFIG`, `/etc/svngate` for
    /// root, otherwise `~/.config/svngate`.
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// The data directory. Defaults to `$SVNGATE_DATA`, `/var/lib/svngate` for
    /// root, otherwise `~/.local/share/svngate`.
    #[arg(long)]
    pub data_path: Option<PathBuf>,
}

impl ConfigArgs {
    pub fn load<T>(&self, name: &str) -> Result<T>
    where
        T: CommonConfig + DeserializeOwned + Default,
    {
        let ps = PathSet::new(self.config_path.clone(), self.data_path.clone())?;
        ps.load_config(name)
    }
}

pub struct PathSet {
    pub config_dir: PathBuf,
    pub data_dir: PathBuf,
}

impl PathSet {
    pub fn new(config_dir: Option<PathBuf>, data_dir: Option<PathBuf>) -> Result<Self> {
        let is_root = dirs::is_root();

        let config_dir = if let Some(path) = config_dir {
            path
        } else if let Ok(path) = env::var("SVNGATE_CONFIG") {
            PathBuf::from(path)
        } else if is_root {
            PathBuf::from("/etc/svngate")
        } else {
            dirs::home_dir()?.join(".config").join("svngate")
        };

        let data_dir = if let Some(path) = data_dir {
            path
        } else if let Ok(path) = env::var("SVNGATE_DATA") {
            PathBuf::from(path)
        } else if is_root {
            PathBuf::from("/var/lib/svngate")
        } else {
            dirs::home_dir()?
                .join(".local")
                .join("share")
                .join("svngate")
        };

        dirs::ensure_dir_exists(&config_dir)
            .with_context(|| format!("ensure config directory: {}", config_dir.display()))?;
        dirs::ensure_dir_exists(&data_dir)
            .with_context(|| format!("ensure data directory: {}", data_dir.display()))?;

        Ok(Self {
            config_dir,
            data_dir,
        })
    }

    /// Reads `<config_dir>/<name>.toml`, falling back to defaults when the
    /// file does not exist, then validates the result.
    pub fn load_config<T>(&self, name: &str) -> Result<T>
    where
        T: CommonConfig + DeserializeOwned + Default,
    {
        let path = self.config_dir.join(format!("{name}.toml"));
        let mut cfg: T = match fs::read_to_string(&path) {
            Ok(s) => toml::from_str(&s)
                .with_context(|| format!("parse config file: {}", path.display()))?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("Config file for {name} not found, using defaults");
                T::default()
            }
            Err(err) => {
                return Err(err).context(format!("read config file: {}", path.display()));
            }
        };

        cfg.complete(self).context("validate config")?;
        Ok(cfg)
    }
}

pub trait CommonConfig {
    fn complete(&mut self, ps: &PathSet) -> Result<()>;
}

/// See: [`shellexpand::full`].
pub fn expandenv(name: &str, s: impl AsRef<str>) -> Result<String> {
    let s =
        shellexpand::full(s.as_ref()).with_context(|| format!("expand env value for '{name}'"))?;
    Ok(s.to_string())
}
