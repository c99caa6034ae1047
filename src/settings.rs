use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::Parser;
use config::{builder::DefaultState, ConfigBuilder, ConfigError, File};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

const DEFAULT_ADDR: &str = "127.0.0.1:8000";
const DEFAULT_MODEL_DIR: &str = "./model";
const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.6;

#[derive(Parser, Debug)]
#[command(version)]
pub struct Args {
    /// Path to the local configuration TOML file.
    #[arg(short, value_name = "CONFIG_PATH")]
    pub config: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Web {
    #[serde(deserialize_with = "deserialize_socket_addr")]
    pub address: SocketAddr,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Storage {
    pub path: PathBuf,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Model {
    pub directory: PathBuf,
    /// Predictions below this confidence are stored as classification
    /// errors instead of the predicted label.
    pub confidence_threshold: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    pub web: Web,
    pub storage: Storage,
    pub model: Model,
}

impl Settings {
    /// Load settings from the given TOML file, with sane defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let builder = ConfigBuilder::<DefaultState>::default()
            .set_default("web.address", DEFAULT_ADDR)?
            .set_default("storage.path", default_database_path())?
            .set_default("model.directory", DEFAULT_MODEL_DIR)?
            .set_default("model.confidence_threshold", DEFAULT_CONFIDENCE_THRESHOLD)?;

        let cfg = builder.add_source(File::from(path)).build()?;

        cfg.try_deserialize()
    }
}

fn default_database_path() -> String {
    ProjectDirs::from("", "", "opinion-dashboard-server").map_or_else(
        || String::from("./db"),
        |dirs| dirs.data_dir().join("db").to_string_lossy().into_owned(),
    )
}

fn deserialize_socket_addr<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::Settings;

    #[test]
    fn defaults_fill_missing_sections() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(file, "[web]\naddress = \"127.0.0.1:9000\"").unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.web.address.port(), 9000);
        assert!((settings.model.confidence_threshold - 0.6).abs() < f64::EPSILON);
    }
}
