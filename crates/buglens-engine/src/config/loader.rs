use buglens_common::config::BuglensConfig;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load from default locations:
    /// 1. ./buglens.yaml
    /// 2. ~/.buglens/config.yaml
    /// 3. Default configuration
    pub async fn load_default() -> Result<BuglensConfig, ConfigError> {
        let local_config = PathBuf::from("./buglens.yaml");
        if local_config.exists() {
            return Self::load_from(&local_config).await;
        }

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".buglens").join("config.yaml");
            if home_config.exists() {
                return Self::load_from(&home_config).await;
            }
        }

        Ok(BuglensConfig::default())
    }

    /// An explicit path wins over the default search.
    pub async fn load(path: Option<&Path>) -> Result<BuglensConfig, ConfigError> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => Self::load_default().await,
        }
    }

    pub async fn load_from(path: &Path) -> Result<BuglensConfig, ConfigError> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<BuglensConfig, ConfigError> {
        if content.trim().is_empty() {
            return Ok(BuglensConfig::default());
        }
        let config: BuglensConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_yaml_keeps_other_defaults() {
        let config = ConfigLoader::parse(
            "triage:\n  models: [m1, m2]\n  rate_limit_max: 2\ndedup:\n  window_ms: 1000\n",
        )
        .unwrap();
        assert_eq!(config.triage.models, vec!["m1", "m2"]);
        assert_eq!(config.triage.rate_limit_max, 2);
        assert_eq!(config.triage.max_attempts, 3);
        assert_eq!(config.dedup.window_ms, 1000);
        assert_eq!(config.capture.buffer_cap, 200);
    }

    #[test]
    fn empty_file_is_default() {
        let config = ConfigLoader::parse("  \n").unwrap();
        assert_eq!(config.persistence.persistent_cap, 500);
    }

    #[test]
    fn malformed_yaml_is_a_parse_error() {
        assert!(matches!(
            ConfigLoader::parse("triage: [unterminated"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[tokio::test]
    async fn explicit_path_is_loaded() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "capture:\n  buffer_cap: 50").unwrap();
        let config = ConfigLoader::load(Some(file.path())).await.unwrap();
        assert_eq!(config.capture.buffer_cap, 50);
    }

    #[tokio::test]
    async fn missing_explicit_path_reports_io_error() {
        let err = ConfigLoader::load(Some(Path::new("/definitely/not/here.yaml")))
            .await
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
