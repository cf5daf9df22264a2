mod types;

pub use types::*;

use anyhow::{Context, Result};
use std::path::Path;

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: Config = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    validate_config(&config)?;

    Ok(config)
}

/// Load config from default locations or return default config
pub fn load_config_or_default(custom_path: Option<&Path>) -> Result<Config> {
    if let Some(path) = custom_path {
        return load_config(path);
    }

    let default_paths = [
        "./vidgrab.toml",
        "~/.config/vidgrab/config.toml",
        "/etc/vidgrab/config.toml",
    ];

    for path_str in default_paths {
        let path = shellexpand::tilde(path_str);
        let path = Path::new(path.as_ref());
        if path.exists() {
            return load_config(path);
        }
    }

    Ok(Config::default())
}

/// Validate configuration
fn validate_config(config: &Config) -> Result<()> {
    if config.limits.max_concurrent_downloads == 0 {
        anyhow::bail!("limits.max_concurrent_downloads must be at least 1");
    }
    if config.limits.job_ttl_hours == 0 {
        anyhow::bail!("limits.job_ttl_hours must be at least 1");
    }
    if config.limits.rate_limit_per_minute == 0 {
        anyhow::bail!("limits.rate_limit_per_minute must be at least 1");
    }
    if config.security.allowed_domains.is_empty() {
        anyhow::bail!("security.allowed_domains must not be empty");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.limits.max_concurrent_downloads, 3);
        assert_eq!(config.limits.job_ttl_hours, 24);
        assert!(config
            .security
            .allowed_domains
            .iter()
            .any(|d| d == "youtube.com"));
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[server]
port = 9090

[limits]
max_concurrent_downloads = 1

[security]
allowed_domains = ["example.com"]
"#
        )
        .unwrap();

        let config = load_config(file.path()).unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.limits.max_concurrent_downloads, 1);
        assert_eq!(config.limits.rate_limit_per_minute, 10);
        assert_eq!(config.security.allowed_domains, vec!["example.com"]);
        assert_eq!(config.tools.ytdlp, "yt-dlp");
    }

    #[test]
    fn rejects_zero_concurrency() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[limits]
max_concurrent_downloads = 0
"#
        )
        .unwrap();

        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn rejects_empty_domain_allow_list() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[security]
allowed_domains = []
"#
        )
        .unwrap();

        assert!(load_config(file.path()).is_err());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        assert!(load_config(Path::new("/nonexistent/vidgrab.toml")).is_err());
    }
}
