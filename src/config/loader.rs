//! Configuration loading from disk.

use std::fs;
use std::path::Path;

use crate::config::schema::RelayConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<RelayConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    parse_config(&content, |key| std::env::var(key).ok())
}

/// Parse, apply environment overrides, validate.
///
/// `env` is consulted for `<NAME>_RPC` per chain (name uppercased). A comma
/// separated value replaces the primary URL with the first entry and adds
/// the rest as extras.
pub fn parse_config<F>(content: &str, env: F) -> Result<RelayConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config: RelayConfig = toml::from_str(content).map_err(ConfigError::Parse)?;
    apply_env_overrides(&mut config, env);
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

fn apply_env_overrides<F>(config: &mut RelayConfig, env: F)
where
    F: Fn(&str) -> Option<String>,
{
    for chain in &mut config.chains {
        let key = format!("{}_RPC", chain.name.to_uppercase());
        let Some(value) = env(&key) else { continue };

        let mut urls = value
            .split(',')
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
        let Some(primary) = urls.next() else { continue };

        tracing::debug!(chain = %chain.name, env = %key, "RPC override from environment");
        let previous = std::mem::replace(&mut chain.rpc_url, primary);
        let mut extras: Vec<String> = urls.collect();
        extras.push(previous);
        for extra in chain.extra_rpcs.drain(..) {
            extras.push(extra);
        }
        extras.retain(|u| u != &chain.rpc_url);
        extras.dedup();
        chain.extra_rpcs = extras;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
        [rate_limit]
        requests_per_second = 5.0
        burst = 10

        [[chains]]
        name = "gnosis"
        chain_id = 100
        rpc_url = "https://rpc.gnosischain.com"
        native_currency = "xDAI"

        [chains.tokens]
        OLAS = "0xcE11e14225575945b8E6Dc0D4F2dD4C570f79d9f"
    "#;

    #[test]
    fn test_parse_sample() {
        let config = parse_config(SAMPLE, |_| None).unwrap();
        assert_eq!(config.rate_limit.burst, 10);
        assert_eq!(config.rpc.timeout_secs, 10);
        let chain = config.chain("gnosis").unwrap();
        assert_eq!(chain.native_currency, "xDAI");
        assert_eq!(chain.tokens.len(), 1);
        assert!(config.chain("100").is_some());
    }

    #[test]
    fn test_env_override_splits_urls() {
        let config = parse_config(SAMPLE, |key| {
            (key == "GNOSIS_RPC")
                .then(|| "https://a.example.com, https://b.example.com".to_string())
        })
        .unwrap();
        let chain = config.chain("gnosis").unwrap();
        assert_eq!(chain.rpc_url, "https://a.example.com");
        assert_eq!(
            chain.extra_rpcs,
            vec!["https://b.example.com", "https://rpc.gnosischain.com"]
        );
    }

    #[test]
    fn test_invalid_toml() {
        let err = parse_config("chains = 3", |_| None).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(err.to_string().starts_with("IO error"));
    }
}
