//! Contract ABI loading.

use std::collections::BTreeMap;
use std::path::Path;

use alloy::json_abi::JsonAbi;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AbiError {
    #[error("ABI I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("ABI JSON invalid: {0}")]
    Json(#[from] serde_json::Error),

    #[error("ABI document has no 'abi' list")]
    MissingAbi,
}

/// Source of contract ABIs by contract name.
pub trait AbiRepository: Send + Sync {
    fn contract_abi(&self, name: &str) -> Option<JsonAbi>;
    fn contract_names(&self) -> Vec<String>;
}

/// Parse either a bare ABI array or an artifact object with an `abi` field.
pub fn parse_abi_document(text: &str) -> Result<JsonAbi, AbiError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let abi = match value {
        serde_json::Value::Array(_) => value,
        serde_json::Value::Object(mut map) => map.remove("abi").ok_or(AbiError::MissingAbi)?,
        _ => return Err(AbiError::MissingAbi),
    };
    Ok(serde_json::from_value(abi)?)
}

/// ABIs read from `*.json` files in a directory; the file stem is the
/// contract name.
#[derive(Debug, Clone, Default)]
pub struct FileAbiRepository {
    abis: BTreeMap<String, JsonAbi>,
}

impl FileAbiRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.json` under `dir`. Files that fail to parse are skipped
    /// with a warning.
    pub fn load_dir(dir: &Path) -> Result<Self, AbiError> {
        let mut repo = Self::new();
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            let parsed = std::fs::read_to_string(&path)
                .map_err(AbiError::from)
                .and_then(|text| parse_abi_document(&text));
            match parsed {
                Ok(abi) => repo.insert(name, abi),
                Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping ABI file"),
            }
        }
        tracing::debug!(dir = %dir.display(), contracts = repo.abis.len(), "Loaded ABIs");
        Ok(repo)
    }

    pub fn insert(&mut self, name: impl Into<String>, abi: JsonAbi) {
        self.abis.insert(name.into(), abi);
    }
}

impl AbiRepository for FileAbiRepository {
    fn contract_abi(&self, name: &str) -> Option<JsonAbi> {
        self.abis.get(name).cloned()
    }

    fn contract_names(&self) -> Vec<String> {
        self.abis.keys().cloned().collect()
    }
}
