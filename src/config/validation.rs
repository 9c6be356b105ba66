//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, multipliers > 1)
//! - Check chain definitions (unique ids, parseable URLs)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: RelayConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::collections::HashSet;

use crate::config::schema::RelayConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

pub fn validate_config(config: &RelayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.rpc.timeout_secs == 0 {
        errors.push(ValidationError::new("rpc.timeout_secs", "must be greater than 0"));
    }
    if config.rpc.receipt_poll_ms == 0 || config.rpc.pending_poll_ms == 0 {
        errors.push(ValidationError::new("rpc", "poll intervals must be greater than 0"));
    }
    if config.rate_limit.requests_per_second <= 0.0 {
        errors.push(ValidationError::new(
            "rate_limit.requests_per_second",
            "must be greater than 0",
        ));
    }
    if config.rate_limit.burst == 0 {
        errors.push(ValidationError::new("rate_limit.burst", "must be at least 1"));
    }
    if config.discovery.max_concurrent_probes == 0 {
        errors.push(ValidationError::new(
            "discovery.max_concurrent_probes",
            "must be at least 1",
        ));
    }
    if config.discovery.max_endpoints == 0 {
        errors.push(ValidationError::new("discovery.max_endpoints", "must be at least 1"));
    }
    if config.discovery.enabled && url::Url::parse(&config.discovery.registry_url).is_err() {
        errors.push(ValidationError::new("discovery.registry_url", "is not a valid URL"));
    }
    if config.submission.max_attempts == 0 {
        errors.push(ValidationError::new("submission.max_attempts", "must be at least 1"));
    }
    if config.submission.gas_bump <= 1.0 {
        errors.push(ValidationError::new("submission.gas_bump", "must be greater than 1"));
    }
    // zero means "use the default" for the safe settings, so only reject nonsense
    if config.safe.gas_buffer != 0.0 && config.safe.gas_buffer < 1.0 {
        errors.push(ValidationError::new("safe.gas_buffer", "must be at least 1"));
    }

    let mut seen_ids = HashSet::new();
    let mut seen_names = HashSet::new();
    for (i, chain) in config.chains.iter().enumerate() {
        let field = format!("chains[{}]", i);
        if chain.name.trim().is_empty() {
            errors.push(ValidationError::new(&field, "name must not be empty"));
        }
        if !seen_names.insert(chain.name.to_lowercase()) {
            errors.push(ValidationError::new(&field, format!("duplicate chain name '{}'", chain.name)));
        }
        if !seen_ids.insert(chain.chain_id) {
            errors.push(ValidationError::new(&field, format!("duplicate chain_id {}", chain.chain_id)));
        }
        if url::Url::parse(&chain.rpc_url).is_err() {
            errors.push(ValidationError::new(
                format!("{}.rpc_url", field),
                format!("'{}' is not a valid URL", chain.rpc_url),
            ));
        }
        for extra in &chain.extra_rpcs {
            if url::Url::parse(extra).is_err() {
                errors.push(ValidationError::new(
                    format!("{}.extra_rpcs", field),
                    format!("'{}' is not a valid URL", extra),
                ));
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
