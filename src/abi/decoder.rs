//! Revert data decoding.
//!
//! Built-in `Error(string)` and `Panic(uint256)` are always understood;
//! custom errors are looked up in a selector table built from ABIs. One
//! selector can map to several errors from different contracts, so decoding
//! returns every interpretation that parses.

use std::collections::{BTreeMap, HashMap};

use alloy::dyn_abi::{DynSolType, DynSolValue};
use alloy::hex;
use alloy::json_abi::JsonAbi;
use alloy::sol_types::{Panic, Revert, SolError};

use crate::abi::repository::AbiRepository;

/// Source label of the built-in errors.
pub const BUILT_IN: &str = "Built-in";

/// One custom error known by selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorSignature {
    pub name: String,
    pub types: Vec<String>,
    pub arg_names: Vec<String>,
    pub source: String,
    pub signature: String,
}

/// A successful interpretation of revert data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedError {
    pub name: String,
    pub message: String,
    pub source: String,
}

/// Human-readable meaning of a Solidity panic code.
pub fn panic_reason(code: u64) -> Option<&'static str> {
    Some(match code {
        0x00 => "Generic compiler panic",
        0x01 => "Assertion failed",
        0x11 => "Arithmetic overflow or underflow",
        0x12 => "Division or modulo by zero",
        0x21 => "Invalid enum value",
        0x22 => "Corrupted storage byte array",
        0x31 => "Pop on empty array",
        0x32 => "Array index out of bounds",
        0x41 => "Out of memory",
        0x51 => "Call to zero-initialized function",
        _ => return None,
    })
}

/// First `0x` followed by at least 8 hex digits in `text`.
pub fn extract_revert_data(text: &str) -> Option<String> {
    let bytes = text.as_bytes();
    let mut start = 0;
    while let Some(offset) = text[start..].find("0x") {
        let begin = start + offset;
        let digits = bytes[begin + 2..]
            .iter()
            .take_while(|b| b.is_ascii_hexdigit())
            .count();
        if digits >= 8 {
            return Some(text[begin..begin + 2 + digits].to_string());
        }
        start = begin + 2;
    }
    None
}

/// Selector table plus built-ins.
#[derive(Debug, Clone, Default)]
pub struct ErrorDecoder {
    selectors: HashMap<[u8; 4], Vec<ErrorSignature>>,
}

impl ErrorDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decoder over every ABI in `repo`.
    pub fn from_repository(repo: &dyn AbiRepository) -> Self {
        let mut decoder = Self::new();
        for name in repo.contract_names() {
            if let Some(abi) = repo.contract_abi(&name) {
                decoder.add_abi(&name, &abi);
            }
        }
        decoder
    }

    /// Register the custom errors of `abi` under `source`. The same error
    /// from the same source is registered once.
    pub fn add_abi(&mut self, source: &str, abi: &JsonAbi) {
        for error in abi.errors() {
            let entry = ErrorSignature {
                name: error.name.clone(),
                types: error.inputs.iter().map(|p| p.selector_type().into_owned()).collect(),
                arg_names: error.inputs.iter().map(|p| p.name.clone()).collect(),
                source: source.to_string(),
                signature: error.signature(),
            };
            let bucket = self.selectors.entry(error.selector().0).or_default();
            if !bucket
                .iter()
                .any(|e| e.source == entry.source && e.signature == entry.signature)
            {
                bucket.push(entry);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.selectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selectors.is_empty()
    }

    pub fn entries(&self, selector: [u8; 4]) -> &[ErrorSignature] {
        self.selectors.get(&selector).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Decode hex revert data (`0x` optional). Anything shorter than a
    /// selector plus one hex digit, or that fails to parse, yields nothing.
    pub fn decode(&self, data_hex: &str) -> Vec<DecodedError> {
        let data_hex = data_hex.trim();
        let prefixed = if data_hex.starts_with("0x") || data_hex.starts_with("0X") {
            data_hex.to_lowercase()
        } else {
            format!("0x{}", data_hex.to_lowercase())
        };
        if prefixed.len() <= 10 {
            return Vec::new();
        }
        match hex::decode(&prefixed) {
            Ok(bytes) => self.decode_bytes(&bytes),
            Err(_) => Vec::new(),
        }
    }

    pub fn decode_bytes(&self, data: &[u8]) -> Vec<DecodedError> {
        if data.len() < 4 {
            return Vec::new();
        }
        let selector: [u8; 4] = [data[0], data[1], data[2], data[3]];

        if selector == Revert::SELECTOR {
            return Revert::abi_decode(data)
                .map(|revert| {
                    vec![DecodedError {
                        name: "Error".to_string(),
                        message: format!("Error: {}", revert.reason),
                        source: BUILT_IN.to_string(),
                    }]
                })
                .unwrap_or_default();
        }

        if selector == Panic::SELECTOR {
            return Panic::abi_decode(data)
                .map(|panic| {
                    let code: u64 = panic.code.try_into().unwrap_or(u64::MAX);
                    let message = match panic_reason(code) {
                        Some(reason) => format!("Panic: {}", reason),
                        None => format!("Unknown panic code {}", panic.code),
                    };
                    vec![DecodedError {
                        name: "Panic".to_string(),
                        message,
                        source: BUILT_IN.to_string(),
                    }]
                })
                .unwrap_or_default();
        }

        let payload = &data[4..];
        self.entries(selector)
            .iter()
            .filter_map(|entry| decode_custom(entry, payload))
            .collect()
    }
}

fn decode_custom(entry: &ErrorSignature, payload: &[u8]) -> Option<DecodedError> {
    let types = entry
        .types
        .iter()
        .map(|t| DynSolType::parse(t))
        .collect::<Result<Vec<_>, _>>()
        .ok()?;
    let values = match DynSolType::Tuple(types).abi_decode_params(payload).ok()? {
        DynSolValue::Tuple(values) => values,
        single => vec![single],
    };

    let args: Vec<String> = values
        .iter()
        .enumerate()
        .map(|(i, value)| {
            let rendered = format_value(value);
            match entry.arg_names.get(i).filter(|n| !n.is_empty()) {
                Some(name) => format!("{}={}", name, rendered),
                None => rendered,
            }
        })
        .collect();

    Some(DecodedError {
        name: entry.name.clone(),
        message: format!("{}({})", entry.name, args.join(", ")),
        source: entry.source.clone(),
    })
}

fn format_value(value: &DynSolValue) -> String {
    match value {
        DynSolValue::Address(a) => a.to_string(),
        DynSolValue::Bool(b) => b.to_string(),
        DynSolValue::Uint(u, _) => u.to_string(),
        DynSolValue::Int(i, _) => i.to_string(),
        DynSolValue::String(s) => s.clone(),
        DynSolValue::Bytes(b) => hex::encode_prefixed(b),
        DynSolValue::FixedBytes(word, size) => hex::encode_prefixed(&word[..*size]),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
            let inner: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", inner.join(", "))
        }
        other => format!("{:?}", other),
    }
}

/// Decoder with per-contract tables and a shared fallback.
#[derive(Debug, Clone, Default)]
pub struct RevertDecoder {
    shared: ErrorDecoder,
    contracts: BTreeMap<String, ErrorDecoder>,
}

impl RevertDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_repository(repo: &dyn AbiRepository) -> Self {
        let mut decoder = Self::new();
        for name in repo.contract_names() {
            if let Some(abi) = repo.contract_abi(&name) {
                decoder.add_contract(&name, &abi);
            }
        }
        decoder
    }

    pub fn add_contract(&mut self, name: &str, abi: &JsonAbi) {
        self.shared.add_abi(name, abi);
        self.contracts
            .entry(name.to_string())
            .or_default()
            .add_abi(name, abi);
    }

    /// Explain the revert buried in `error_text`.
    ///
    /// Tries the `contract` table first, then every known ABI. Returns
    /// `None` when the text carries no revert data at all.
    pub fn explain(&self, error_text: &str, contract: Option<&str>) -> Option<String> {
        let data = extract_revert_data(error_text)?;

        let targeted = contract
            .and_then(|name| self.contracts.get(name))
            .map(|decoder| decoder.decode(&data))
            .unwrap_or_default();
        let decoded = if targeted.is_empty() {
            self.shared.decode(&data)
        } else {
            targeted
        };

        match decoded.first() {
            Some(first) => Some(first.message.clone()),
            None => Some(format!("unknown custom error {}", &data[..10.min(data.len())])),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};
    use alloy::sol_types::SolValue;

    const TOKEN_ABI: &str = r#"[
        {"type":"error","name":"InsufficientBalance","inputs":[
            {"name":"available","type":"uint256"},{"name":"required","type":"uint256"}]},
        {"type":"error","name":"TransferFailed","inputs":[
            {"name":"from","type":"address"},{"name":"to","type":"address"},{"name":"amount","type":"uint256"}]}
    ]"#;
    const PROTOCOL_ABI: &str = r#"[
        {"type":"error","name":"Paused","inputs":[]},
        {"type":"error","name":"InsufficientBalance","inputs":[
            {"name":"available","type":"uint256"},{"name":"required","type":"uint256"}]}
    ]"#;

    fn decoder() -> ErrorDecoder {
        let mut decoder = ErrorDecoder::new();
        decoder.add_abi("token.json", &serde_json::from_str(TOKEN_ABI).unwrap());
        decoder.add_abi("protocol.json", &serde_json::from_str(PROTOCOL_ABI).unwrap());
        decoder
    }

    fn selector_hex(signature: &str) -> String {
        hex::encode(&alloy::primitives::keccak256(signature)[..4])
    }

    #[test]
    fn test_table_entries() {
        let decoder = decoder();
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&alloy::primitives::keccak256("TransferFailed(address,address,uint256)")[..4]);
        let entry = &decoder.entries(selector)[0];
        assert_eq!(entry.types, vec!["address", "address", "uint256"]);
        assert_eq!(entry.arg_names, vec!["from", "to", "amount"]);
        assert_eq!(entry.source, "token.json");
        assert_eq!(entry.signature, "TransferFailed(address,address,uint256)");
        assert_eq!(decoder.len(), 3);
    }

    #[test]
    fn test_dedup_per_source() {
        let mut decoder = decoder();
        decoder.add_abi("token.json", &serde_json::from_str(TOKEN_ABI).unwrap());
        let mut selector = [0u8; 4];
        selector.copy_from_slice(&alloy::primitives::keccak256("InsufficientBalance(uint256,uint256)")[..4]);
        // once from token.json, once from protocol.json
        assert_eq!(decoder.entries(selector).len(), 2);
    }

    #[test]
    fn test_short_or_empty_input() {
        let decoder = decoder();
        assert!(decoder.decode("").is_empty());
        assert!(decoder.decode("0x1234").is_empty());
        assert!(decoder.decode("0x12345678").is_empty());
    }

    #[test]
    fn test_error_string() {
        let data = format!("08c379a0{}", hex::encode(("Insufficient funds".to_string(),).abi_encode_params()));
        let decoded = decoder().decode(&data);
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded[0].name, "Error");
        assert!(decoded[0].message.contains("Insufficient funds"));
        assert_eq!(decoded[0].source, BUILT_IN);
    }

    #[test]
    fn test_panic_codes() {
        for code in [0x00u64, 0x01, 0x11, 0x12, 0x21, 0x22, 0x31, 0x32, 0x41, 0x51] {
            let data = format!("0x4e487b71{}", hex::encode(U256::from(code).abi_encode()));
            let decoded = decoder().decode(&data);
            assert_eq!(decoded.len(), 1);
            assert_eq!(decoded[0].name, "Panic");
            assert!(decoded[0].message.contains(panic_reason(code).unwrap()));
        }

        let data = format!("0x4e487b71{}", hex::encode(U256::from(0x99u64).abi_encode()));
        assert!(decoder().decode(&data)[0].message.contains("Unknown panic code 153"));

        assert!(decoder().decode("0x4e487b71badc0de").is_empty());
    }

    #[test]
    fn test_custom_errors() {
        let decoder = decoder();

        let paused = decoder.decode(&format!("0x{}", selector_hex("Paused()")));
        assert_eq!(paused.len(), 0, "selector-only data is too short to decode");

        let data = format!(
            "0x{}{}",
            selector_hex("TransferFailed(address,address,uint256)"),
            hex::encode((Address::repeat_byte(1), Address::repeat_byte(2), U256::from(5u64)).abi_encode_params())
        );
        let decoded = decoder.decode(&data);
        assert_eq!(decoded.len(), 1);
        assert!(decoded[0].message.starts_with("TransferFailed(from=0x0101"));
        assert!(decoded[0].message.ends_with("amount=5)"));

        let data = format!(
            "0x{}{}",
            selector_hex("InsufficientBalance(uint256,uint256)").to_uppercase(),
            hex::encode((U256::from(100u64), U256::from(500u64)).abi_encode_params())
        );
        let decoded = decoder.decode(&data);
        assert_eq!(decoded.len(), 2);
        assert!(decoded.iter().all(|d| d.message == "InsufficientBalance(available=100, required=500)"));
    }

    #[test]
    fn test_extract_revert_data() {
        assert_eq!(
            extract_revert_data("execution reverted, data: 0xab12cd34ef"),
            Some("0xab12cd34ef".to_string())
        );
        assert_eq!(extract_revert_data("nonce 0x12 too low"), None);
        assert_eq!(
            extract_revert_data("0x12 then 0xdeadbeef00"),
            Some("0xdeadbeef00".to_string())
        );
    }

    #[test]
    fn test_revert_decoder_fallbacks() {
        let mut revert = RevertDecoder::new();
        revert.add_contract("token", &serde_json::from_str(TOKEN_ABI).unwrap());

        let data = format!(
            "0x{}{}",
            selector_hex("InsufficientBalance(uint256,uint256)"),
            hex::encode((U256::from(1u64), U256::from(2u64)).abi_encode_params())
        );
        let text = format!("execution reverted: {}", data);
        assert_eq!(
            revert.explain(&text, Some("token")).unwrap(),
            "InsufficientBalance(available=1, required=2)"
        );
        // unknown target falls back to the shared table
        assert!(revert.explain(&text, Some("other")).is_some());
        assert_eq!(
            revert.explain("reverted 0xdeadbeef00", None).unwrap(),
            "unknown custom error 0xdeadbeef"
        );
        assert_eq!(revert.explain("no data here", None), None);
    }
}
