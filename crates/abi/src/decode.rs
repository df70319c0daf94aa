use alloy::dyn_abi::DynSolType;
use alloy::primitives::B256;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use indexer_common::types::RawLog;

use crate::normalize::normalize;
use crate::registry::AbiRegistry;

/// Errors specific to decoding a single raw log.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("log has no topics")]
    EmptyTopics,

    #[error("unknown event for topic0 {0}")]
    UnknownEvent(String),

    #[error("indexed parameter count mismatch: expected {expected}, found {found}")]
    IndexedCountMismatch { expected: usize, found: usize },

    #[error("malformed topic word: {0}")]
    MalformedTopic(String),

    #[error("data decode failed: {0}")]
    DataDecode(String),

    #[error("malformed data hex: {0}")]
    MalformedData(String),
}

/// A decoded event, carrying the surrounding chain metadata verbatim from
/// the raw log it was decoded from.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub event_name: String,
    pub args: Value,
    pub block_number: u64,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u32,
    pub log_index: u32,
    pub timestamp: DateTime<Utc>,
}

/// Decodes a raw log into a `DecodedEvent` using the given registry.
///
/// `block_timestamp` is the canonical timestamp of the block the log was
/// mined in, fetched separately from the block header.
pub fn decode_log(
    registry: &AbiRegistry,
    log: &RawLog,
    block_timestamp: DateTime<Utc>,
) -> Result<DecodedEvent, DecodeError> {
    let topic0_hex = log.topics.first().ok_or(DecodeError::EmptyTopics)?;
    let topic0 = parse_topic(topic0_hex)?;

    let def = registry
        .by_topic0(&topic0)
        .ok_or_else(|| DecodeError::UnknownEvent(topic0_hex.clone()))?;

    let indexed_defs: Vec<_> = def.inputs.iter().filter(|i| i.indexed).collect();
    let non_indexed_defs: Vec<_> = def.inputs.iter().filter(|i| !i.indexed).collect();

    let indexed_topics = &log.topics[1..];
    if indexed_topics.len() != indexed_defs.len() {
        return Err(DecodeError::IndexedCountMismatch {
            expected: indexed_defs.len(),
            found: indexed_topics.len(),
        });
    }

    let mut args = serde_json::Map::new();

    for (input, topic_hex) in indexed_defs.iter().zip(indexed_topics.iter()) {
        let topic = parse_topic(topic_hex)?;
        let ty = DynSolType::parse(&input.ty)
            .map_err(|e| DecodeError::DataDecode(format!("{}: {e}", input.ty)))?;

        let value = if ty.is_dynamic() {
            // Indexed dynamic types carry only their keccak hash; store the
            // hash verbatim without attempting to recover the preimage.
            Value::String(format!("0x{}", hex::encode(topic.as_slice())))
        } else {
            let decoded = ty
                .abi_decode(topic.as_slice())
                .map_err(|e| DecodeError::DataDecode(format!("{}: {e}", input.name)))?;
            normalize(&decoded)
        };

        args.insert(input.name.clone(), value);
    }

    if !non_indexed_defs.is_empty() {
        let data = parse_data(&log.data)?;
        let tuple_ty = DynSolType::Tuple(
            non_indexed_defs
                .iter()
                .map(|i| {
                    DynSolType::parse(&i.ty)
                        .map_err(|e| DecodeError::DataDecode(format!("{}: {e}", i.ty)))
                })
                .collect::<Result<Vec<_>, _>>()?,
        );

        let decoded = tuple_ty
            .abi_decode_sequence(&data)
            .map_err(|e| DecodeError::DataDecode(e.to_string()))?;

        let values = match decoded {
            alloy::dyn_abi::DynSolValue::Tuple(values) => values,
            other => vec![other],
        };

        for (input, value) in non_indexed_defs.iter().zip(values.iter()) {
            args.insert(input.name.clone(), normalize(value));
        }
    }

    Ok(DecodedEvent {
        event_name: def.name.clone(),
        args: Value::Object(args),
        block_number: log.block_number,
        block_hash: log.block_hash.clone(),
        transaction_hash: log.transaction_hash.clone(),
        transaction_index: log.transaction_index,
        log_index: log.log_index,
        timestamp: block_timestamp,
    })
}

fn parse_topic(topic_hex: &str) -> Result<B256, DecodeError> {
    let stripped = topic_hex.strip_prefix("0x").unwrap_or(topic_hex);
    let bytes =
        hex::decode(stripped).map_err(|e| DecodeError::MalformedTopic(e.to_string()))?;
    B256::try_from(bytes.as_slice())
        .map_err(|_| DecodeError::MalformedTopic(format!("expected 32 bytes, got {}", bytes.len())))
}

fn parse_data(data_hex: &str) -> Result<Vec<u8>, DecodeError> {
    let stripped = data_hex.strip_prefix("0x").unwrap_or(data_hex);
    hex::decode(stripped).map_err(|e| DecodeError::MalformedData(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::AbiRegistry;
    use alloy::primitives::{Address, U256, keccak256};

    const TRANSFER_ABI: &str = r#"[
        {
            "type": "event",
            "name": "Transfer",
            "inputs": [
                {"name": "from", "type": "address", "indexed": true},
                {"name": "to", "type": "address", "indexed": true},
                {"name": "value", "type": "uint256", "indexed": false}
            ],
            "anonymous": false
        }
    ]"#;

    fn pad_address(addr: Address) -> String {
        let mut word = [0u8; 32];
        word[12..].copy_from_slice(addr.as_slice());
        format!("0x{}", hex::encode(word))
    }

    #[test]
    fn decodes_erc20_transfer_with_decimal_value() {
        let registry = AbiRegistry::parse(TRANSFER_ABI).unwrap();
        let topic0 = keccak256(b"Transfer(address,address,uint256)");
        let from = Address::from([0xaa; 20]);
        let to = Address::from([0xbb; 20]);

        let value = U256::from(1_000_000_000_000_000_000u128);
        let data = format!("0x{}", hex::encode(value.to_be_bytes::<32>()));

        let log = RawLog {
            address: "0x0000000000000000000000000000000000000AA".to_string(),
            topics: vec![
                format!("0x{}", hex::encode(topic0)),
                pad_address(from),
                pad_address(to),
            ],
            data,
            block_number: 100,
            block_hash: "0xblockhash".to_string(),
            transaction_hash: "0xTX01".to_string(),
            transaction_index: 0,
            log_index: 0,
        };

        let decoded = decode_log(&registry, &log, Utc::now()).unwrap();
        assert_eq!(decoded.event_name, "Transfer");
        assert_eq!(
            decoded.args.get("value").unwrap().as_str().unwrap(),
            "1000000000000000000"
        );
        assert_eq!(decoded.block_number, 100);
    }

    #[test]
    fn unknown_topic0_is_rejected() {
        let registry = AbiRegistry::parse(TRANSFER_ABI).unwrap();
        let log = RawLog {
            address: "0xcontract".to_string(),
            topics: vec![format!("0x{}", hex::encode([0u8; 32]))],
            data: "0x".to_string(),
            block_number: 1,
            block_hash: "0xh".to_string(),
            transaction_hash: "0xt".to_string(),
            transaction_index: 0,
            log_index: 0,
        };
        let err = decode_log(&registry, &log, Utc::now()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownEvent(_)));
    }
}
