use std::collections::HashMap;

use alloy::json_abi::{Event as AbiEvent, JsonAbi};
use alloy::primitives::B256;
use indexer_common::error::AppError;

/// A single event definition extracted from a contract ABI, indexed by both
/// its topic0 (keccak of the canonical signature) and its name.
#[derive(Debug, Clone)]
pub struct EventDef {
    pub name: String,
    pub signature: String,
    pub topic0: B256,
    pub inputs: Vec<EventInput>,
}

/// One parameter of an event definition, in declaration order.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub name: String,
    pub ty: String,
    pub indexed: bool,
}

/// Parses a contract's ABI text and exposes its event definitions by topic0
/// and by name, per the decode contract.
#[derive(Debug, Clone)]
pub struct AbiRegistry {
    by_topic0: HashMap<B256, EventDef>,
    by_name: HashMap<String, EventDef>,
}

impl AbiRegistry {
    /// Build a registry from raw ABI JSON text.
    pub fn parse(abi_text: &str) -> Result<Self, AppError> {
        let abi: JsonAbi = serde_json::from_str(abi_text)
            .map_err(|e| AppError::InvalidInput(format!("malformed ABI: {e}")))?;

        let mut by_topic0 = HashMap::new();
        let mut by_name = HashMap::new();

        for event in abi.events.values().flatten() {
            let def = event_def(event);
            by_name.insert(def.name.clone(), def.clone());
            by_topic0.insert(def.topic0, def);
        }

        Ok(Self {
            by_topic0,
            by_name,
        })
    }

    pub fn by_topic0(&self, topic0: &B256) -> Option<&EventDef> {
        self.by_topic0.get(topic0)
    }

    pub fn by_name(&self, name: &str) -> Option<&EventDef> {
        self.by_name.get(name)
    }

    pub fn len(&self) -> usize {
        self.by_topic0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_topic0.is_empty()
    }
}

fn event_def(event: &AbiEvent) -> EventDef {
    let inputs = event
        .inputs
        .iter()
        .map(|p| EventInput {
            name: p.name.clone(),
            ty: p.ty.clone(),
            indexed: p.indexed,
        })
        .collect();

    EventDef {
        name: event.name.clone(),
        signature: event.signature(),
        topic0: event.selector(),
        inputs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

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

    #[test]
    fn parses_event_and_indexes_by_name_and_topic0() {
        let registry = AbiRegistry::parse(TRANSFER_ABI).unwrap();
        assert_eq!(registry.len(), 1);

        let by_name = registry.by_name("Transfer").unwrap();
        assert_eq!(by_name.signature, "Transfer(address,address,uint256)");

        let by_topic0 = registry.by_topic0(&by_name.topic0).unwrap();
        assert_eq!(by_topic0.name, "Transfer");
        assert_eq!(by_topic0.inputs.len(), 3);
        assert!(by_topic0.inputs[0].indexed);
        assert!(!by_topic0.inputs[2].indexed);
    }

    #[test]
    fn rejects_malformed_abi_text() {
        let err = AbiRegistry::parse("not json").unwrap_err();
        assert!(matches!(err, AppError::InvalidInput(_)));
    }
}
