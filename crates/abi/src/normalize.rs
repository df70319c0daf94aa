use alloy::dyn_abi::DynSolValue;
use serde_json::Value;

/// Normalizes a decoded ABI value into a JSON-safe representation per the
/// decode contract: addresses become checksummed hex, integers become
/// decimal strings (never passed through a float), fixed/dynamic bytes
/// become lowercase hex, strings pass through verbatim, and
/// arrays/tuples/structs normalize recursively.
pub fn normalize(value: &DynSolValue) -> Value {
    match value {
        DynSolValue::Address(addr) => Value::String(addr.to_checksum(None)),
        DynSolValue::Bool(b) => Value::Bool(*b),
        DynSolValue::Int(i, _) => Value::String(i.to_string()),
        DynSolValue::Uint(u, _) => Value::String(u.to_string()),
        DynSolValue::FixedBytes(bytes, size) => Value::String(format!(
            "0x{}",
            hex::encode(&bytes.as_slice()[..*size])
        )),
        DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
        DynSolValue::String(s) => Value::String(s.clone()),
        DynSolValue::Array(items) | DynSolValue::FixedArray(items) => {
            Value::Array(items.iter().map(normalize).collect())
        }
        DynSolValue::Tuple(items) => Value::Array(items.iter().map(normalize).collect()),
        DynSolValue::CustomStruct { prop_names, tuple, .. } => {
            let mut obj = serde_json::Map::new();
            for (name, field) in prop_names.iter().zip(tuple.iter()) {
                obj.insert(name.clone(), normalize(field));
            }
            Value::Object(obj)
        }
        DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
        other => Value::String(format!("{other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    #[test]
    fn normalizes_address_to_checksummed_string() {
        let addr = Address::from([0xaa; 20]);
        let value = DynSolValue::Address(addr);
        assert_eq!(normalize(&value), Value::String(addr.to_checksum(None)));
    }

    #[test]
    fn normalizes_uint_to_decimal_string_never_float() {
        let value = DynSolValue::Uint(U256::from(1_000_000_000_000_000_000u128), 256);
        assert_eq!(
            normalize(&value),
            Value::String("1000000000000000000".to_string())
        );
    }

    #[test]
    fn normalizes_bytes_to_lowercase_hex() {
        let value = DynSolValue::Bytes(vec![0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(normalize(&value), Value::String("0xdeadbeef".to_string()));
    }

    #[test]
    fn normalizes_array_recursively() {
        let value = DynSolValue::Array(vec![
            DynSolValue::Uint(U256::from(1u64), 256),
            DynSolValue::Uint(U256::from(2u64), 256),
        ]);
        assert_eq!(
            normalize(&value),
            Value::Array(vec![
                Value::String("1".to_string()),
                Value::String("2".to_string())
            ])
        );
    }
}
