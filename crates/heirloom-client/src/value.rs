use serde::{Deserialize, Serialize};

use crate::address::Address;

/// Typed contract argument or return value.
///
/// `I128` travels as a decimal string so JSON consumers without 128-bit
/// integers keep full precision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ScValue {
    Void,
    Bool(bool),
    U64(u64),
    I128(#[serde(with = "i128_string")] i128),
    Address(Address),
    Vec(Vec<ScValue>),
}

impl ScValue {
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::Bool(_) => "bool",
            Self::U64(_) => "u64",
            Self::I128(_) => "i128",
            Self::Address(_) => "address",
            Self::Vec(_) => "vec",
        }
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::U64(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            Self::I128(value) => Some(*value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_address(&self) -> Option<&Address> {
        match self {
            Self::Address(value) => Some(value),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_vec(&self) -> Option<&[ScValue]> {
        match self {
            Self::Vec(values) => Some(values),
            _ => None,
        }
    }
}

mod i128_string {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &i128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.trim().parse::<i128>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::ScValue;

    #[test]
    fn i128_is_carried_as_string() -> Result<(), serde_json::Error> {
        let value = ScValue::I128(-170_141_183_460_469_231_731_687_303_715_884_105_728);
        let encoded = serde_json::to_value(&value)?;
        assert_eq!(
            encoded,
            json!({"type": "i128", "value": "-170141183460469231731687303715884105728"})
        );
        assert_eq!(serde_json::from_value::<ScValue>(encoded)?, value);
        Ok(())
    }

    #[test]
    fn void_has_no_content() -> Result<(), serde_json::Error> {
        assert_eq!(serde_json::to_value(ScValue::Void)?, json!({"type": "void"}));
        Ok(())
    }

    #[test]
    fn nested_vec_decodes() -> Result<(), serde_json::Error> {
        let decoded: ScValue = serde_json::from_value(json!({
            "type": "vec",
            "value": [{"type": "u64", "value": 300}, {"type": "bool", "value": true}]
        }))?;
        let items = decoded.as_vec().unwrap_or_default();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_u64(), Some(300));
        assert_eq!(items[1].as_bool(), Some(true));
        Ok(())
    }
}
