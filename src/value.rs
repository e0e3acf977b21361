//! Resource data types and value representation

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::error::{Lwm2mError, Result};

/// Data types a resource can carry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Integer,
    Float,
    Boolean,
    Opaque,
    /// Unix timestamp in seconds
    Time,
    /// "obj:inst" link to another tree node
    ObjectLink,
}

/// A typed resource value
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Opaque(Vec<u8>),
    Time(i64),
    ObjectLink(u16, u16),
}

impl ResourceValue {
    /// The data type this value belongs to
    pub fn data_type(&self) -> DataType {
        match self {
            Self::String(_) => DataType::String,
            Self::Integer(_) => DataType::Integer,
            Self::Float(_) => DataType::Float,
            Self::Boolean(_) => DataType::Boolean,
            Self::Opaque(_) => DataType::Opaque,
            Self::Time(_) => DataType::Time,
            Self::ObjectLink(_, _) => DataType::ObjectLink,
        }
    }

    /// Empty value for a data type (initial resource state)
    pub fn empty(data_type: DataType) -> Self {
        match data_type {
            DataType::String => Self::String(String::new()),
            DataType::Integer => Self::Integer(0),
            DataType::Float => Self::Float(0.0),
            DataType::Boolean => Self::Boolean(false),
            DataType::Opaque => Self::Opaque(Vec::new()),
            DataType::Time => Self::Time(0),
            DataType::ObjectLink => Self::ObjectLink(0, 0),
        }
    }

    /// Numeric projection used for gt/lt/st threshold evaluation.
    /// Non-numeric values have no projection and bypass thresholds.
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Self::Integer(n) | Self::Time(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Self::String(_) | Self::Opaque(_) | Self::ObjectLink(_, _) => None,
        }
    }

    /// Render as the text/plain wire form
    pub fn to_text(&self) -> String {
        match self {
            Self::String(s) => s.clone(),
            Self::Integer(n) | Self::Time(n) => n.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => if *b { "1" } else { "0" }.to_string(),
            Self::Opaque(bytes) => BASE64.encode(bytes),
            Self::ObjectLink(obj, inst) => format!("{}:{}", obj, inst),
        }
    }

    /// Parse the text/plain wire form into a value of the given type
    pub fn from_text(text: &str, data_type: DataType) -> Result<Self> {
        match data_type {
            DataType::String => Ok(Self::String(text.to_string())),
            DataType::Integer => text
                .parse()
                .map(Self::Integer)
                .map_err(|_| type_error(text, "integer")),
            DataType::Float => text
                .parse()
                .map(Self::Float)
                .map_err(|_| type_error(text, "float")),
            DataType::Boolean => match text {
                "0" | "false" => Ok(Self::Boolean(false)),
                "1" | "true" => Ok(Self::Boolean(true)),
                _ => Err(type_error(text, "boolean")),
            },
            DataType::Opaque => BASE64
                .decode(text)
                .map(Self::Opaque)
                .map_err(|_| type_error(text, "base64 opaque")),
            DataType::Time => text
                .parse()
                .map(Self::Time)
                .map_err(|_| type_error(text, "time")),
            DataType::ObjectLink => {
                let (obj, inst) = text
                    .split_once(':')
                    .ok_or_else(|| type_error(text, "objlink"))?;
                let obj = obj.parse().map_err(|_| type_error(text, "objlink"))?;
                let inst = inst.parse().map_err(|_| type_error(text, "objlink"))?;
                Ok(Self::ObjectLink(obj, inst))
            }
        }
    }

    /// Build a value from raw payload bytes in the given data type
    pub fn from_bytes(bytes: &[u8], data_type: DataType) -> Result<Self> {
        if data_type == DataType::Opaque {
            return Ok(Self::Opaque(bytes.to_vec()));
        }
        let text = std::str::from_utf8(bytes)
            .map_err(|_| Lwm2mError::TypeConversion("payload is not valid UTF-8".into()))?;
        Self::from_text(text, data_type)
    }

    /// Raw byte form of the value (text form except for opaque)
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Opaque(bytes) => bytes.clone(),
            other => other.to_text().into_bytes(),
        }
    }
}

fn type_error(text: &str, expected: &str) -> Lwm2mError {
    Lwm2mError::TypeConversion(format!("cannot parse '{}' as {}", text, expected))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_roundtrip() {
        let value = ResourceValue::Integer(-42);
        let parsed = ResourceValue::from_text(&value.to_text(), DataType::Integer).unwrap();
        assert_eq!(parsed, value);

        let link = ResourceValue::ObjectLink(3, 0);
        assert_eq!(link.to_text(), "3:0");
        assert_eq!(
            ResourceValue::from_text("3:0", DataType::ObjectLink).unwrap(),
            link
        );
    }

    #[test]
    fn test_boolean_forms() {
        assert_eq!(
            ResourceValue::from_text("1", DataType::Boolean).unwrap(),
            ResourceValue::Boolean(true)
        );
        assert_eq!(
            ResourceValue::from_text("false", DataType::Boolean).unwrap(),
            ResourceValue::Boolean(false)
        );
        assert!(ResourceValue::from_text("yes", DataType::Boolean).is_err());
    }

    #[test]
    fn test_numeric_projection() {
        assert_eq!(ResourceValue::Integer(7).as_numeric(), Some(7.0));
        assert_eq!(ResourceValue::Boolean(true).as_numeric(), Some(1.0));
        assert_eq!(ResourceValue::String("7".into()).as_numeric(), None);
    }

    #[test]
    fn test_opaque_bytes() {
        let value = ResourceValue::from_bytes(&[0xDE, 0xAD], DataType::Opaque).unwrap();
        assert_eq!(value, ResourceValue::Opaque(vec![0xDE, 0xAD]));
        assert_eq!(value.to_bytes(), vec![0xDE, 0xAD]);
    }

    #[test]
    fn test_empty_matches_type() {
        for data_type in [
            DataType::String,
            DataType::Integer,
            DataType::Float,
            DataType::Boolean,
            DataType::Opaque,
            DataType::Time,
            DataType::ObjectLink,
        ] {
            assert_eq!(ResourceValue::empty(data_type).data_type(), data_type);
        }
    }
}
