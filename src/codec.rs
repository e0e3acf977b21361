//! Payload codec collaborator interface
//!
//! The dispatcher hands the codec a [`NodeView`] to serialize and gets
//! opaque bytes back; decoding produces raw entries the dispatcher coerces
//! against the target node's data type. [`JsonCodec`] is the reference
//! implementation covering text/plain, opaque, JSON and CBOR content
//! formats; TLV stays with an external codec.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde_json::{Map, Value};

use crate::coap_types::ContentFormat;
use crate::error::{Lwm2mError, Result};
use crate::value::{DataType, ResourceValue};

/// Whether a decoded payload replaces values (PUT) or creates nodes (POST)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeMode {
    Put,
    Post,
}

/// Snapshot of a tree node handed to the codec
#[derive(Debug, Clone, PartialEq)]
pub enum NodeView {
    /// A leaf value (resource or resource instance)
    Value(ResourceValue),
    /// A container: object instances, resources, or resource instances
    Entries(Vec<(u16, NodeView)>),
}

/// Decoded payload, before coercion against target data types
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Raw leaf bytes (text/plain or opaque payload)
    Bytes(Vec<u8>),
    /// Id-to-value entries from a structured payload
    Entries(Vec<(u16, Value)>),
}

/// Codec collaborator: serialize a node view, deserialize a payload
pub trait PayloadCodec {
    fn serialize(&self, view: &NodeView, format: ContentFormat) -> Result<Vec<u8>>;
    fn deserialize(&self, payload: &[u8], format: ContentFormat, mode: DecodeMode) -> Result<Decoded>;
}

/// Reference codec over serde_json / ciborium
#[derive(Debug, Default)]
pub struct JsonCodec;

impl JsonCodec {
    pub fn new() -> Self {
        Self
    }

    fn view_to_json(view: &NodeView) -> Value {
        match view {
            NodeView::Value(value) => value_to_json(value),
            NodeView::Entries(entries) => {
                let mut map = Map::new();
                for (id, child) in entries {
                    map.insert(id.to_string(), Self::view_to_json(child));
                }
                Value::Object(map)
            }
        }
    }

    fn json_to_entries(value: Value) -> Result<Vec<(u16, Value)>> {
        let Value::Object(map) = value else {
            return Err(Lwm2mError::Decode("expected a map of resource ids".into()));
        };
        let mut entries = Vec::with_capacity(map.len());
        for (key, value) in map {
            let id: u16 = key
                .parse()
                .map_err(|_| Lwm2mError::Decode(format!("bad resource id '{}'", key)))?;
            entries.push((id, value));
        }
        Ok(entries)
    }
}

impl PayloadCodec for JsonCodec {
    fn serialize(&self, view: &NodeView, format: ContentFormat) -> Result<Vec<u8>> {
        match format {
            ContentFormat::TextPlain => match view {
                NodeView::Value(value) => Ok(value.to_text().into_bytes()),
                NodeView::Entries(_) => Err(Lwm2mError::NotAcceptable(format.as_u16())),
            },
            ContentFormat::Opaque => match view {
                NodeView::Value(value) => Ok(value.to_bytes()),
                NodeView::Entries(_) => Err(Lwm2mError::NotAcceptable(format.as_u16())),
            },
            ContentFormat::Json => serde_json::to_vec(&Self::view_to_json(view))
                .map_err(|e| Lwm2mError::Encode(e.to_string())),
            ContentFormat::Cbor => {
                let mut bytes = Vec::new();
                ciborium::into_writer(&Self::view_to_json(view), &mut bytes)
                    .map_err(|e| Lwm2mError::Encode(e.to_string()))?;
                Ok(bytes)
            }
            ContentFormat::Tlv | ContentFormat::LinkFormat => {
                Err(Lwm2mError::NotAcceptable(format.as_u16()))
            }
        }
    }

    fn deserialize(&self, payload: &[u8], format: ContentFormat, mode: DecodeMode) -> Result<Decoded> {
        match format {
            ContentFormat::TextPlain | ContentFormat::Opaque => {
                if mode == DecodeMode::Post {
                    // create needs structured entries carrying the new id
                    return Err(Lwm2mError::Decode("create needs a structured payload".into()));
                }
                Ok(Decoded::Bytes(payload.to_vec()))
            }
            ContentFormat::Json => {
                let value: Value = serde_json::from_slice(payload)
                    .map_err(|e| Lwm2mError::Decode(e.to_string()))?;
                Ok(Decoded::Entries(Self::json_to_entries(value)?))
            }
            ContentFormat::Cbor => {
                let value: Value = ciborium::from_reader(payload)
                    .map_err(|e| Lwm2mError::Decode(e.to_string()))?;
                Ok(Decoded::Entries(Self::json_to_entries(value)?))
            }
            ContentFormat::Tlv | ContentFormat::LinkFormat => {
                Err(Lwm2mError::UnsupportedContentFormat)
            }
        }
    }
}

/// Render a typed value as its JSON form
pub fn value_to_json(value: &ResourceValue) -> Value {
    match value {
        ResourceValue::String(s) => Value::String(s.clone()),
        ResourceValue::Integer(n) | ResourceValue::Time(n) => Value::Number((*n).into()),
        ResourceValue::Float(f) => serde_json::Number::from_f64(*f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ResourceValue::Boolean(b) => Value::Bool(*b),
        ResourceValue::Opaque(bytes) => Value::String(BASE64.encode(bytes)),
        ResourceValue::ObjectLink(obj, inst) => Value::String(format!("{}:{}", obj, inst)),
    }
}

/// Coerce a decoded JSON value into the target node's data type
pub fn value_from_json(value: &Value, data_type: DataType) -> Result<ResourceValue> {
    match (data_type, value) {
        (DataType::String, Value::String(s)) => Ok(ResourceValue::String(s.clone())),
        (DataType::Integer, Value::Number(n)) => n
            .as_i64()
            .map(ResourceValue::Integer)
            .ok_or_else(|| conversion_error(value, data_type)),
        (DataType::Float, Value::Number(n)) => n
            .as_f64()
            .map(ResourceValue::Float)
            .ok_or_else(|| conversion_error(value, data_type)),
        (DataType::Boolean, Value::Bool(b)) => Ok(ResourceValue::Boolean(*b)),
        (DataType::Time, Value::Number(n)) => n
            .as_i64()
            .map(ResourceValue::Time)
            .ok_or_else(|| conversion_error(value, data_type)),
        (DataType::Opaque, Value::String(s)) => BASE64
            .decode(s)
            .map(ResourceValue::Opaque)
            .map_err(|_| conversion_error(value, data_type)),
        (DataType::ObjectLink, Value::String(s)) => {
            ResourceValue::from_text(s, DataType::ObjectLink)
        }
        // tolerate string forms of scalar types, as registration payloads do
        (_, Value::String(s)) => ResourceValue::from_text(s, data_type),
        _ => Err(conversion_error(value, data_type)),
    }
}

fn conversion_error(value: &Value, data_type: DataType) -> Lwm2mError {
    Lwm2mError::TypeConversion(format!("cannot convert {} to {:?}", value, data_type))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serialize_leaf_text() {
        let codec = JsonCodec::new();
        let view = NodeView::Value(ResourceValue::String("v2".into()));
        let bytes = codec.serialize(&view, ContentFormat::TextPlain).unwrap();
        assert_eq!(bytes, b"v2");
    }

    #[test]
    fn test_serialize_container_text_rejected() {
        let codec = JsonCodec::new();
        let view = NodeView::Entries(vec![(1, NodeView::Value(ResourceValue::Integer(5)))]);
        assert!(matches!(
            codec.serialize(&view, ContentFormat::TextPlain),
            Err(Lwm2mError::NotAcceptable(0))
        ));
    }

    #[test]
    fn test_json_container_roundtrip() {
        let codec = JsonCodec::new();
        let view = NodeView::Entries(vec![
            (1, NodeView::Value(ResourceValue::Integer(5))),
            (2, NodeView::Value(ResourceValue::String("abc".into()))),
        ]);
        let bytes = codec.serialize(&view, ContentFormat::Json).unwrap();

        let decoded = codec
            .deserialize(&bytes, ContentFormat::Json, DecodeMode::Post)
            .unwrap();
        let Decoded::Entries(mut entries) = decoded else {
            panic!("expected entries");
        };
        entries.sort_by_key(|(id, _)| *id);
        assert_eq!(entries[0], (1, serde_json::json!(5)));
        assert_eq!(entries[1], (2, serde_json::json!("abc")));
    }

    #[test]
    fn test_cbor_container_roundtrip() {
        let codec = JsonCodec::new();
        let view = NodeView::Entries(vec![(7, NodeView::Value(ResourceValue::Boolean(true)))]);
        let bytes = codec.serialize(&view, ContentFormat::Cbor).unwrap();
        let decoded = codec
            .deserialize(&bytes, ContentFormat::Cbor, DecodeMode::Put)
            .unwrap();
        assert_eq!(
            decoded,
            Decoded::Entries(vec![(7, serde_json::json!(true))])
        );
    }

    #[test]
    fn test_post_rejects_plain_leaf() {
        let codec = JsonCodec::new();
        assert!(
            codec
                .deserialize(b"5", ContentFormat::TextPlain, DecodeMode::Post)
                .is_err()
        );
    }

    #[test]
    fn test_value_from_json_coercion() {
        assert_eq!(
            value_from_json(&serde_json::json!(42), DataType::Integer).unwrap(),
            ResourceValue::Integer(42)
        );
        assert_eq!(
            value_from_json(&serde_json::json!("3:0"), DataType::ObjectLink).unwrap(),
            ResourceValue::ObjectLink(3, 0)
        );
        assert!(value_from_json(&serde_json::json!([1, 2]), DataType::Integer).is_err());
    }
}
