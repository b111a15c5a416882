//! Variable and dataset attributes.

use std::collections::BTreeMap;

use crate::dtype::Scalar;

/// An attribute value as found in a source granule.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Text(String),
    Scalar(Scalar),
    List(Vec<Scalar>),
}

/// Ordered attribute mapping.
pub type Attrs = BTreeMap<String, AttrValue>;

impl AttrValue {
    /// The scalar value, if this attribute holds exactly one.
    pub fn as_scalar(&self) -> Option<Scalar> {
        match self {
            Self::Scalar(s) => Some(*s),
            Self::List(values) if values.len() == 1 => Some(values[0]),
            _ => None,
        }
    }

    /// The text value, if any.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Plain JSON form of this value.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Text(s) => serde_json::Value::from(s.as_str()),
            Self::Scalar(s) => s.to_json(),
            Self::List(values) => {
                serde_json::Value::Array(values.iter().map(Scalar::to_json).collect())
            }
        }
    }

    /// Parse a JSON attribute value. Objects and nested arrays are kept as text.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let serde_json::Value::String(s) = value {
            return match Scalar::from_json(value) {
                Some(scalar) => Self::Scalar(scalar),
                None => Self::Text(s.clone()),
            };
        }
        if let Some(scalar) = Scalar::from_json(value) {
            return Self::Scalar(scalar);
        }
        if let serde_json::Value::Array(items) = value {
            let scalars: Option<Vec<Scalar>> = items.iter().map(Scalar::from_json).collect();
            if let Some(scalars) = scalars {
                return Self::List(scalars);
            }
        }
        Self::Text(value.to_string())
    }
}

impl From<&str> for AttrValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<Scalar> for AttrValue {
    fn from(s: Scalar) -> Self {
        Self::Scalar(s)
    }
}

/// Convert attributes into plain JSON values safe for serialization.
pub fn sanitize_attrs(attrs: &Attrs) -> serde_json::Map<String, serde_json::Value> {
    attrs
        .iter()
        .map(|(k, v)| (k.clone(), v.to_json()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_attrs() {
        let mut attrs = Attrs::new();
        attrs.insert("units".into(), AttrValue::from("m3 m-3"));
        attrs.insert("_FillValue".into(), AttrValue::Scalar(Scalar::Float(f64::NAN)));
        attrs.insert(
            "valid_range".into(),
            AttrValue::List(vec![Scalar::Float(0.0), Scalar::Float(1.0)]),
        );

        let json = sanitize_attrs(&attrs);
        assert_eq!(json["units"], serde_json::json!("m3 m-3"));
        assert_eq!(json["_FillValue"], serde_json::json!("NaN"));
        assert_eq!(json["valid_range"], serde_json::json!([0.0, 1.0]));
    }

    #[test]
    fn test_from_json() {
        assert_eq!(
            AttrValue::from_json(&serde_json::json!(-999)),
            AttrValue::Scalar(Scalar::Int(-999))
        );
        assert!(AttrValue::from_json(&serde_json::json!("NaN"))
            .as_scalar()
            .unwrap()
            .is_nan());
        assert_eq!(
            AttrValue::from_json(&serde_json::json!("UTC=2023-04-01T11:15:10")).as_str(),
            Some("UTC=2023-04-01T11:15:10")
        );
    }
}
