//! Typed view over opaque component payloads.
//!
//! The wire carries [`ComponentData`] field maps; schema types implement
//! [`Component`] to convert to and from them through serde.

use nalgebra::Vector3;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use worldsync_env::{ComponentData, ComponentKind, ComponentUpdate};

/// A schema-defined component type.
pub trait Component: Serialize + DeserializeOwned {
    const KIND: ComponentKind;
    const NAME: &'static str;

    /// Encodes the full component state.
    fn to_data(&self) -> Result<ComponentData, serde_json::Error> {
        match serde_json::to_value(self)? {
            Value::Object(map) => Ok(ComponentData {
                fields: map.into_iter().collect(),
            }),
            other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
                "{} must encode as an object, got {}",
                Self::NAME,
                other
            ))),
        }
    }

    /// Decodes the full component state.
    fn from_data(data: &ComponentData) -> Result<Self, serde_json::Error> {
        let map: Map<String, Value> = data
            .fields
            .iter()
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        serde_json::from_value(Value::Object(map))
    }

    /// An update replacing every field of the component.
    fn to_update(&self) -> Result<ComponentUpdate, serde_json::Error> {
        Ok(ComponentUpdate {
            fields: self.to_data()?.fields,
            events: Vec::new(),
        })
    }
}

/// World position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Position {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn coords(&self) -> Vector3<f64> {
        Vector3::new(self.x, self.y, self.z)
    }
}

impl From<Vector3<f64>> for Position {
    fn from(v: Vector3<f64>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl Component for Position {
    const KIND: ComponentKind = ComponentKind::POSITION;
    const NAME: &'static str = "Position";
}

/// Descriptive metadata.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub entity_type: String,
}

impl Component for Metadata {
    const KIND: ComponentKind = ComponentKind::METADATA;
    const NAME: &'static str = "Metadata";
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_data() {
        let data = Position::new(1.0, 2.0, 3.0).to_data().unwrap();
        assert_eq!(data.field("y"), Some(&json!(2.0)));
        assert_eq!(Position::from_data(&data).unwrap().coords(), Vector3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn test_partial_data_fails_to_decode() {
        let data = ComponentData::new().with_field("x", 1.0);
        assert!(Position::from_data(&data).is_err());
    }
}
