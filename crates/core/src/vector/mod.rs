//! Vector features read from GeoJSON

use crate::error::{Error, Result};
use geo_types::Geometry;
use geojson::GeoJson;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Integer value; floats are accepted when they are whole numbers
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            AttributeValue::Float(v) if v.fract() == 0.0 => Some(*v as i64),
            AttributeValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<&JsonValue> for AttributeValue {
    fn from(value: &JsonValue) -> Self {
        match value {
            JsonValue::Null => AttributeValue::Null,
            JsonValue::Bool(b) => AttributeValue::Bool(*b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => AttributeValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            JsonValue::String(s) => AttributeValue::String(s.clone()),
            other => AttributeValue::String(other.to_string()),
        }
    }
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: HashMap<String, AttributeValue>,
    pub id: Option<String>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: HashMap::new(),
            id: None,
        }
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }

    fn from_geojson(feature: geojson::Feature) -> Result<Self> {
        let geometry = feature
            .geometry
            .map(Geometry::<f64>::try_from)
            .transpose()?;
        let properties = feature
            .properties
            .iter()
            .flatten()
            .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
            .collect();
        let id = feature.id.map(|id| match id {
            geojson::feature::Id::String(s) => s,
            geojson::feature::Id::Number(n) => n.to_string(),
        });
        Ok(Self {
            geometry,
            properties,
            id,
        })
    }
}

/// Collection of features
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self { features: Vec::new() }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

/// Parse GeoJSON text. A bare geometry becomes a single property-less
/// feature.
pub fn parse_geojson(text: &str) -> Result<FeatureCollection> {
    let features = match text.parse::<GeoJson>()? {
        GeoJson::FeatureCollection(fc) => fc
            .features
            .into_iter()
            .map(Feature::from_geojson)
            .collect::<Result<Vec<_>>>()?,
        GeoJson::Feature(f) => vec![Feature::from_geojson(f)?],
        GeoJson::Geometry(g) => vec![Feature::new(Geometry::<f64>::try_from(g)?)],
    };
    Ok(FeatureCollection { features })
}

/// Read every feature of a GeoJSON file
pub fn read_geojson(path: impl AsRef<Path>) -> Result<FeatureCollection> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    parse_geojson(&text).map_err(|e| match e {
        Error::GeoJson(msg) => Error::GeoJson(format!("{}: {}", path.display(), msg)),
        other => other,
    })
}
