//! Feature records owned by a remote feature collection
//!
//! Records are only ever referenced by this crate, never mutated.

use crate::MapPoint;
use serde_json::{Map, Value};

/// Stable object identifier of a feature
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(pub i64);

impl std::fmt::Display for ObjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point feature with its attributes
#[derive(Clone, Debug, PartialEq)]
pub struct FeatureRecord {
    pub object_id: ObjectId,
    pub location: MapPoint,
    pub attributes: Map<String, Value>,
}

impl FeatureRecord {
    pub fn new(object_id: ObjectId, location: MapPoint, attributes: Map<String, Value>) -> Self {
        Self {
            object_id,
            location,
            attributes,
        }
    }

    /// Attribute rendered as display text (empty for missing or null values)
    pub fn attribute_text(&self, field: &str) -> String {
        match self.attributes.get(field) {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }
}

/// One labelled field of a detail template
#[derive(Clone, Debug, PartialEq)]
pub struct FieldInfo {
    pub field_name: String,
    pub label: String,
}

impl FieldInfo {
    pub fn new(field_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            label: label.into(),
        }
    }
}

/// Template describing how a hovered feature is shown in the detail display
///
/// Only features whose layer declares a template are eligible for highlighting.
#[derive(Clone, Debug, PartialEq)]
pub struct DetailTemplate {
    pub title: String,
    pub fields: Vec<FieldInfo>,
}

impl DetailTemplate {
    /// Template of the Edinburgh trees layer
    pub fn trees() -> Self {
        Self {
            title: "Tree Information".to_string(),
            fields: vec![
                FieldInfo::new("DisplaySpecies", "Tree species"),
                FieldInfo::new("CommonName", "Common name"),
                FieldInfo::new("LatinName", "Latin name"),
                FieldInfo::new("AgeGroup", "Rough age"),
            ],
        }
    }

    /// (label, value) rows for a feature
    pub fn render(&self, feature: &FeatureRecord) -> Vec<(String, String)> {
        self.fields
            .iter()
            .map(|f| (f.label.clone(), feature.attribute_text(&f.field_name)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::SpatialReference;
    use serde_json::json;

    #[test]
    fn test_render_template() {
        let attributes = json!({
            "OBJECTID": 7,
            "DisplaySpecies": "Oak",
            "CommonName": "English oak",
            "LatinName": "Quercus robur",
            "AgeGroup": null
        });
        let feature = FeatureRecord::new(
            ObjectId(7),
            MapPoint::new(0.0, 0.0, SpatialReference::WEB_MERCATOR),
            attributes.as_object().cloned().unwrap_or_default(),
        );

        let rows = DetailTemplate::trees().render(&feature);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], ("Tree species".to_string(), "Oak".to_string()));
        assert_eq!(rows[2].1, "Quercus robur");
        assert_eq!(rows[3].1, "");
        assert_eq!(feature.attribute_text("OBJECTID"), "7");
    }
}
