//! Statically declared item schemas.
//!
//! An [`ItemSchema`] lists the fields an item class produces, in order, with
//! a type and optional constraints. It supplies the default CSV header and
//! the `fields` array written into each data package resource.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value type of a field, named after the JSON schema / table schema types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    #[default]
    String,
    Integer,
    Number,
    Boolean,
    Date,
    Datetime,
    Any,
}

/// Optional restrictions on a field's values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub unique: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,
}

impl Constraints {
    pub fn is_empty(&self) -> bool {
        *self == Constraints::default()
    }
}

/// One declared field of an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSchema {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(rename = "type", default)]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Constraints::is_empty")]
    pub constraints: Constraints,
}

impl FieldSchema {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        FieldSchema {
            name: name.into(),
            title: None,
            field_type,
            format: None,
            description: None,
            constraints: Constraints::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = Some(format.into());
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    /// Title used in the manifest: the explicit one, or the field name with
    /// underscores turned into spaces and title-cased (each run of letters
    /// starts upper case, the rest is lower case).
    pub fn display_title(&self) -> String {
        if let Some(title) = &self.title {
            return title.clone();
        }
        let mut title = String::with_capacity(self.name.len());
        let mut previous_is_letter = false;
        for c in self.name.chars() {
            let c = if c == '_' { ' ' } else { c };
            if c.is_alphabetic() {
                if previous_is_letter {
                    title.extend(c.to_lowercase());
                } else {
                    title.extend(c.to_uppercase());
                }
                previous_is_letter = true;
            } else {
                title.push(c);
                previous_is_letter = false;
            }
        }
        title
    }

    /// Renders the field as a data package `fields` entry.
    pub fn to_descriptor(&self) -> Value {
        let mut map = Map::new();
        map.insert("name".into(), Value::String(self.name.clone()));
        map.insert("title".into(), Value::String(self.display_title()));
        map.insert(
            "type".into(),
            serde_json::to_value(self.field_type).unwrap_or(Value::Null),
        );
        if let Some(format) = &self.format {
            map.insert("format".into(), Value::String(format.clone()));
        }
        if let Some(description) = &self.description {
            map.insert("description".into(), Value::String(description.clone()));
        }
        if !self.constraints.is_empty() {
            if let Ok(value) = serde_json::to_value(&self.constraints) {
                map.insert("constraints".into(), value);
            }
        }
        Value::Object(map)
    }
}

/// Ordered list of fields for one item class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemSchema {
    pub fields: Vec<FieldSchema>,
}

impl ItemSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        ItemSchema { fields }
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.iter().map(|f| f.name.clone()).collect()
    }

    /// Manifest descriptors for the fields that appear in `header`, kept in
    /// schema order.
    pub fn descriptors_for(&self, header: &[String]) -> Vec<Value> {
        self.fields
            .iter()
            .filter(|f| header.iter().any(|h| h == &f.name))
            .map(FieldSchema::to_descriptor)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ItemSchema {
        ItemSchema::new(vec![
            FieldSchema::new("product_id", FieldType::Integer),
            FieldSchema::new("name", FieldType::String).with_title("Product"),
            FieldSchema::new("price", FieldType::Number).with_constraints(Constraints {
                minimum: Some(0.0),
                ..Default::default()
            }),
        ])
    }

    #[test]
    fn derived_title_capitalizes_words() {
        let field = FieldSchema::new("last_seen_at", FieldType::Datetime);
        assert_eq!(field.display_title(), "Last Seen At");
    }

    #[test]
    fn derived_title_lowercases_inside_words() {
        let title = |name: &str| FieldSchema::new(name, FieldType::String).display_title();
        assert_eq!(title("productID"), "Productid");
        assert_eq!(title("page2url"), "Page2Url");
        assert_eq!(title("a__b"), "A  B");
    }

    #[test]
    fn descriptors_follow_schema_order_and_skip_unlisted_fields() {
        let header = vec!["price".to_string(), "product_id".to_string()];
        let fields = schema().descriptors_for(&header);
        assert_eq!(
            fields,
            vec![
                json!({"name": "product_id", "title": "Product Id", "type": "integer"}),
                json!({
                    "name": "price",
                    "title": "Price",
                    "type": "number",
                    "constraints": {"minimum": 0.0}
                }),
            ]
        );
    }

    #[test]
    fn schema_deserializes_from_json() {
        let schema: ItemSchema = serde_json::from_value(json!({
            "fields": [
                {"name": "url", "type": "string", "format": "uri",
                 "constraints": {"required": true}},
                {"name": "rank"}
            ]
        }))
        .unwrap();
        assert_eq!(schema.field_names(), vec!["url", "rank"]);
        assert!(schema.fields[0].constraints.required);
        assert_eq!(schema.fields[1].field_type, FieldType::String);
    }
}
