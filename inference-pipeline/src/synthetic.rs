//! Schema-driven synthetic values, used for backfilling model output and by
//! the offline generator.

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use rand::{seq::SliceRandom, Rng};
use serde_json::{json, Map, Number, Value};

const WORDS: [&str; 24] = [
    "amber", "basalt", "cinder", "drift", "echo", "fern", "granite", "hollow", "inlet", "juniper",
    "kestrel", "lantern", "meadow", "nimbus", "onyx", "prairie", "quill", "rowan", "summit",
    "thistle", "umber", "vale", "willow", "yarrow",
];

const MOCK_FIELD_KINDS: [&str; 4] = ["string", "number", "boolean", "date"];

/// Declared type of one schema field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    Integer,
    Number,
    Boolean,
    Timestamp,
    Text,
    Enum(Vec<Value>),
    Array,
    Object(Vec<SchemaField>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SchemaField {
    pub name: String,
    pub kind: FieldKind,
}

fn kind_from_type_name(type_name: &str) -> FieldKind {
    let normalized = type_name.to_lowercase();
    if normalized.contains("int") {
        FieldKind::Integer
    } else if normalized == "number" || normalized == "float" || normalized == "double" {
        FieldKind::Number
    } else if normalized == "boolean" || normalized == "bool" {
        FieldKind::Boolean
    } else if normalized.contains("date") || normalized.contains("time") {
        FieldKind::Timestamp
    } else if normalized == "array" {
        FieldKind::Array
    } else {
        FieldKind::Text
    }
}

/// First non-null entry of a `type` that may be a string or a list of strings.
fn declared_type(definition: &Value, key: &str) -> Option<String> {
    match definition.get(key)? {
        Value::String(name) => Some(name.clone()),
        Value::Array(names) => names
            .iter()
            .filter_map(Value::as_str)
            .find(|name| *name != "null")
            .map(str::to_string),
        _ => None,
    }
}

fn kind_of(definition: &Value) -> FieldKind {
    if let Some(options) = definition.get("enum").and_then(Value::as_array) {
        if !options.is_empty() {
            return FieldKind::Enum(options.clone());
        }
    }

    let type_name = declared_type(definition, "type")
        .or_else(|| declared_type(definition, "datatype"))
        .unwrap_or_else(|| "string".to_string());

    if type_name.eq_ignore_ascii_case("object") {
        return FieldKind::Object(schema_fields(definition));
    }

    let format = definition
        .get("format")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if type_name.eq_ignore_ascii_case("string")
        && (format.contains("date") || format.contains("time"))
    {
        return FieldKind::Timestamp;
    }

    kind_from_type_name(&type_name)
}

/// Fields declared by a schema. A non-empty `fields` list wins over `properties`.
pub fn schema_fields(schema: &Value) -> Vec<SchemaField> {
    let from_list: Vec<SchemaField> = schema
        .get("fields")
        .and_then(Value::as_array)
        .map(|fields| {
            fields
                .iter()
                .filter_map(|field| {
                    let name = field.get("name").and_then(Value::as_str)?;
                    (!name.is_empty()).then(|| SchemaField {
                        name: name.to_string(),
                        kind: kind_of(field),
                    })
                })
                .collect()
        })
        .unwrap_or_default();
    if !from_list.is_empty() {
        return from_list;
    }

    schema
        .get("properties")
        .and_then(Value::as_object)
        .map(|properties| {
            properties
                .iter()
                .map(|(name, definition)| SchemaField {
                    name: name.clone(),
                    kind: kind_of(definition),
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Capitalised sentence of six to eleven words ending in a period.
pub fn random_sentence<R: Rng + ?Sized>(rng: &mut R) -> String {
    let len = rng.gen_range(6..12);
    let words: Vec<&str> = (0..len)
        .filter_map(|_| WORDS.choose(rng).copied())
        .collect();
    let text = words.join(" ");

    let mut chars = text.chars();
    match chars.next() {
        Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
        None => ".".to_string(),
    }
}

fn one_decimal<R: Rng + ?Sized>(rng: &mut R, max_tenths: u32) -> Value {
    let tenths = rng.gen_range(0..=max_tenths);
    Number::from_f64(f64::from(tenths) / 10.0).map_or(Value::Null, Value::Number)
}

fn recent_timestamp<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Value {
    let back = Duration::milliseconds(rng.gen_range(0..30 * 24 * 60 * 60 * 1000_i64));
    Value::String((now - back).to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Random value of the given kind.
pub fn value_for<R: Rng + ?Sized>(kind: &FieldKind, rng: &mut R, now: DateTime<Utc>) -> Value {
    match kind {
        FieldKind::Integer => json!(rng.gen_range(0..10_000)),
        FieldKind::Number => one_decimal(rng, 10_000),
        FieldKind::Boolean => Value::Bool(rng.gen_bool(0.5)),
        FieldKind::Timestamp => recent_timestamp(rng, now),
        FieldKind::Text => Value::String(random_sentence(rng)),
        FieldKind::Enum(options) => options.choose(rng).cloned().unwrap_or(Value::Null),
        FieldKind::Array => Value::Array(Vec::new()),
        FieldKind::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|field| (field.name.clone(), value_for(&field.kind, rng, now)))
                .collect(),
        ),
    }
}

/// A record holding one synthetic value per declared field.
pub fn record_from_schema<R: Rng + ?Sized>(
    schema: &Value,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Option<Map<String, Value>> {
    let fields = schema_fields(schema);
    if fields.is_empty() {
        return None;
    }
    Some(
        fields
            .iter()
            .map(|field| (field.name.clone(), value_for(&field.kind, rng, now)))
            .collect(),
    )
}

/// True when a value reads as a schema definition rather than a record.
pub fn looks_like_schema(value: &Value) -> bool {
    let Some(object) = value.as_object() else {
        return false;
    };
    if object
        .get("fields")
        .and_then(Value::as_array)
        .is_some_and(|fields| !fields.is_empty())
    {
        return true;
    }
    if object.get("properties").is_some_and(Value::is_object) {
        return true;
    }
    object
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|t| t.eq_ignore_ascii_case("object"))
}

/// Add the fields the record lacks. Existing fields are never replaced.
pub fn backfill(record: &mut Map<String, Value>, defaults: Map<String, Value>) {
    for (name, value) in defaults {
        record.entry(name).or_insert(value);
    }
}

/// Turn raw model output into the record that gets stored.
pub fn post_process_record<R: Rng + ?Sized>(
    output: Value,
    schema: Option<&Value>,
    rng: &mut R,
    now: DateTime<Utc>,
) -> Value {
    let mut record = output;

    if looks_like_schema(&record) {
        let source = schema.unwrap_or(&record);
        if let Some(synthesized) = record_from_schema(source, rng, now) {
            record = Value::Object(synthesized);
        }
    }

    if let (Some(schema), Value::Object(fields)) = (schema, &mut record) {
        if let Some(defaults) = record_from_schema(schema, rng, now) {
            backfill(fields, defaults);
        }
    }

    record
}

/// Locally fabricated schema in the `fields` list format.
pub fn random_schema<R: Rng + ?Sized>(rng: &mut R, dataset_mode: bool) -> Value {
    let count = rng.gen_range(3..=5);
    let mut fields: Vec<Value> = (1..=count)
        .map(|i| {
            let kind = MOCK_FIELD_KINDS.choose(rng).copied().unwrap_or("string");
            json!({
                "name": format!("field_{i}"),
                "type": kind,
                "description": random_sentence(rng),
            })
        })
        .collect();

    if dataset_mode {
        fields.push(json!({
            "name": "label",
            "type": "string",
            "enum": ["positive", "neutral", "negative"],
            "description": "Ground truth class.",
        }));
    }

    json!({
        "title": "SyntheticRecord",
        "description": "Schema generated locally without an inference endpoint",
        "fields": fields,
    })
}

/// Locally fabricated record with no schema to follow.
pub fn random_record<R: Rng + ?Sized>(rng: &mut R, now: DateTime<Utc>) -> Value {
    let count = rng.gen_range(2..=5);
    let mut record = Map::new();
    for i in 1..=count {
        let value = if rng.gen_bool(0.5) {
            one_decimal(rng, 1_000)
        } else {
            Value::String(random_sentence(rng))
        };
        record.insert(format!("field_{i}"), value);
    }
    record.insert("id".into(), Value::String(format!("{:08x}", rng.gen::<u32>())));
    record.insert(
        "generatedAt".into(),
        Value::String(now.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );
    Value::Object(record)
}
