//! Declarative field validation
//!
//! A [`StructSchema`] is a table of per-field rules (required-ness, defaults,
//! allowed values, numeric bounds, string validators). [`validate_struct`]
//! walks a raw YAML mapping against the table and produces a normalized JSON
//! value with every default filled in, or the ordered list of field-scoped
//! errors. The walker performs no I/O and enforces no cross-field rules.

mod api;

pub use api::{api_from_raw, api_schema};

use crate::error::{Error, ErrorKind};
use serde_json::{Map, Value as Json};
use serde_yaml::Value as Yaml;

/// Transforms a string into its canonical form or explains why it is invalid
pub type StringValidator = fn(&str) -> Result<String, String>;

#[derive(Debug)]
pub struct StructSchema {
    pub fields: Vec<FieldSchema>,
}

#[derive(Debug)]
pub struct FieldSchema {
    pub key: &'static str,
    pub rule: Rule,
}

#[derive(Debug)]
pub enum Rule {
    String(StringRule),
    Int(IntRule),
    Struct(StructRule),
    /// Mapping of string to string; defaults to empty
    StringMap,
    /// Mapping with string keys and arbitrary values; defaults to empty
    InterfaceMap,
}

#[derive(Debug, Default)]
pub struct StringRule {
    pub required: bool,
    /// Absent values stay null instead of becoming ""
    pub optional: bool,
    pub default: Option<&'static str>,
    pub allow_empty: bool,
    pub allowed_values: Option<&'static [&'static str]>,
    /// Accept YAML numbers and render them as strings
    pub cast_numeric: bool,
    pub validator: Option<StringValidator>,
}

#[derive(Debug, Default)]
pub struct IntRule {
    pub required: bool,
    pub default: Option<i64>,
    /// Copy the already-validated value of a sibling field when absent
    pub default_field: Option<&'static str>,
    pub greater_than: Option<i64>,
    pub greater_than_or_equal_to: Option<i64>,
    /// Restrict to the i32 range
    pub int32: bool,
}

#[derive(Debug)]
pub struct StructRule {
    pub required: bool,
    /// Absent structs stay null instead of being filled with defaults
    pub default_nil: bool,
    pub schema: StructSchema,
}

impl StructSchema {
    pub fn new(fields: Vec<FieldSchema>) -> Self {
        Self { fields }
    }
}

impl FieldSchema {
    pub fn new(key: &'static str, rule: Rule) -> Self {
        Self { key, rule }
    }
}

/// Validate a raw mapping against a schema
pub fn validate_struct(schema: &StructSchema, raw: &Yaml) -> Result<Json, Vec<Error>> {
    let empty = serde_yaml::Mapping::new();
    let mapping = match raw {
        Yaml::Mapping(m) => m,
        Yaml::Null => &empty,
        _ => return Err(vec![ErrorKind::InvalidType("a map").into()]),
    };

    let mut errors = Vec::new();

    for key in mapping.keys() {
        match key.as_str() {
            Some(k) if schema.fields.iter().any(|f| f.key == k) => {}
            Some(k) => errors.push(Error::new(ErrorKind::UnsupportedKey).wrap(k)),
            None => errors.push(Error::new(ErrorKind::UnsupportedKey).wrap(format!("{:?}", key))),
        }
    }

    let mut out = Map::new();
    for field in &schema.fields {
        let value = mapping.get(field.key).filter(|v| !v.is_null());
        let result = match &field.rule {
            Rule::String(rule) => validate_string(rule, value).map_err(|e| vec![e]),
            Rule::Int(rule) => validate_int(rule, value, &out).map_err(|e| vec![e]),
            Rule::Struct(rule) => validate_nested(rule, value),
            Rule::StringMap => validate_string_map(value).map_err(|e| vec![e]),
            Rule::InterfaceMap => validate_interface_map(value).map_err(|e| vec![e]),
        };

        match result {
            Ok(v) => {
                out.insert(field.key.to_string(), v);
            }
            Err(errs) => errors.extend(errs.into_iter().map(|e| e.wrap(field.key))),
        }
    }

    if errors.is_empty() {
        Ok(Json::Object(out))
    } else {
        Err(errors)
    }
}

fn validate_string(rule: &StringRule, value: Option<&Yaml>) -> Result<Json, Error> {
    let raw = match value {
        None if rule.required => return Err(ErrorKind::MissingRequiredKey.into()),
        None => match rule.default {
            Some(default) => default.to_string(),
            None if rule.optional => return Ok(Json::Null),
            None => String::new(),
        },
        Some(Yaml::String(s)) => s.clone(),
        Some(Yaml::Number(n)) if rule.cast_numeric => n.to_string(),
        Some(_) => return Err(ErrorKind::InvalidType("a string").into()),
    };

    if raw.is_empty() && !rule.allow_empty && value.is_some() {
        return Err(ErrorKind::EmptyString.into());
    }

    if let Some(allowed) = rule.allowed_values {
        if !allowed.contains(&raw.as_str()) {
            return Err(ErrorKind::InvalidValue {
                value: raw,
                allowed: allowed.to_vec(),
            }
            .into());
        }
    }

    let normalized = match rule.validator {
        Some(validator) => validator(&raw).map_err(ErrorKind::InvalidString)?,
        None => raw,
    };

    Ok(Json::String(normalized))
}

fn validate_int(rule: &IntRule, value: Option<&Yaml>, siblings: &Map<String, Json>) -> Result<Json, Error> {
    let n = match value {
        None if rule.required => return Err(ErrorKind::MissingRequiredKey.into()),
        None => {
            let from_sibling = rule
                .default_field
                .and_then(|f| siblings.get(f))
                .and_then(Json::as_i64);
            match from_sibling.or(rule.default) {
                Some(n) => n,
                None => return Ok(Json::Null),
            }
        }
        Some(v) => v
            .as_i64()
            .ok_or_else(|| Error::new(ErrorKind::InvalidType("an integer")))?,
    };

    if rule.int32 && i32::try_from(n).is_err() {
        return Err(ErrorKind::InvalidType("a 32-bit integer").into());
    }

    if let Some(bound) = rule.greater_than {
        if n <= bound {
            return Err(ErrorKind::MustBeGreaterThan {
                value: n.to_string(),
                bound: bound.to_string(),
            }
            .into());
        }
    }

    if let Some(bound) = rule.greater_than_or_equal_to {
        if n < bound {
            return Err(ErrorKind::MustBeGreaterThanOrEqualTo {
                value: n.to_string(),
                bound: bound.to_string(),
            }
            .into());
        }
    }

    Ok(Json::from(n))
}

fn validate_nested(rule: &StructRule, value: Option<&Yaml>) -> Result<Json, Vec<Error>> {
    match value {
        None if rule.required => Err(vec![ErrorKind::MissingRequiredKey.into()]),
        None if rule.default_nil => Ok(Json::Null),
        None => validate_struct(&rule.schema, &Yaml::Null),
        Some(v) => validate_struct(&rule.schema, v),
    }
}

fn validate_string_map(value: Option<&Yaml>) -> Result<Json, Error> {
    let mapping = match value {
        None => return Ok(Json::Object(Map::new())),
        Some(Yaml::Mapping(m)) => m,
        Some(_) => return Err(ErrorKind::InvalidType("a map of strings to strings").into()),
    };

    let mut out = Map::new();
    for (k, v) in mapping {
        match (k.as_str(), v.as_str()) {
            (Some(k), Some(v)) => {
                out.insert(k.to_string(), Json::String(v.to_string()));
            }
            _ => return Err(ErrorKind::InvalidType("a map of strings to strings").into()),
        }
    }
    Ok(Json::Object(out))
}

fn validate_interface_map(value: Option<&Yaml>) -> Result<Json, Error> {
    let mapping = match value {
        None => return Ok(Json::Object(Map::new())),
        Some(Yaml::Mapping(m)) => m,
        Some(_) => return Err(ErrorKind::InvalidType("a map").into()),
    };

    let mut out = Map::new();
    for (k, v) in mapping {
        let key = k
            .as_str()
            .ok_or_else(|| Error::new(ErrorKind::InvalidType("a map with string keys")))?;
        let value = serde_json::to_value(v)
            .map_err(|e| Error::new(ErrorKind::InvalidString(e.to_string())).wrap(key))?;
        out.insert(key.to_string(), value);
    }
    Ok(Json::Object(out))
}
