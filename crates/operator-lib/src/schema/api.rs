//! Field table for API manifest entries

use super::{validate_struct, FieldSchema, IntRule, Rule, StringRule, StructRule, StructSchema};
use crate::error::{Error, ErrorKind};
use crate::models::*;
use crate::quantity::Quantity;
use crate::storage::S3Path;
use std::sync::OnceLock;

static API_SCHEMA: OnceLock<StructSchema> = OnceLock::new();

/// The manifest schema for one API entry
pub fn api_schema() -> &'static StructSchema {
    API_SCHEMA.get_or_init(build_api_schema)
}

/// Walk one raw manifest entry into a typed [`Api`]
///
/// `index` and `file_path` are left for the caller to stamp.
pub fn api_from_raw(raw: &serde_yaml::Value) -> Result<Api, Vec<Error>> {
    let normalized = validate_struct(api_schema(), raw)?;
    serde_json::from_value(normalized)
        .map_err(|e| vec![Error::new(ErrorKind::InvalidString(e.to_string()))])
}

fn build_api_schema() -> StructSchema {
    StructSchema::new(vec![
        FieldSchema::new(
            NAME_KEY,
            Rule::String(StringRule {
                required: true,
                validator: Some(validate_dns1035),
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            ENDPOINT_KEY,
            Rule::String(StringRule {
                optional: true,
                validator: Some(validate_endpoint),
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            TRACKER_KEY,
            Rule::Struct(StructRule {
                required: false,
                default_nil: true,
                schema: StructSchema::new(vec![
                    FieldSchema::new(
                        "key",
                        Rule::String(StringRule {
                            optional: true,
                            ..Default::default()
                        }),
                    ),
                    FieldSchema::new(
                        "modelType",
                        Rule::String(StringRule {
                            allow_empty: true,
                            allowed_values: Some(ModelType::ALL),
                            ..Default::default()
                        }),
                    ),
                ]),
            }),
        ),
        FieldSchema::new(
            PREDICTOR_KEY,
            Rule::Struct(StructRule {
                required: true,
                default_nil: false,
                schema: predictor_schema(),
            }),
        ),
        FieldSchema::new(
            COMPUTE_KEY,
            Rule::Struct(StructRule {
                required: false,
                default_nil: false,
                schema: compute_schema(),
            }),
        ),
    ])
}

fn predictor_schema() -> StructSchema {
    StructSchema::new(vec![
        FieldSchema::new(
            TYPE_KEY,
            Rule::String(StringRule {
                required: true,
                allowed_values: Some(PredictorType::ALL),
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            PATH_KEY,
            Rule::String(StringRule {
                required: true,
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            MODEL_KEY,
            Rule::String(StringRule {
                optional: true,
                validator: Some(validate_s3_path),
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            PYTHON_PATH_KEY,
            Rule::String(StringRule {
                optional: true,
                validator: Some(ensure_trailing_slash),
                ..Default::default()
            }),
        ),
        FieldSchema::new("config", Rule::InterfaceMap),
        FieldSchema::new("env", Rule::StringMap),
        FieldSchema::new(
            SIGNATURE_KEY_KEY,
            Rule::String(StringRule {
                optional: true,
                ..Default::default()
            }),
        ),
    ])
}

fn compute_schema() -> StructSchema {
    let positive = |default: Option<i64>, default_field: Option<&'static str>| IntRule {
        default,
        default_field,
        greater_than: Some(0),
        int32: true,
        ..Default::default()
    };

    StructSchema::new(vec![
        FieldSchema::new("minReplicas", Rule::Int(positive(Some(1), None))),
        FieldSchema::new("maxReplicas", Rule::Int(positive(Some(100), None))),
        FieldSchema::new("initReplicas", Rule::Int(positive(None, Some("minReplicas")))),
        FieldSchema::new("targetCPUUtilization", Rule::Int(positive(Some(80), None))),
        FieldSchema::new(
            "cpu",
            Rule::String(StringRule {
                default: Some("200m"),
                cast_numeric: true,
                validator: Some(validate_positive_quantity),
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            "mem",
            Rule::String(StringRule {
                optional: true,
                cast_numeric: true,
                validator: Some(validate_positive_quantity),
                ..Default::default()
            }),
        ),
        FieldSchema::new(
            "gpu",
            Rule::Int(IntRule {
                default: Some(0),
                greater_than_or_equal_to: Some(0),
                ..Default::default()
            }),
        ),
    ])
}

/// RFC 1035 label: lowercase alphanumerics and '-', starting with a letter
pub fn validate_dns1035(name: &str) -> Result<String, String> {
    const MSG: &str = "must contain only lower case letters, numbers, and dashes, start with a \
                       letter, and cannot end with a dash";

    if name.len() > 63 {
        return Err("must be no more than 63 characters".to_string());
    }

    let starts_with_letter = name.chars().next().is_some_and(|c| c.is_ascii_lowercase());
    let ends_alphanumeric = name
        .chars()
        .last()
        .is_some_and(|c| c.is_ascii_lowercase() || c.is_ascii_digit());
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');

    if starts_with_letter && ends_alphanumeric && valid_chars {
        Ok(name.to_string())
    } else {
        Err(MSG.to_string())
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<String, String> {
    if !endpoint.starts_with('/') {
        return Err("endpoint must start with \"/\"".to_string());
    }

    let valid = endpoint
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~'));
    if !valid {
        return Err(format!("{}: invalid url path", endpoint));
    }

    Ok(endpoint.to_string())
}

fn validate_s3_path(path: &str) -> Result<String, String> {
    S3Path::parse(path).map(|_| path.to_string())
}

fn ensure_trailing_slash(path: &str) -> Result<String, String> {
    if path.ends_with('/') {
        Ok(path.to_string())
    } else {
        Ok(format!("{}/", path))
    }
}

fn validate_positive_quantity(raw: &str) -> Result<String, String> {
    let quantity = Quantity::parse(raw)?;
    if quantity.millis() <= 0 {
        return Err(format!("must be greater than 0 (got {})", raw));
    }
    Ok(raw.to_string())
}
