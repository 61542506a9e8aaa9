//! Option normalizer.
//!
//! The scripting host hands the boundary loosely typed option bags. Each
//! operation declares a [`Schema`]: the keys it recognizes, their expected
//! type, a default, and for list-valued keys the delimiter the native API
//! expects. [`normalize`] validates a bag against a schema once, before any
//! native call, so nothing downstream re-checks types.
//!
//! Unknown keys are ignored. Enum keys only accept the values the SDK
//! defines; anything else is [`Error::InvalidOption`].

use std::collections::HashMap;

use serde_json::Value;

use crate::finder::Source;
use crate::frames::{PixelFormat, ScanType};
use crate::receiver::{Bandwidth, ColorFormat};
use crate::{Error, Result};

/// Delimiter the SDK uses for group and extra-IP lists.
pub const LIST_DELIMITER: char = ',';

/// The expected shape of one option.
#[derive(Debug, Clone, Copy)]
pub enum OptionKind {
    Bool,
    Text,
    Integer { min: i64, max: i64 },
    Float,
    /// A list of text tokens, joined with `delimiter` for the native call.
    List { delimiter: char },
    /// An integer restricted to the values `accepts` recognizes.
    Enum {
        name: &'static str,
        accepts: fn(i64) -> bool,
    },
    /// A source descriptor: `{ "name": .., "urlAddress": .. }` or a bare name.
    Source,
}

/// One recognized key.
#[derive(Debug, Clone)]
pub struct OptionSpec {
    pub key: &'static str,
    pub kind: OptionKind,
    pub default: Option<OptionValue>,
    pub required: bool,
}

/// A validated option value.
#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
    /// A list already joined with its delimiter.
    Delimited(String),
    Source(Source),
}

/// The recognized keys of one operation.
#[derive(Debug)]
pub struct Schema {
    pub name: &'static str,
    pub options: &'static [OptionSpec],
}

impl Schema {
    pub fn get(&self, key: &str) -> Option<&OptionSpec> {
        self.options.iter().find(|spec| spec.key == key)
    }
}

/// Options that passed validation, with defaults filled in.
#[derive(Debug, Clone, Default)]
pub struct NormalizedOptions {
    values: HashMap<&'static str, OptionValue>,
}

impl NormalizedOptions {
    pub fn get(&self, key: &str) -> Option<&OptionValue> {
        self.values.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn bool(&self, key: &str) -> Option<bool> {
        match self.values.get(key) {
            Some(OptionValue::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    pub fn integer(&self, key: &str) -> Option<i64> {
        match self.values.get(key) {
            Some(OptionValue::Integer(n)) => Some(*n),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f64> {
        match self.values.get(key) {
            Some(OptionValue::Float(n)) => Some(*n),
            Some(OptionValue::Integer(n)) => Some(*n as f64),
            _ => None,
        }
    }

    /// Text and delimited-list values.
    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(OptionValue::Text(s) | OptionValue::Delimited(s)) => Some(s),
            _ => None,
        }
    }

    pub fn source(&self, key: &str) -> Option<&Source> {
        match self.values.get(key) {
            Some(OptionValue::Source(source)) => Some(source),
            _ => None,
        }
    }
}

/// Validates `raw` against `schema`.
///
/// `None` and `null` mean "no options": every default applies and only
/// required keys can fail.
pub fn normalize(raw: Option<&Value>, schema: &Schema) -> Result<NormalizedOptions> {
    let object = match raw {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) => Some(map),
        Some(other) => {
            return Err(Error::invalid_option(
                schema.name,
                format!("expected an options object, got {}", type_name(other)),
            ))
        }
    };

    let mut values = HashMap::new();
    for spec in schema.options {
        let given = object
            .and_then(|map| map.get(spec.key))
            .filter(|value| !value.is_null());
        let value = match given {
            Some(value) => coerce(spec, value)?,
            None => spec.default.clone(),
        };
        match value {
            Some(value) => {
                values.insert(spec.key, value);
            }
            None if spec.required => {
                return Err(Error::invalid_option(spec.key, "is required"));
            }
            None => {}
        }
    }

    if let Some(map) = object {
        for key in map.keys().filter(|key| schema.get(key).is_none()) {
            tracing::debug!(schema = schema.name, key = %key, "ignoring unrecognized option");
        }
    }

    Ok(NormalizedOptions { values })
}

/// Joins list tokens with `delimiter`. An empty list yields `None`, which the
/// native layer reads as "not set".
///
/// Tokens must be non-empty and must not contain the delimiter, or splitting
/// the joined text would not give the list back.
pub fn join_list<I, S>(key: &str, tokens: I, delimiter: char) -> Result<Option<String>>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut joined = String::new();
    for (i, token) in tokens.into_iter().enumerate() {
        let token = token.as_ref();
        if token.is_empty() {
            return Err(Error::invalid_option(key, format!("list entry {i} is empty")));
        }
        if token.contains(delimiter) {
            return Err(Error::invalid_option(
                key,
                format!("list entry {token:?} contains the delimiter {delimiter:?}"),
            ));
        }
        check_text(key, token)?;
        if i > 0 {
            joined.push(delimiter);
        }
        joined.push_str(token);
    }
    Ok(Some(joined).filter(|s| !s.is_empty()))
}

/// Splits a delimited list back into its tokens.
pub fn split_list(joined: &str, delimiter: char) -> Vec<String> {
    if joined.is_empty() {
        return Vec::new();
    }
    joined.split(delimiter).map(str::to_owned).collect()
}

fn coerce(spec: &OptionSpec, value: &Value) -> Result<Option<OptionValue>> {
    let key = spec.key;
    let mismatch = |expected: &str| {
        Error::invalid_option(
            key,
            format!("expected {expected}, got {}", type_name(value)),
        )
    };

    let coerced = match spec.kind {
        OptionKind::Bool => OptionValue::Bool(value.as_bool().ok_or_else(|| mismatch("a boolean"))?),
        OptionKind::Text => {
            let text = value.as_str().ok_or_else(|| mismatch("a string"))?;
            check_text(key, text)?;
            OptionValue::Text(text.to_owned())
        }
        OptionKind::Integer { min, max } => {
            let n = value.as_i64().ok_or_else(|| mismatch("an integer"))?;
            if n < min || n > max {
                return Err(Error::invalid_option(
                    key,
                    format!("{n} is outside {min}..={max}"),
                ));
            }
            OptionValue::Integer(n)
        }
        OptionKind::Float => OptionValue::Float(value.as_f64().ok_or_else(|| mismatch("a number"))?),
        OptionKind::List { delimiter } => {
            let joined = match value {
                Value::Array(items) => {
                    let tokens = items
                        .iter()
                        .map(|item| item.as_str().ok_or_else(|| mismatch("a list of strings")))
                        .collect::<Result<Vec<_>>>()?;
                    join_list(key, tokens, delimiter)?
                }
                Value::String(text) => {
                    check_text(key, text)?;
                    Some(text.clone()).filter(|s| !s.is_empty())
                }
                _ => return Err(mismatch("a list of strings")),
            };
            return Ok(joined.map(OptionValue::Delimited));
        }
        OptionKind::Enum { name, accepts } => {
            let n = value.as_i64().ok_or_else(|| mismatch("an integer"))?;
            if !accepts(n) {
                return Err(Error::invalid_option(
                    key,
                    format!("{n} is not a recognized {name}"),
                ));
            }
            OptionValue::Integer(n)
        }
        OptionKind::Source => OptionValue::Source(source_from_value(key, value)?),
    };
    Ok(Some(coerced))
}

fn source_from_value(key: &str, value: &Value) -> Result<Source> {
    let field = |name: &str| -> Result<Option<String>> {
        match value.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => {
                check_text(key, s)?;
                Ok(Some(s.clone()))
            }
            Some(other) => Err(Error::invalid_option(
                key,
                format!("`{name}` must be a string, got {}", type_name(other)),
            )),
        }
    };

    match value {
        Value::String(name) => {
            check_text(key, name)?;
            Ok(Source::new(name.clone()))
        }
        Value::Object(_) => {
            let name = field("name")?
                .ok_or_else(|| Error::invalid_option(key, "source needs a `name`"))?;
            Ok(Source {
                name,
                url_address: field("urlAddress")?,
            })
        }
        other => Err(Error::invalid_option(
            key,
            format!("expected a source object, got {}", type_name(other)),
        )),
    }
}

fn check_text(key: &str, text: &str) -> Result<()> {
    if text.contains('\0') {
        return Err(Error::invalid_option(key, "text contains a NUL byte"));
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

const fn spec(key: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        key,
        kind,
        default: None,
        required: false,
    }
}

const fn required(key: &'static str, kind: OptionKind) -> OptionSpec {
    OptionSpec {
        key,
        kind,
        default: None,
        required: true,
    }
}

const fn with_default(key: &'static str, kind: OptionKind, default: OptionValue) -> OptionSpec {
    OptionSpec {
        key,
        kind,
        default: Some(default),
        required: false,
    }
}

const LIST: OptionKind = OptionKind::List {
    delimiter: LIST_DELIMITER,
};
const COLOR_FORMAT: OptionKind = OptionKind::Enum {
    name: "color format",
    accepts: ColorFormat::accepts,
};
const BANDWIDTH: OptionKind = OptionKind::Enum {
    name: "bandwidth mode",
    accepts: Bandwidth::accepts,
};
const FOURCC: OptionKind = OptionKind::Enum {
    name: "FourCC video type",
    accepts: PixelFormat::accepts,
};
const SCAN_TYPE: OptionKind = OptionKind::Enum {
    name: "frame format type",
    accepts: ScanType::accepts,
};
const DIMENSION: OptionKind = OptionKind::Integer {
    min: 1,
    max: i32::MAX as i64,
};
const I32: OptionKind = OptionKind::Integer {
    min: i32::MIN as i64,
    max: i32::MAX as i64,
};

/// `find(options?)`.
pub static FIND_SCHEMA: Schema = Schema {
    name: "find",
    options: &[
        with_default("showLocalSources", OptionKind::Bool, OptionValue::Bool(true)),
        spec("groups", LIST),
        spec("extraIPs", LIST),
    ],
};

/// `receive(options)`.
pub static RECEIVE_SCHEMA: Schema = Schema {
    name: "receive",
    options: &[
        required("source", OptionKind::Source),
        with_default(
            "colorFormat",
            COLOR_FORMAT,
            OptionValue::Integer(crate::ndi_lib::NDIlib_recv_color_format_BGRX_BGRA as i64),
        ),
        with_default(
            "bandwidth",
            BANDWIDTH,
            OptionValue::Integer(crate::ndi_lib::NDIlib_recv_bandwidth_highest as i64),
        ),
        with_default("allowVideoFields", OptionKind::Bool, OptionValue::Bool(true)),
        spec("name", OptionKind::Text),
    ],
};

/// `send(options)`. `colorFormat` picks the pixel layout for frames submitted
/// without an explicit FourCC.
pub static SEND_SCHEMA: Schema = Schema {
    name: "send",
    options: &[
        required("name", OptionKind::Text),
        spec("groups", LIST),
        with_default("clockVideo", OptionKind::Bool, OptionValue::Bool(true)),
        with_default("clockAudio", OptionKind::Bool, OptionValue::Bool(true)),
        spec("colorFormat", COLOR_FORMAT),
    ],
};

/// `routing(options)`.
pub static ROUTING_SCHEMA: Schema = Schema {
    name: "routing",
    options: &[spec("name", OptionKind::Text), spec("groups", LIST)],
};

/// A video frame description handed to `Sender::send_video_value`.
pub static VIDEO_FRAME_SCHEMA: Schema = Schema {
    name: "video frame",
    options: &[
        required("xres", DIMENSION),
        required("yres", DIMENSION),
        spec("fourCC", FOURCC),
        with_default("frameRateN", DIMENSION, OptionValue::Integer(30_000)),
        with_default("frameRateD", DIMENSION, OptionValue::Integer(1_001)),
        spec("pictureAspectRatio", OptionKind::Float),
        with_default(
            "frameFormatType",
            SCAN_TYPE,
            OptionValue::Integer(crate::ndi_lib::NDIlib_frame_format_type_progressive as i64),
        ),
        spec("lineStrideBytes", I32),
        spec("timecode", OptionKind::Integer { min: i64::MIN, max: i64::MAX }),
        spec("metadata", OptionKind::Text),
    ],
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults_fill_missing_keys() {
        let options = normalize(None, &FIND_SCHEMA).unwrap();
        assert_eq!(options.bool("showLocalSources"), Some(true));
        assert!(!options.contains("groups"));
        assert!(!options.contains("extraIPs"));
    }

    #[test]
    fn test_lists_join_with_delimiter() {
        let raw = json!({ "groups": ["A", "B"], "extraIPs": "10.0.0.1,10.0.0.2" });
        let options = normalize(Some(&raw), &FIND_SCHEMA).unwrap();
        assert_eq!(options.text("groups"), Some("A,B"));
        assert_eq!(options.text("extraIPs"), Some("10.0.0.1,10.0.0.2"));
    }

    #[test]
    fn test_empty_list_is_unset() {
        let raw = json!({ "groups": [] });
        let options = normalize(Some(&raw), &FIND_SCHEMA).unwrap();
        assert_eq!(options.text("groups"), None);
    }

    #[test]
    fn test_list_round_trip() {
        let lists: &[&[&str]] = &[
            &["A"],
            &["A", "B"],
            &["studio 1", "studio 2", "Public"],
            &["192.168.0.10", "10.1.1.1"],
        ];
        for list in lists {
            let joined = join_list("groups", *list, LIST_DELIMITER).unwrap().unwrap();
            assert_eq!(split_list(&joined, LIST_DELIMITER), *list);
        }

        let empty: &[&str] = &[];
        assert_eq!(join_list("groups", empty, LIST_DELIMITER).unwrap(), None);
        for list in [&[""][..], &["", "B"][..], &["A", ""][..]] {
            assert!(matches!(
                join_list("groups", list, LIST_DELIMITER),
                Err(Error::InvalidOption { .. })
            ));
        }
    }

    #[test]
    fn test_token_with_delimiter_rejected() {
        match join_list("groups", ["A,B", "C"], LIST_DELIMITER) {
            Err(Error::InvalidOption { key, .. }) => assert_eq!(key, "groups"),
            other => panic!("expected InvalidOption, got {other:?}"),
        }
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let raw = json!({ "showLocalSources": false, "futureOption": { "x": 1 } });
        let options = normalize(Some(&raw), &FIND_SCHEMA).unwrap();
        assert_eq!(options.bool("showLocalSources"), Some(false));
        assert!(!options.contains("futureOption"));
    }

    #[test]
    fn test_wrong_type_rejected() {
        let raw = json!({ "showLocalSources": "yes" });
        assert!(matches!(
            normalize(Some(&raw), &FIND_SCHEMA),
            Err(Error::InvalidOption { .. })
        ));
        let raw = json!({ "groups": ["A", 7] });
        assert!(matches!(
            normalize(Some(&raw), &FIND_SCHEMA),
            Err(Error::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            normalize(Some(&json!([1, 2])), &FIND_SCHEMA),
            Err(Error::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_enum_closed_set() {
        let source = json!({ "name": "CAM (1)" });
        let ok = json!({ "source": source, "colorFormat": 200, "bandwidth": -10 });
        let options = normalize(Some(&ok), &RECEIVE_SCHEMA).unwrap();
        assert_eq!(options.integer("colorFormat"), Some(200));
        assert_eq!(options.integer("bandwidth"), Some(-10));

        for (key, bad) in [("colorFormat", 4), ("colorFormat", 102), ("bandwidth", 50)] {
            let mut raw = json!({ "source": source });
            raw[key] = json!(bad);
            match normalize(Some(&raw), &RECEIVE_SCHEMA) {
                Err(Error::InvalidOption { key: k, .. }) => assert_eq!(k, key),
                other => panic!("expected InvalidOption for {key}={bad}, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_required_key() {
        match normalize(Some(&json!({})), &SEND_SCHEMA) {
            Err(Error::InvalidOption { key, .. }) => assert_eq!(key, "name"),
            other => panic!("expected InvalidOption, got {other:?}"),
        }
    }

    #[test]
    fn test_source_forms() {
        let raw = json!({ "source": { "name": "HOST (Cam)", "urlAddress": "10.0.0.5:5961" } });
        let options = normalize(Some(&raw), &RECEIVE_SCHEMA).unwrap();
        let source = options.source("source").unwrap();
        assert_eq!(source.name, "HOST (Cam)");
        assert_eq!(source.url_address.as_deref(), Some("10.0.0.5:5961"));

        let raw = json!({ "source": "HOST (Cam)" });
        let options = normalize(Some(&raw), &RECEIVE_SCHEMA).unwrap();
        assert_eq!(options.source("source").unwrap().url_address, None);

        let raw = json!({ "source": { "urlAddress": "10.0.0.5:5961" } });
        assert!(normalize(Some(&raw), &RECEIVE_SCHEMA).is_err());
    }

    #[test]
    fn test_nul_in_text_rejected() {
        let raw = json!({ "name": "bad\u{0}name" });
        assert!(matches!(
            normalize(Some(&raw), &ROUTING_SCHEMA),
            Err(Error::InvalidOption { .. })
        ));
    }
}
