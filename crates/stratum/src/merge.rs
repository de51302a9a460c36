//! Field-wise merging of decoded documents into a target.
//!
//! Documents are applied through a generic value tree: the target is
//! serialized, the document is laid over it, and the result is deserialized
//! back. Only the fields a document mentions change, so a later source
//! overrides an earlier one per field rather than replacing the whole target.
//!
//! The tree is a [`serde_yaml::Value`], which keeps non-finite floats and
//! enum variants intact. Enum values may be written either as YAML tags
//! (`!Level 3`) or as single-entry maps (`{"Level": 3}`).
//!
//! The target must survive a serde round trip. Fields marked
//! `#[serde(skip)]` are reset to their default on every document merge, and
//! a field that skips serialization without a default makes every merge fail
//! with `ConfigError::InvalidTarget`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_yaml::value::{Tag, TaggedValue};
use serde_yaml::{Mapping, Number, Value};

use crate::{ConfigError, ConfigResult};

/// A decoded configuration document.
pub type Document = Value;

/// Merge `document` into `target`.
///
/// # Errors
///
/// - `ConfigError::InvalidTarget` if `target` does not serialize to a map or
///   cannot be rebuilt from its own serialized form.
/// - `ConfigError::TargetMismatch` if the document root is not a map, or a
///   merged value cannot be converted to the field's type.
pub fn apply_document<T>(target: &mut T, document: Document) -> ConfigResult<()>
where
    T: Serialize + DeserializeOwned,
{
    let mut current = to_tree(&*target)?;

    if !current.is_mapping() {
        return Err(ConfigError::invalid_target(format!(
            "expected a struct or map, found {}",
            kind(&current)
        )));
    }
    if !document.is_mapping() {
        return Err(ConfigError::target_mismatch(format!(
            "document root must be a map, found {}",
            kind(&document)
        )));
    }

    merge_values(&mut current, document);

    *target = from_tree(current).map_err(|reason| rejected(&*target, reason))?;
    Ok(())
}

/// Lay `overlay` over `base`.
///
/// Maps merge key by key, `null` keeps the existing value, anything else
/// replaces it. An overlay for an enum value keeps merging into the variant
/// when it names the same one.
pub fn merge_values(base: &mut Value, overlay: Value) {
    let overlay = if matches!(base, Value::Tagged(_)) {
        as_variant(overlay)
    } else {
        overlay
    };

    match (base, overlay) {
        (_, Value::Null) => {}
        (Value::Mapping(base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None if value.is_null() => {}
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (Value::Tagged(base), Value::Tagged(overlay)) if base.tag == overlay.tag => {
            merge_values(&mut base.value, overlay.value);
        }
        (slot, value) => *slot = value,
    }
}

/// Reads a single-entry map with a string key as a tagged enum variant.
fn as_variant(value: Value) -> Value {
    match value {
        Value::Mapping(map) if map.len() == 1 => {
            match map.into_iter().next() {
                Some((Value::String(name), value)) if !name.is_empty() => {
                    Value::Tagged(Box::new(TaggedValue {
                        tag: Tag::new(name),
                        value,
                    }))
                }
                Some(entry) => Value::Mapping(Mapping::from_iter([entry])),
                None => Value::Mapping(Mapping::new()),
            }
        }
        other => other,
    }
}

fn to_tree<T: Serialize>(target: &T) -> ConfigResult<Value> {
    serde_yaml::to_value(target).map_err(|e| ConfigError::invalid_target(e.to_string()))
}

/// Rebuild a value from a merged tree.
///
/// Goes through `serde_json` unless the tree holds a non-finite float, which
/// JSON cannot represent.
fn from_tree<T: DeserializeOwned>(tree: Value) -> Result<T, String> {
    if has_non_finite(&tree) {
        serde_yaml::from_value(tree).map_err(|e| e.to_string())
    } else {
        serde_json::from_value(to_json(tree)?).map_err(|e| e.to_string())
    }
}

/// Classify a failed rebuild: the document's fault, or a target that cannot
/// be rebuilt even from its own values.
fn rejected<T>(target: &T, reason: String) -> ConfigError
where
    T: Serialize + DeserializeOwned,
{
    match to_tree(target).map(from_tree::<T>) {
        Ok(Err(round_trip)) => ConfigError::invalid_target(format!(
            "target does not survive a serde round trip ({round_trip}); fields that skip \
             serialization need a default"
        )),
        _ => ConfigError::target_mismatch(reason),
    }
}

fn has_non_finite(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.is_nan() || n.is_infinite(),
        Value::Sequence(items) => items.iter().any(has_non_finite),
        Value::Mapping(map) => map.values().any(has_non_finite),
        Value::Tagged(tagged) => has_non_finite(&tagged.value),
        Value::Null | Value::Bool(_) | Value::String(_) => false,
    }
}

fn to_json(value: Value) -> Result<serde_json::Value, String> {
    Ok(match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(b),
        Value::Number(n) => json_number(&n),
        Value::String(s) => serde_json::Value::String(s),
        Value::Sequence(items) => serde_json::Value::Array(
            items
                .into_iter()
                .map(to_json)
                .collect::<Result<_, _>>()?,
        ),
        Value::Mapping(map) => {
            let mut object = serde_json::Map::with_capacity(map.len());
            for (key, value) in map {
                object.insert(json_key(key)?, to_json(value)?);
            }
            serde_json::Value::Object(object)
        }
        Value::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            let variant = tag.to_string().trim_start_matches('!').to_string();
            let mut object = serde_json::Map::with_capacity(1);
            object.insert(variant, to_json(value)?);
            serde_json::Value::Object(object)
        }
    })
}

fn json_number(n: &Number) -> serde_json::Value {
    if let Some(u) = n.as_u64() {
        u.into()
    } else if let Some(i) = n.as_i64() {
        i.into()
    } else {
        n.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

fn json_key(key: Value) -> Result<String, String> {
    match key {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(format!("unsupported map key: {}", kind(&other))),
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a sequence",
        Value::Mapping(_) => "a map",
        Value::Tagged(_) => "a tagged value",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use std::collections::HashMap;

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Database {
        host: String,
        port: u16,
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        name: String,
        debug: bool,
        ratio: f64,
        tags: Vec<String>,
        token: Option<String>,
        #[serde(default)]
        database: Database,
    }

    fn doc(yaml: &str) -> Document {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_only_mentioned_fields_change() {
        let mut settings = Settings {
            name: "svc".to_string(),
            debug: true,
            ..Default::default()
        };

        apply_document(&mut settings, doc("ratio: 0.5")).unwrap();

        assert_eq!(settings.name, "svc");
        assert!(settings.debug);
        assert!((settings.ratio - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_nested_maps_merge() {
        let mut settings = Settings {
            database: Database {
                host: "db.local".to_string(),
                port: 5432,
            },
            ..Default::default()
        };

        apply_document(&mut settings, doc("database: {port: 6543}")).unwrap();

        assert_eq!(settings.database.host, "db.local");
        assert_eq!(settings.database.port, 6543);
    }

    #[test]
    fn test_sequences_replace() {
        let mut settings = Settings {
            tags: vec!["a".to_string(), "b".to_string()],
            ..Default::default()
        };

        apply_document(&mut settings, doc("tags: [c]")).unwrap();
        assert_eq!(settings.tags, vec!["c"]);
    }

    #[test]
    fn test_null_keeps_existing_value() {
        let mut settings = Settings {
            name: "kept".to_string(),
            token: Some("secret".to_string()),
            ..Default::default()
        };

        apply_document(&mut settings, doc("name: null\ntoken: ~")).unwrap();
        assert_eq!(settings.name, "kept");
        assert_eq!(settings.token.as_deref(), Some("secret"));
    }

    #[test]
    fn test_unknown_keys_ignored() {
        let mut settings = Settings::default();
        apply_document(&mut settings, doc("name: x\nunrelated: 1")).unwrap();
        assert_eq!(settings.name, "x");
    }

    #[test]
    fn test_type_mismatch() {
        let mut settings = Settings::default();
        let err = apply_document(&mut settings, doc("debug: maybe")).unwrap_err();
        assert!(matches!(err, ConfigError::TargetMismatch { .. }));
    }

    #[test]
    fn test_non_map_document_rejected() {
        let mut settings = Settings::default();
        let err = apply_document(&mut settings, doc("[a, b]")).unwrap_err();
        match err {
            ConfigError::TargetMismatch { reason } => assert!(reason.contains("a sequence")),
            other => panic!("Expected TargetMismatch, got {other:?}"),
        }
    }

    #[test]
    fn test_non_map_target_rejected() {
        let mut value = 42_u32;
        let err = apply_document(&mut value, doc("a: 1")).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTarget { .. }));
    }

    #[test]
    fn test_map_targets_accept_new_keys() {
        let mut map: HashMap<String, String> = HashMap::new();
        map.insert("a".to_string(), "1".to_string());

        apply_document(&mut map, doc("b: \"2\"")).unwrap();
        assert_eq!(map.len(), 2);
        assert_eq!(map["b"], "2");
    }

    #[test]
    fn test_merge_values_inserts_missing_keys() {
        let mut base = doc("a: {x: 1}");
        merge_values(&mut base, doc("a: {y: 2}\nb: true\nc: null"));
        assert_eq!(base, doc("a: {x: 1, y: 2}\nb: true"));
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Tuning {
        name: String,
        timeout_secs: f64,
        backoff: f32,
    }

    #[test]
    fn test_non_finite_floats_survive_unrelated_merges() {
        let mut tuning = Tuning {
            name: "a".to_string(),
            timeout_secs: f64::INFINITY,
            backoff: f32::NAN,
        };

        apply_document(&mut tuning, doc("name: b")).unwrap();

        assert_eq!(tuning.name, "b");
        assert_eq!(tuning.timeout_secs, f64::INFINITY);
        assert!(tuning.backoff.is_nan());
    }

    #[test]
    fn test_documents_can_set_non_finite_floats() {
        let mut tuning = Tuning {
            name: "a".to_string(),
            timeout_secs: 1.0,
            backoff: 1.0,
        };

        apply_document(&mut tuning, doc("timeout_secs: .inf\nbackoff: -.inf")).unwrap();
        assert_eq!(tuning.timeout_secs, f64::INFINITY);
        assert_eq!(tuning.backoff, f32::NEG_INFINITY);

        apply_document(&mut tuning, doc("timeout_secs: 2.5")).unwrap();
        assert!((tuning.timeout_secs - 2.5).abs() < f64::EPSILON);
        assert_eq!(tuning.backoff, f32::NEG_INFINITY);
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Credentials {
        user: String,
        #[serde(skip_serializing)]
        password: String,
    }

    #[test]
    fn test_skip_serializing_without_default_is_invalid_target() {
        let mut credentials = Credentials {
            user: "alice".to_string(),
            password: "hunter2".to_string(),
        };

        let err = apply_document(&mut credentials, doc("user: bob")).unwrap_err();
        match err {
            ConfigError::InvalidTarget { reason } => {
                assert!(reason.contains("password"), "{reason}");
                assert!(reason.contains("round trip"), "{reason}");
            }
            other => panic!("Expected InvalidTarget, got {other:?}"),
        }
        assert_eq!(credentials.user, "alice");
        assert_eq!(credentials.password, "hunter2");
    }

    #[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
    struct Listener {
        #[serde(rename = "listen")]
        addr: String,
        #[serde(default = "default_backlog")]
        backlog: u32,
        #[serde(skip_serializing, default)]
        generation: u64,
    }

    fn default_backlog() -> u32 {
        128
    }

    #[test]
    fn test_serde_attributes_are_honored() {
        let mut listener = Listener {
            addr: "0.0.0.0:80".to_string(),
            backlog: 64,
            generation: 3,
        };

        apply_document(&mut listener, doc("listen: 127.0.0.1:8080\naddr: ignored")).unwrap();

        assert_eq!(listener.addr, "127.0.0.1:8080");
        assert_eq!(listener.backlog, 64);
        assert_eq!(listener.generation, 0);
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    enum Mode {
        Off,
        Level(u8),
        Window { min: u32, max: u32 },
    }

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Throttle {
        mode: Mode,
    }

    #[test]
    fn test_enum_variants_in_either_form() {
        let mut throttle = Throttle { mode: Mode::Off };

        apply_document(&mut throttle, doc("mode: {Level: 3}")).unwrap();
        assert_eq!(throttle.mode, Mode::Level(3));

        apply_document(&mut throttle, doc("mode: !Level 5")).unwrap();
        assert_eq!(throttle.mode, Mode::Level(5));

        apply_document(&mut throttle, doc("mode: {Window: {min: 1, max: 9}}")).unwrap();
        apply_document(&mut throttle, doc("mode: {Window: {max: 20}}")).unwrap();
        assert_eq!(throttle.mode, Mode::Window { min: 1, max: 20 });

        apply_document(&mut throttle, doc("mode: Off")).unwrap();
        assert_eq!(throttle.mode, Mode::Off);
    }
}
