//! Typed query parameters.
//!
//! Callers supply parameters as a typed-JSON object whose top-level keys are
//! type names, each mapping to `{name: value}` pairs:
//!
//! ```json
//! {"INTEGER": {"userId": 42}, "STRING": {"username": "alice"}}
//! ```
//!
//! The parsed list feeds the named→positional SQL rewriter, which scans
//! `:name` tokens left to right, skipping anything inside `${...}` macro
//! spans, and emits `$1..$N` (PostgreSQL) or `?` (everything else).

use serde_json::{Map, Value};

use crate::errors::ParamError;
use crate::types::EngineKind;

/// Parameter type tags, in the order buckets are scanned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamType {
    Integer,
    String,
    Boolean,
    Float,
    Text,
    Date,
    Time,
    DateTime,
    Timestamp,
}

impl ParamType {
    pub const ALL: [ParamType; 9] = [
        ParamType::Integer,
        ParamType::String,
        ParamType::Boolean,
        ParamType::Float,
        ParamType::Text,
        ParamType::Date,
        ParamType::Time,
        ParamType::DateTime,
        ParamType::Timestamp,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamType::Integer => "INTEGER",
            ParamType::String => "STRING",
            ParamType::Boolean => "BOOLEAN",
            ParamType::Float => "FLOAT",
            ParamType::Text => "TEXT",
            ParamType::Date => "DATE",
            ParamType::Time => "TIME",
            ParamType::DateTime => "DATETIME",
            ParamType::Timestamp => "TIMESTAMP",
        }
    }

    pub fn from_str(name: &str) -> Option<ParamType> {
        ParamType::ALL.into_iter().find(|t| t.as_str() == name)
    }
}

/// One tagged parameter value. Each variant owns its payload, so dropping a
/// parameter releases exactly what it allocated.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Integer(i64),
    String(String),
    Boolean(bool),
    Float(f64),
    Text(String),
    Date(String),
    Time(String),
    DateTime(String),
    Timestamp(String),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            ParamValue::Integer(_) => ParamType::Integer,
            ParamValue::String(_) => ParamType::String,
            ParamValue::Boolean(_) => ParamType::Boolean,
            ParamValue::Float(_) => ParamType::Float,
            ParamValue::Text(_) => ParamType::Text,
            ParamValue::Date(_) => ParamType::Date,
            ParamValue::Time(_) => ParamType::Time,
            ParamValue::DateTime(_) => ParamType::DateTime,
            ParamValue::Timestamp(_) => ParamType::Timestamp,
        }
    }

    /// The JSON value this parameter round-trips to.
    pub fn to_json(&self) -> Value {
        match self {
            ParamValue::Integer(v) => Value::from(*v),
            ParamValue::String(v)
            | ParamValue::Text(v)
            | ParamValue::Date(v)
            | ParamValue::Time(v)
            | ParamValue::DateTime(v)
            | ParamValue::Timestamp(v) => Value::from(v.clone()),
            ParamValue::Boolean(v) => Value::from(*v),
            ParamValue::Float(v) => Value::from(*v),
        }
    }

    /// Render as SQL-bindable text for engines without a richer bind type
    /// for this tag.
    pub fn as_text(&self) -> String {
        match self {
            ParamValue::Integer(v) => v.to_string(),
            ParamValue::Boolean(v) => v.to_string(),
            ParamValue::Float(v) => v.to_string(),
            ParamValue::String(v)
            | ParamValue::Text(v)
            | ParamValue::Date(v)
            | ParamValue::Time(v)
            | ParamValue::DateTime(v)
            | ParamValue::Timestamp(v) => v.clone(),
        }
    }
}

/// A named, typed parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedParameter {
    pub name: String,
    pub value: ParamValue,
}

impl TypedParameter {
    pub fn param_type(&self) -> ParamType {
        self.value.param_type()
    }
}

/// Ordered parameter collection. Names are expected unique within one query
/// invocation; lookup returns the first match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterList {
    params: Vec<TypedParameter>,
}

impl ParameterList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, param: TypedParameter) {
        self.params.push(param);
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TypedParameter> {
        self.params.iter().find(|p| p.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypedParameter> {
        self.params.iter()
    }

    /// Re-serialize to the typed-JSON form. Round-trips tag and value
    /// exactly through `parse_typed_parameters`.
    pub fn to_typed_json(&self) -> Value {
        let mut root = Map::new();
        for param in &self.params {
            let bucket = root
                .entry(param.param_type().as_str().to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(map) = bucket {
                map.insert(param.name.clone(), param.value.to_json());
            }
        }
        Value::Object(root)
    }
}

/// Parse a typed-JSON payload into a flat parameter list.
///
/// A value whose JSON type disagrees with its declared tag fails the whole
/// parse, with one exception: an integer is accepted for a FLOAT parameter
/// (implicit widening). `{}` is valid and yields an empty list.
pub fn parse_typed_parameters(json_params: &str) -> Result<ParameterList, ParamError> {
    let root: Value = serde_json::from_str(json_params).map_err(|e| ParamError::Malformed {
        message: e.to_string(),
    })?;
    let root = root.as_object().ok_or(ParamError::RootNotObject)?;

    let mut list = ParameterList::new();
    for param_type in ParamType::ALL {
        // Missing or non-object buckets are skipped, not errors.
        let Some(bucket) = root.get(param_type.as_str()).and_then(Value::as_object) else {
            continue;
        };
        for (name, raw) in bucket {
            let value = coerce_value(param_type, raw).ok_or_else(|| ParamError::TypeMismatch {
                name: name.clone(),
                expected: param_type.as_str(),
            })?;
            list.push(TypedParameter {
                name: name.clone(),
                value,
            });
        }
    }
    Ok(list)
}

fn coerce_value(param_type: ParamType, raw: &Value) -> Option<ParamValue> {
    match param_type {
        ParamType::Integer => raw.as_i64().map(ParamValue::Integer),
        ParamType::Boolean => raw.as_bool().map(ParamValue::Boolean),
        ParamType::Float => match raw {
            Value::Number(n) => n
                .as_f64()
                .filter(|_| n.is_f64() || n.is_i64() || n.is_u64())
                .map(ParamValue::Float),
            _ => None,
        },
        ParamType::String => raw.as_str().map(|s| ParamValue::String(s.to_string())),
        ParamType::Text => raw.as_str().map(|s| ParamValue::Text(s.to_string())),
        ParamType::Date => raw.as_str().map(|s| ParamValue::Date(s.to_string())),
        ParamType::Time => raw.as_str().map(|s| ParamValue::Time(s.to_string())),
        ParamType::DateTime => raw.as_str().map(|s| ParamValue::DateTime(s.to_string())),
        ParamType::Timestamp => raw.as_str().map(|s| ParamValue::Timestamp(s.to_string())),
    }
}

/// Byte spans of `:identifier` tokens found outside `${...}` macro regions,
/// in appearance order. Each span covers the leading colon through the last
/// identifier byte.
fn named_param_spans(sql: &str) -> Vec<(usize, usize)> {
    let bytes = sql.as_bytes();
    let mut spans = Vec::new();
    let mut depth: usize = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && i + 1 < bytes.len() && bytes[i + 1] == b'{' {
            depth += 1;
            i += 2;
            continue;
        }
        if bytes[i] == b'}' {
            // Unbalanced macros are tolerated: depth clamps at zero.
            depth = depth.saturating_sub(1);
            i += 1;
            continue;
        }
        if bytes[i] == b':' && depth == 0 {
            let start = i;
            let mut end = i + 1;
            if end < bytes.len() && (bytes[end].is_ascii_alphabetic() || bytes[end] == b'_') {
                end += 1;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                spans.push((start, end));
                i = end;
                continue;
            }
        }
        i += 1;
    }
    spans
}

/// Build the engine-facing parameter array in SQL appearance order.
///
/// Every qualifying `:name` token must resolve against the supplied list; a
/// missing parameter fails the whole operation with no partial array.
pub fn build_parameter_array<'a>(
    sql_template: &str,
    params: &'a ParameterList,
) -> Result<Vec<&'a TypedParameter>, ParamError> {
    let mut ordered = Vec::new();
    for (start, end) in named_param_spans(sql_template) {
        let name = &sql_template[start + 1..end];
        let param = params.get(name).ok_or_else(|| ParamError::MissingParameter {
            name: name.to_string(),
        })?;
        ordered.push(param);
    }
    Ok(ordered)
}

/// Rewrite named placeholders into the engine's positional syntax and return
/// the parameters in bind order.
///
/// Replacement is a literal first-occurrence substring substitution per
/// parameter: a template that reuses one named parameter twice keeps its
/// second occurrence un-rewritten. A template with zero parameters is
/// returned unchanged with an empty array.
pub fn convert_named_to_positional<'a>(
    sql_template: &str,
    params: &'a ParameterList,
    engine: EngineKind,
) -> Result<(String, Vec<&'a TypedParameter>), ParamError> {
    let ordered = build_parameter_array(sql_template, params)?;
    if ordered.is_empty() {
        return Ok((sql_template.to_string(), ordered));
    }

    let mut rewritten = sql_template.to_string();
    let mut position = 1usize;
    for param in &ordered {
        let placeholder = match engine {
            EngineKind::Postgres => {
                let p = format!("${position}");
                position += 1;
                p
            }
            _ => "?".to_string(),
        };
        let needle = format!(":{}", param.name);
        if let Some(at) = rewritten.find(&needle) {
            rewritten.replace_range(at..at + needle.len(), &placeholder);
        }
    }
    Ok((rewritten, ordered))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(json: &str) -> ParameterList {
        parse_typed_parameters(json).unwrap()
    }

    #[test]
    fn parses_all_type_buckets() {
        let params = list(
            r#"{
                "INTEGER": {"userId": 42},
                "STRING": {"username": "alice"},
                "BOOLEAN": {"active": true},
                "FLOAT": {"score": 4.5},
                "TEXT": {"bio": "hello"},
                "DATE": {"born": "2001-02-03"},
                "TIME": {"at": "10:11:12"},
                "DATETIME": {"seen": "2001-02-03 10:11:12"},
                "TIMESTAMP": {"created": "2001-02-03T10:11:12Z"}
            }"#,
        );
        assert_eq!(params.len(), 9);
        assert_eq!(
            params.get("userId").unwrap().value,
            ParamValue::Integer(42)
        );
        assert_eq!(params.get("born").unwrap().param_type(), ParamType::Date);
    }

    #[test]
    fn empty_object_is_valid_and_empty() {
        let params = list("{}");
        assert!(params.is_empty());
    }

    #[test]
    fn integer_widens_to_float_but_not_vice_versa() {
        let params = list(r#"{"FLOAT": {"score": 3}}"#);
        assert_eq!(params.get("score").unwrap().value, ParamValue::Float(3.0));

        let err = parse_typed_parameters(r#"{"INTEGER": {"n": 3.5}}"#).unwrap_err();
        assert!(matches!(err, ParamError::TypeMismatch { .. }));
    }

    #[test]
    fn malformed_and_non_object_inputs_fail() {
        assert!(matches!(
            parse_typed_parameters("{not json"),
            Err(ParamError::Malformed { .. })
        ));
        assert!(matches!(
            parse_typed_parameters("[1, 2]"),
            Err(ParamError::RootNotObject)
        ));
        assert!(matches!(
            parse_typed_parameters(r#"{"BOOLEAN": {"flag": "yes"}}"#),
            Err(ParamError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn round_trip_preserves_tags_and_values() {
        let json = r#"{
            "INTEGER": {"a": 1},
            "FLOAT": {"b": 2.5},
            "STRING": {"c": "x"},
            "TIMESTAMP": {"d": "2020-01-01T00:00:00Z"}
        }"#;
        let params = list(json);
        let reparsed = parse_typed_parameters(&params.to_typed_json().to_string()).unwrap();
        assert_eq!(params, reparsed);
    }

    #[test]
    fn macro_span_tokens_are_never_collected() {
        let params = list(r#"{"INTEGER": {"id": 1}}"#);
        let ordered = build_parameter_array(
            "SELECT ${col:alias} , ${a ${nested:x} b} , :id FROM t",
            &params,
        )
        .unwrap();
        assert_eq!(ordered.len(), 1);
        assert_eq!(ordered[0].name, "id");
    }

    #[test]
    fn unbalanced_macros_clamp_depth_at_zero() {
        let params = list(r#"{"INTEGER": {"id": 1}}"#);
        // Stray closing braces before the token must not hide it.
        let ordered = build_parameter_array("}} SELECT :id }", &params).unwrap();
        assert_eq!(ordered.len(), 1);
    }

    #[test]
    fn missing_parameter_is_a_hard_failure() {
        let params = list(r#"{"INTEGER": {"id": 1}}"#);
        let err = build_parameter_array("SELECT :id, :missing", &params).unwrap_err();
        assert!(matches!(err, ParamError::MissingParameter { name } if name == "missing"));
    }

    #[test]
    fn postgres_placeholders_follow_sql_order() {
        let params = list(r#"{"STRING": {"username": "al"}, "INTEGER": {"userId": 7}}"#);
        let (sql, ordered) = convert_named_to_positional(
            "SELECT * FROM accounts WHERE id = :userId AND name = :username",
            &params,
            EngineKind::Postgres,
        )
        .unwrap();
        assert_eq!(
            sql,
            "SELECT * FROM accounts WHERE id = $1 AND name = $2"
        );
        assert_eq!(ordered[0].name, "userId");
        assert_eq!(ordered[1].name, "username");
        assert!(!sql.contains(':'));
    }

    #[test]
    fn question_mark_placeholders_for_other_engines() {
        let params = list(r#"{"INTEGER": {"a": 1, "b": 2}}"#);
        for engine in [EngineKind::Mysql, EngineKind::Sqlite, EngineKind::Db2] {
            let (sql, ordered) =
                convert_named_to_positional("UPDATE t SET x = :a WHERE y = :b", &params, engine)
                    .unwrap();
            assert_eq!(sql, "UPDATE t SET x = ? WHERE y = ?");
            assert_eq!(ordered.len(), 2);
        }
    }

    #[test]
    fn zero_parameters_returns_template_unchanged() {
        let params = ParameterList::new();
        let (sql, ordered) =
            convert_named_to_positional("SELECT 42 AS answer", &params, EngineKind::Postgres)
                .unwrap();
        assert_eq!(sql, "SELECT 42 AS answer");
        assert!(ordered.is_empty());
    }

    #[test]
    fn repeated_parameter_keeps_second_occurrence() {
        // Documented single-substitution semantics: only the first
        // occurrence per parameter is rewritten per pass.
        let params = list(r#"{"INTEGER": {"id": 1}}"#);
        let (sql, _) = convert_named_to_positional(
            "SELECT :id WHERE x = :id",
            &params,
            EngineKind::Postgres,
        )
        .unwrap();
        assert_eq!(sql, "SELECT $1 WHERE x = $2");
    }
}
