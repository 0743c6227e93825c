// Structural validation of a pattern library's raw JSON.
//
// serde's own errors report a line and column but not *where in the document
// model* something went wrong, and they stop at the first problem in
// whichever order fields happen to be visited. The library is hand-edited, so
// the loader first walks the `serde_json::Value` tree and reports problems
// against a dotted path such as `patterns[3].matchers.steps[1].role`:
//
//   - MissingField  required field absent (the path names the parent object)
//   - WrongType     value present with the wrong JSON type
//   - BadEnum       string outside a closed set (roles, presence, position)
//   - BadValue      well-typed but unacceptable (unknown field, empty list)
//
// Only if this pass succeeds is the value deserialised into `pattern.rs`
// types. Cross-field rules (unique ids, window bounds, regex compilation,
// feature names) are checked afterwards by `library.rs`, which reports them
// with the same `SchemaError` type.

use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{path}: {problem}")]
pub struct SchemaError {
    pub path: String,
    pub problem: SchemaProblem,
}

impl SchemaError {
    pub fn new(path: impl Into<String>, problem: SchemaProblem) -> Self {
        SchemaError {
            path: display_path(path.into()),
            problem,
        }
    }

    pub fn bad_value(path: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            path,
            SchemaProblem::BadValue {
                reason: reason.into(),
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SchemaProblem {
    #[error("missing required field `{field}`")]
    MissingField { field: String },
    #[error("expected {expected}, found {found}")]
    WrongType {
        expected: &'static str,
        found: &'static str,
    },
    #[error("`{value}` is not one of {}", .allowed.join(", "))]
    BadEnum {
        value: String,
        allowed: Vec<&'static str>,
    },
    #[error("{reason}")]
    BadValue { reason: String },
}

const ROLE_NAMES: [&str; 5] = ["tonic", "predominant", "dominant", "other", "any"];
const PRESENCE: [&str; 2] = ["required", "forbidden"];
const SOPRANO_POSITIONS: [&str; 2] = ["anywhere", "arrival"];

const LIBRARY_FIELDS: [&str; 3] = ["version", "profiles", "patterns"];
const PATTERN_FIELDS: [&str; 12] = [
    "id",
    "name",
    "family",
    "aliases",
    "tags",
    "scope",
    "tracks",
    "matchers",
    "constraints",
    "substitutions",
    "evidence",
    "metadata",
];
const STEP_FIELDS: [&str; 6] = [
    "role",
    "labels",
    "qualities",
    "flags",
    "secondary_target",
    "optional",
];
const CONSTRAINT_FIELDS: [&str; 10] = [
    "mode",
    "secondary_dominants",
    "bass_motion",
    "soprano",
    "required_flags",
    "forbidden_flags",
    "cadential_six_four",
    "pedal_point",
    "fifths_chain_min",
    "reclassify_cadential_six_four",
];

fn display_path(path: String) -> String {
    if path.is_empty() { "$".to_string() } else { path }
}

fn join(path: &str, field: &str) -> String {
    if path.is_empty() {
        field.to_string()
    } else {
        format!("{path}.{field}")
    }
}

fn index(path: &str, i: usize) -> String {
    format!("{path}[{i}]")
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_u64() || n.is_i64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn wrong_type(path: &str, expected: &'static str, value: &Value) -> SchemaError {
    SchemaError::new(
        path,
        SchemaProblem::WrongType {
            expected,
            found: type_name(value),
        },
    )
}

fn object<'a>(value: &'a Value, path: &str) -> Result<&'a Map<String, Value>, SchemaError> {
    value.as_object().ok_or_else(|| wrong_type(path, "object", value))
}

fn array<'a>(value: &'a Value, path: &str) -> Result<&'a Vec<Value>, SchemaError> {
    value.as_array().ok_or_else(|| wrong_type(path, "array", value))
}

fn string<'a>(value: &'a Value, path: &str) -> Result<&'a str, SchemaError> {
    value.as_str().ok_or_else(|| wrong_type(path, "string", value))
}

fn number(value: &Value, path: &str) -> Result<f64, SchemaError> {
    value.as_f64().ok_or_else(|| wrong_type(path, "number", value))
}

fn unsigned(value: &Value, path: &str) -> Result<u64, SchemaError> {
    value
        .as_u64()
        .ok_or_else(|| wrong_type(path, "non-negative integer", value))
}

fn boolean(value: &Value, path: &str) -> Result<bool, SchemaError> {
    value.as_bool().ok_or_else(|| wrong_type(path, "boolean", value))
}

fn one_of(value: &Value, path: &str, allowed: &[&'static str]) -> Result<(), SchemaError> {
    let s = string(value, path)?;
    if allowed.contains(&s) {
        Ok(())
    } else {
        Err(SchemaError::new(
            path,
            SchemaProblem::BadEnum {
                value: s.to_string(),
                allowed: allowed.to_vec(),
            },
        ))
    }
}

fn required<'a>(map: &'a Map<String, Value>, path: &str, field: &str) -> Result<&'a Value, SchemaError> {
    map.get(field).ok_or_else(|| {
        SchemaError::new(
            path,
            SchemaProblem::MissingField {
                field: field.to_string(),
            },
        )
    })
}

fn no_unknown_fields(map: &Map<String, Value>, path: &str, known: &[&str]) -> Result<(), SchemaError> {
    match map.keys().find(|k| !known.contains(&k.as_str())) {
        Some(key) => Err(SchemaError::bad_value(
            join(path, key),
            format!("unknown field `{key}`"),
        )),
        None => Ok(()),
    }
}

fn string_list(value: &Value, path: &str) -> Result<(), SchemaError> {
    for (i, item) in array(value, path)?.iter().enumerate() {
        string(item, &index(path, i))?;
    }
    Ok(())
}

fn optional<'a>(map: &'a Map<String, Value>, field: &str) -> Option<&'a Value> {
    map.get(field).filter(|v| !v.is_null())
}

/// Walk a whole library document.
pub fn validate_library(doc: &Value) -> Result<(), SchemaError> {
    let root = object(doc, "")?;
    no_unknown_fields(root, "", &LIBRARY_FIELDS)?;
    unsigned(required(root, "", "version")?, "version")?;
    if let Some(profiles) = optional(root, "profiles") {
        validate_profiles(profiles, "profiles")?;
    }
    let patterns = array(required(root, "", "patterns")?, "patterns")?;
    for (i, pattern) in patterns.iter().enumerate() {
        validate_pattern(pattern, &index("patterns", i))?;
    }
    Ok(())
}

fn validate_profiles(value: &Value, path: &str) -> Result<(), SchemaError> {
    for (name, profile) in object(value, path)? {
        let ppath = join(path, name);
        let map = object(profile, &ppath)?;
        no_unknown_fields(map, &ppath, &["description", "substitutions"])?;
        if let Some(desc) = optional(map, "description") {
            string(desc, &join(&ppath, "description"))?;
        }
        if let Some(table) = optional(map, "substitutions") {
            validate_substitutions(table, &join(&ppath, "substitutions"))?;
        }
    }
    Ok(())
}

fn validate_substitutions(value: &Value, path: &str) -> Result<(), SchemaError> {
    for (label, subs) in object(value, path)? {
        string_list(subs, &join(path, label))?;
    }
    Ok(())
}

fn validate_pattern(value: &Value, path: &str) -> Result<(), SchemaError> {
    let map = object(value, path)?;
    no_unknown_fields(map, path, &PATTERN_FIELDS)?;

    string(required(map, path, "id")?, &join(path, "id"))?;
    string(required(map, path, "name")?, &join(path, "name"))?;
    if let Some(family) = optional(map, "family") {
        string(family, &join(path, "family"))?;
    }
    for field in ["aliases", "tags"] {
        if let Some(list) = optional(map, field) {
            string_list(list, &join(path, field))?;
        }
    }
    if let Some(scope) = optional(map, "scope") {
        let spath = join(path, "scope");
        let smap = object(scope, &spath)?;
        no_unknown_fields(smap, &spath, &["profiles", "modes"])?;
        for field in ["profiles", "modes"] {
            if let Some(list) = optional(smap, field) {
                string_list(list, &join(&spath, field))?;
            }
        }
    }

    let tpath = join(path, "tracks");
    let tracks = required(map, path, "tracks")?;
    string_list(tracks, &tpath)?;
    if array(tracks, &tpath)?.is_empty() {
        return Err(SchemaError::bad_value(tpath, "at least one track is required"));
    }

    validate_matchers(required(map, path, "matchers")?, &join(path, "matchers"))?;
    if let Some(constraints) = optional(map, "constraints") {
        validate_constraints(constraints, &join(path, "constraints"))?;
    }
    if let Some(table) = optional(map, "substitutions") {
        validate_substitutions(table, &join(path, "substitutions"))?;
    }
    validate_evidence(required(map, path, "evidence")?, &join(path, "evidence"))?;
    if let Some(meta) = optional(map, "metadata") {
        let mpath = join(path, "metadata");
        let mmap = object(meta, &mpath)?;
        no_unknown_fields(mmap, &mpath, &["priority", "description"])?;
        if let Some(priority) = optional(mmap, "priority") {
            let ppath = join(&mpath, "priority");
            let Some(value) = priority.as_i64() else {
                return Err(wrong_type(&ppath, "integer", priority));
            };
            if i32::try_from(value).is_err() {
                return Err(SchemaError::bad_value(
                    ppath,
                    format!("priority {value} is outside {}..={}", i32::MIN, i32::MAX),
                ));
            }
        }
        if let Some(desc) = optional(mmap, "description") {
            string(desc, &join(&mpath, "description"))?;
        }
    }
    Ok(())
}

fn validate_matchers(value: &Value, path: &str) -> Result<(), SchemaError> {
    let map = object(value, path)?;
    no_unknown_fields(map, path, &["window", "steps", "descriptor"])?;

    if let Some(window) = optional(map, "window") {
        let wpath = join(path, "window");
        let wmap = object(window, &wpath)?;
        no_unknown_fields(wmap, &wpath, &["min", "max"])?;
        unsigned(required(wmap, &wpath, "min")?, &join(&wpath, "min"))?;
        unsigned(required(wmap, &wpath, "max")?, &join(&wpath, "max"))?;
    }

    match (optional(map, "steps"), optional(map, "descriptor")) {
        (Some(_), Some(_)) => Err(SchemaError::bad_value(
            path,
            "`steps` and `descriptor` are mutually exclusive",
        )),
        (None, None) => Err(SchemaError::new(
            path,
            SchemaProblem::MissingField {
                field: "steps".to_string(),
            },
        )),
        (None, Some(descriptor)) => {
            string(descriptor, &join(path, "descriptor"))?;
            if optional(map, "window").is_none() {
                return Err(SchemaError::new(
                    path,
                    SchemaProblem::MissingField {
                        field: "window".to_string(),
                    },
                ));
            }
            Ok(())
        }
        (Some(steps), None) => {
            let spath = join(path, "steps");
            let steps = array(steps, &spath)?;
            if steps.is_empty() {
                return Err(SchemaError::bad_value(spath, "at least one step is required"));
            }
            for (i, step) in steps.iter().enumerate() {
                validate_step(step, &index(&spath, i))?;
            }
            Ok(())
        }
    }
}

fn validate_step(value: &Value, path: &str) -> Result<(), SchemaError> {
    let map = object(value, path)?;
    no_unknown_fields(map, path, &STEP_FIELDS)?;

    if let Some(role) = optional(map, "role") {
        let rpath = join(path, "role");
        match role {
            Value::String(_) => one_of(role, &rpath, &ROLE_NAMES)?,
            Value::Array(items) => {
                if items.is_empty() {
                    return Err(SchemaError::bad_value(rpath, "role list must not be empty"));
                }
                for (i, item) in items.iter().enumerate() {
                    one_of(item, &index(&rpath, i), &ROLE_NAMES[..4])?;
                }
            }
            other => return Err(wrong_type(&rpath, "string or array of strings", other)),
        }
    }
    for field in ["labels", "qualities", "flags"] {
        if let Some(list) = optional(map, field) {
            string_list(list, &join(path, field))?;
        }
    }
    if let Some(target) = optional(map, "secondary_target") {
        string(target, &join(path, "secondary_target"))?;
    }
    if let Some(opt) = optional(map, "optional") {
        boolean(opt, &join(path, "optional"))?;
    }
    Ok(())
}

fn validate_constraints(value: &Value, path: &str) -> Result<(), SchemaError> {
    let map = object(value, path)?;
    no_unknown_fields(map, path, &CONSTRAINT_FIELDS)?;

    if let Some(mode) = optional(map, "mode") {
        string(mode, &join(path, "mode"))?;
    }
    for field in ["secondary_dominants", "cadential_six_four", "pedal_point"] {
        if let Some(v) = optional(map, field) {
            one_of(v, &join(path, field), &PRESENCE)?;
        }
    }
    if let Some(motions) = optional(map, "bass_motion") {
        let bpath = join(path, "bass_motion");
        for (i, m) in array(motions, &bpath)?.iter().enumerate() {
            let ipath = index(&bpath, i);
            match m.as_i64() {
                Some(n) if (-12..=12).contains(&n) => {}
                Some(n) => {
                    return Err(SchemaError::bad_value(
                        ipath,
                        format!("bass motion {n} is outside -12..=12 semitones"),
                    ));
                }
                None => return Err(wrong_type(&ipath, "integer", m)),
            }
        }
    }
    if let Some(soprano) = optional(map, "soprano") {
        let spath = join(path, "soprano");
        let smap = object(soprano, &spath)?;
        no_unknown_fields(smap, &spath, &["degrees", "position"])?;
        let dpath = join(&spath, "degrees");
        for (i, d) in array(required(smap, &spath, "degrees")?, &dpath)?.iter().enumerate() {
            let ipath = index(&dpath, i);
            let degree = unsigned(d, &ipath)?;
            if !(1..=7).contains(&degree) {
                return Err(SchemaError::bad_value(
                    ipath,
                    format!("scale degree {degree} is outside 1..=7"),
                ));
            }
        }
        if let Some(position) = optional(smap, "position") {
            one_of(position, &join(&spath, "position"), &SOPRANO_POSITIONS)?;
        }
    }
    for field in ["required_flags", "forbidden_flags"] {
        if let Some(list) = optional(map, field) {
            string_list(list, &join(path, field))?;
        }
    }
    if let Some(min) = optional(map, "fifths_chain_min") {
        unsigned(min, &join(path, "fifths_chain_min"))?;
    }
    if let Some(flag) = optional(map, "reclassify_cadential_six_four") {
        boolean(flag, &join(path, "reclassify_cadential_six_four"))?;
    }
    Ok(())
}

fn validate_evidence(value: &Value, path: &str) -> Result<(), SchemaError> {
    let map = object(value, path)?;
    no_unknown_fields(map, path, &["base", "features", "scorer", "bonuses", "penalties"])?;

    let bpath = join(path, "base");
    let base = number(required(map, path, "base")?, &bpath)?;
    if !(0.0..=1.0).contains(&base) {
        return Err(SchemaError::bad_value(bpath, format!("base weight {base} is outside [0, 1]")));
    }
    if let Some(features) = optional(map, "features") {
        string_list(features, &join(path, "features"))?;
    }
    if let Some(scorer) = optional(map, "scorer") {
        string(scorer, &join(path, "scorer"))?;
    }
    for (field, known) in [
        ("bonuses", &["smooth_bass", "first_inversion", "strong_cadence"][..]),
        ("penalties", &["bass_leap"][..]),
    ] {
        if let Some(block) = optional(map, field) {
            let fpath = join(path, field);
            let fmap = object(block, &fpath)?;
            no_unknown_fields(fmap, &fpath, known)?;
            for (name, weight) in fmap {
                number(weight, &join(&fpath, name))?;
            }
        }
    }
    Ok(())
}
