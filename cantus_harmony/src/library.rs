// Pattern library: loading, validation and compilation.
//
// A library file is versioned JSON:
//
//   { "version": 1, "profiles": { ... }?, "patterns": [ ... ] }
//
// Loading runs in three passes, each of which can fail with `LibraryError`:
//
// 1. Parse to a `serde_json::Value` (syntax errors → `Json`).
// 2. Walk the value with `schema::validate_library` (shape errors →
//    `Schema` with a dotted path), then deserialise into `Pattern`s.
// 3. Cross-field validation and compilation: supported version, unique ids
//    in `[a-z0-9_.-]`, consistent window bounds, known feature names, and
//    compiled accepted-label lists for every step under every known style
//    profile (wildcard labels become regexes here, so a bad regex is a load
//    error, never a match-time one).
//
// Profiles declared in the file are merged into the built-in ones. After
// load, a `PatternLibrary` is immutable; the engine holds it behind an `Arc`.
//
// The built-in library ships as `data/patterns.json` and is embedded with
// `include_str!`.

use crate::features;
use crate::pattern::Pattern;
use crate::schema::{self, SchemaError, SchemaProblem};
use crate::substitution::{self, AcceptedLabel, ProfileSet, StyleProfile};
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

pub const SUPPORTED_VERSION: u64 = 1;

const BUILTIN_LIBRARY: &str = include_str!("../data/patterns.json");

#[derive(Debug, thiserror::Error)]
pub enum LibraryError {
    #[error("cannot read pattern library {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("pattern library is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("pattern library failed validation at {0}")]
    Schema(#[from] SchemaError),
}

#[derive(Deserialize)]
struct LibraryFile {
    version: u64,
    #[serde(default)]
    profiles: BTreeMap<String, StyleProfile>,
    patterns: Vec<Pattern>,
}

/// One step with its accepted labels expanded for every known profile.
#[derive(Clone, Debug)]
pub struct CompiledStep {
    accepted: BTreeMap<String, Vec<AcceptedLabel>>,
    /// Declared plus pattern-local substitutes, for unknown profiles.
    local_only: Vec<AcceptedLabel>,
}

impl CompiledStep {
    /// Accepted labels under `profile`. Empty means any label is accepted.
    pub fn accepted(&self, profile: &str) -> &[AcceptedLabel] {
        self.accepted
            .get(profile)
            .map(Vec::as_slice)
            .unwrap_or(&self.local_only)
    }
}

/// A validated pattern ready for matching.
#[derive(Clone, Debug)]
pub struct CompiledPattern {
    pub def: Pattern,
    /// Parallel to `def.matchers.steps`; empty for structural patterns.
    pub steps: Vec<CompiledStep>,
    /// Declared window bounds (or the step-count default).
    pub min_window: usize,
    pub max_window: usize,
}

impl CompiledPattern {
    pub fn id(&self) -> &str {
        &self.def.id
    }

    /// Window lengths that can actually succeed: declared bounds intersected
    /// with what the steps can consume.
    pub fn effective_bounds(&self) -> Option<(usize, usize)> {
        let (mut lo, mut hi) = (self.min_window.max(1), self.max_window);
        if !self.def.is_structural() {
            lo = lo.max(self.def.required_steps());
            hi = hi.min(self.def.matchers.steps.len());
        }
        (lo <= hi).then_some((lo, hi))
    }
}

/// An immutable, validated set of patterns plus the style profiles they are
/// matched under.
#[derive(Clone, Debug)]
pub struct PatternLibrary {
    version: u64,
    profiles: ProfileSet,
    patterns: Vec<CompiledPattern>,
}

impl PatternLibrary {
    /// The library embedded in the crate.
    pub fn builtin() -> Result<Self, LibraryError> {
        Self::from_json_str(BUILTIN_LIBRARY)
    }

    pub fn load(path: &Path) -> Result<Self, LibraryError> {
        let text = std::fs::read_to_string(path).map_err(|source| LibraryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let library = Self::from_json_str(&text)?;
        tracing::info!(
            path = %path.display(),
            patterns = library.len(),
            "loaded pattern library"
        );
        Ok(library)
    }

    pub fn from_json_str(text: &str) -> Result<Self, LibraryError> {
        let doc: serde_json::Value = serde_json::from_str(text)?;
        schema::validate_library(&doc)?;
        let file: LibraryFile = serde_json::from_value(doc)?;
        Self::compile(file)
    }

    fn compile(file: LibraryFile) -> Result<Self, LibraryError> {
        if file.version != SUPPORTED_VERSION {
            return Err(SchemaError::bad_value(
                "version",
                format!(
                    "unsupported library version {} (expected {SUPPORTED_VERSION})",
                    file.version
                ),
            )
            .into());
        }

        let mut profiles = ProfileSet::builtin();
        profiles.merge(file.profiles);

        let mut seen = BTreeSet::new();
        let mut patterns = Vec::with_capacity(file.patterns.len());
        for (i, def) in file.patterns.into_iter().enumerate() {
            let path = format!("patterns[{i}]");
            if !seen.insert(def.id.clone()) {
                return Err(SchemaError::bad_value(
                    format!("{path}.id"),
                    format!("duplicate pattern id `{}`", def.id),
                )
                .into());
            }
            patterns.push(compile_pattern(def, &path, &profiles)?);
        }

        Ok(PatternLibrary {
            version: file.version,
            profiles,
            patterns,
        })
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn profiles(&self) -> &ProfileSet {
        &self.profiles
    }

    pub fn patterns(&self) -> &[CompiledPattern] {
        &self.patterns
    }

    pub fn get(&self, id: &str) -> Option<&CompiledPattern> {
        self.patterns.iter().find(|p| p.def.id == id)
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

fn valid_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-'))
}

fn compile_pattern(def: Pattern, path: &str, profiles: &ProfileSet) -> Result<CompiledPattern, SchemaError> {
    if !valid_id(&def.id) {
        return Err(SchemaError::bad_value(
            format!("{path}.id"),
            format!("pattern id `{}` must match [a-z0-9_.-]+", def.id),
        ));
    }

    for (k, name) in def.evidence.features.iter().enumerate() {
        if !features::KNOWN_FEATURES.contains(&name.as_str()) {
            return Err(SchemaError::new(
                format!("{path}.evidence.features[{k}]"),
                SchemaProblem::BadEnum {
                    value: name.clone(),
                    allowed: features::KNOWN_FEATURES.to_vec(),
                },
            ));
        }
    }

    let window_path = format!("{path}.matchers.window");
    let (min_window, max_window) = match def.matchers.window {
        Some(w) => (w.min, w.max),
        None => (def.required_steps(), def.matchers.steps.len()),
    };
    if min_window == 0 {
        return Err(SchemaError::bad_value(window_path, "window min must be at least 1"));
    }
    if min_window > max_window {
        return Err(SchemaError::bad_value(
            window_path,
            format!("window min {min_window} exceeds max {max_window}"),
        ));
    }

    let mut steps = Vec::with_capacity(def.matchers.steps.len());
    for (j, step) in def.matchers.steps.iter().enumerate() {
        let step_path = format!("{path}.matchers.steps[{j}]");
        let regex_error = |e: regex::Error| {
            SchemaError::bad_value(format!("{step_path}.labels"), format!("bad wildcard label: {e}"))
        };
        let local_only = substitution::expand_labels(&step.labels, &def.substitutions, None)
            .map_err(regex_error)?;
        let mut accepted = BTreeMap::new();
        for (name, profile) in profiles.iter() {
            let labels = substitution::expand_labels(&step.labels, &def.substitutions, Some(profile))
                .map_err(regex_error)?;
            accepted.insert(name.to_string(), labels);
        }
        steps.push(CompiledStep { accepted, local_only });
    }

    let compiled = CompiledPattern {
        def,
        steps,
        min_window,
        max_window,
    };
    if compiled.effective_bounds().is_none() {
        return Err(SchemaError::bad_value(
            window_path,
            format!(
                "window {min_window}..={max_window} cannot fit {} required of {} steps",
                compiled.def.required_steps(),
                compiled.def.matchers.steps.len()
            ),
        ));
    }
    for profile in &compiled.def.scope.profiles {
        if profiles.get(profile).is_none() {
            tracing::warn!(pattern = %compiled.def.id, profile = %profile, "pattern scoped to unknown profile");
        }
    }
    Ok(compiled)
}
