// Style-profile substitution tables and accepted-label expansion.
//
// A style profile declares chord-function equivalences for one idiom: in a
// classical profile `IV` may be replaced by `ii6`, in a jazz profile `V7` by
// the tritone substitute `bII7`. Patterns may also declare their own local
// substitutions. When a step accepts a label set, the matcher compares the
// token against the *expanded* set:
//
//   declared labels ∪ pattern-local substitutes ∪ active-profile substitutes
//
// Expansion happens once, at library load, for every known profile; the
// matcher then only looks up the precomputed list for the active profile.
//
// Inversion sensitivity is decided per accepted label: it is sensitive if any
// of the step's *declared* labels carries an inversion figure, or if the
// accepted label itself does (so a `ii6` substitute never accepts a root
// position `ii`).
//
// Built-in profiles: `classical`, `jazz`, `pop`, `modal`. A pattern library
// file may add profiles or extend existing ones (see `library.rs`).

use crate::labels;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Substitution table: label → labels that may stand in for it.
pub type SubstitutionTable = BTreeMap<String, Vec<String>>;

/// One idiom's chord-function equivalences.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StyleProfile {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub substitutions: SubstitutionTable,
}

impl StyleProfile {
    /// Build from `(label, "substitute substitute ...")` pairs.
    fn from_pairs(description: &str, pairs: &[(&str, &str)]) -> Self {
        StyleProfile {
            description: description.to_string(),
            substitutions: pairs
                .iter()
                .map(|(from, to)| {
                    (from.to_string(), to.split_whitespace().map(str::to_string).collect())
                })
                .collect(),
        }
    }

    /// Substitutes declared for `label`, matched on canonical spelling.
    pub fn substitutes_for(&self, label: &str) -> impl Iterator<Item = &String> {
        substitutes_in(&self.substitutions, label)
    }
}

fn substitutes_in<'a>(
    table: &'a SubstitutionTable,
    label: &str,
) -> impl Iterator<Item = &'a String> {
    let key = labels::normalize(label, true);
    table
        .iter()
        .filter(move |(from, _)| labels::normalize(from, true) == key)
        .flat_map(|(_, to)| to.iter())
}

/// The set of style profiles known to a library.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProfileSet {
    profiles: BTreeMap<String, StyleProfile>,
}

impl ProfileSet {
    pub fn builtin() -> Self {
        let mut profiles = BTreeMap::new();
        profiles.insert(
            "classical".to_string(),
            StyleProfile::from_pairs(
                "Common-practice functional harmony",
                &[
                    ("IV", "ii6 ii65 ii"),
                    ("ii", "IV ii6"),
                    ("iv", "iiø65 iio6"),
                    ("V", "viio6 V7"),
                    ("V7", "viio7 viiø7"),
                    ("I", "I6"),
                    ("vi", "IV6"),
                ],
            ),
        );
        profiles.insert(
            "jazz".to_string(),
            StyleProfile::from_pairs(
                "Jazz standards: tritone substitution and extended tonics",
                &[
                    ("V7", "bII7 V9 V13"),
                    ("V", "V7 bII7"),
                    ("I", "IM7 I6 iii7"),
                    ("IV", "IVM7"),
                    ("ii7", "IVM7 ii9"),
                ],
            ),
        );
        profiles.insert(
            "pop".to_string(),
            StyleProfile::from_pairs(
                "Popular song: borrowed subdominants and flat-seven dominants",
                &[("IV", "iv IVsus2"), ("V", "bVII Vsus4"), ("I", "Isus2")],
            ),
        );
        profiles.insert(
            "modal".to_string(),
            StyleProfile::from_pairs(
                "Modal harmony: minor dominants and subtonic chords",
                &[("V", "v bVII"), ("IV", "iv"), ("I", "i")],
            ),
        );
        ProfileSet { profiles }
    }

    pub fn empty() -> Self {
        ProfileSet {
            profiles: BTreeMap::new(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&StyleProfile> {
        self.profiles.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.profiles.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &StyleProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Add profiles; tables for an existing profile are extended, not replaced.
    pub fn merge(&mut self, extra: BTreeMap<String, StyleProfile>) {
        for (name, profile) in extra {
            let entry = self.profiles.entry(name).or_default();
            if entry.description.is_empty() {
                entry.description = profile.description;
            }
            for (from, to) in profile.substitutions {
                let list = entry.substitutions.entry(from).or_default();
                for label in to {
                    if !list.contains(&label) {
                        list.push(label);
                    }
                }
            }
        }
    }
}

/// A label a step will accept, pre-normalised for comparison.
#[derive(Clone, Debug)]
pub struct AcceptedLabel {
    /// Label as written in the library.
    pub text: String,
    pub via_substitution: bool,
    pub inversion_sensitive: bool,
    /// Canonical spelling under this label's inversion sensitivity.
    pub canonical: String,
    /// Canonical spelling with any secondary target removed.
    pub stripped: String,
    /// Compiled pattern for wildcard labels.
    pub regex: Option<Regex>,
}

impl AcceptedLabel {
    pub fn new(text: &str, via_substitution: bool, inversion_sensitive: bool) -> Result<Self, regex::Error> {
        let regex = if labels::is_wildcard(text) {
            Some(Regex::new(&labels::wildcard_to_regex(text))?)
        } else {
            None
        };
        Ok(AcceptedLabel {
            text: text.to_string(),
            via_substitution,
            inversion_sensitive,
            canonical: labels::normalize(text, inversion_sensitive),
            stripped: labels::strip_secondary(text, inversion_sensitive),
            regex,
        })
    }
}

/// Expand a step's declared labels through the local and profile tables.
///
/// Order is declared labels first, then local substitutes, then profile
/// substitutes; duplicates (by text) are dropped.
pub fn expand_labels(
    declared: &[String],
    local: &SubstitutionTable,
    profile: Option<&StyleProfile>,
) -> Result<Vec<AcceptedLabel>, regex::Error> {
    let declared_sensitive = declared.iter().any(|l| labels::has_inversion_figure(l));
    let mut out = Vec::new();

    for label in declared {
        push_accepted(&mut out, label, false, declared_sensitive)?;
    }
    for label in declared {
        for sub in substitutes_in(local, label) {
            push_accepted(&mut out, sub, true, declared_sensitive)?;
        }
        if let Some(profile) = profile {
            for sub in profile.substitutes_for(label) {
                push_accepted(&mut out, sub, true, declared_sensitive)?;
            }
        }
    }
    Ok(out)
}

fn push_accepted(
    out: &mut Vec<AcceptedLabel>,
    text: &str,
    via_substitution: bool,
    declared_sensitive: bool,
) -> Result<(), regex::Error> {
    if out.iter().any(|l| l.text == text) {
        return Ok(());
    }
    let sensitive = declared_sensitive || labels::has_inversion_figure(text);
    out.push(AcceptedLabel::new(text, via_substitution, sensitive)?);
    Ok(())
}
