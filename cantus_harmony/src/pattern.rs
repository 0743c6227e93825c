// Pattern grammar: the serde model of one library entry.
//
// A pattern is either *sequential* (an ordered list of steps aligned token by
// token) or *structural* (a named descriptor predicate evaluated over the
// whole window). Both kinds share scope, constraints, local substitutions and
// an evidence block that drives scoring and evaluation.
//
// These types mirror the JSON layout one to one. Structural checks on the raw
// JSON happen in `schema.rs` before deserialisation; cross-field checks
// (bounds, ids, regexes, feature names) happen in `library.rs`.

use crate::substitution::SubstitutionTable;
use crate::token::Role;
use serde::{Deserialize, Serialize};

/// One pattern as declared in a library file.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Pattern {
    pub id: String,
    pub name: String,
    /// Defaults to the leading `.`-segment of the id.
    #[serde(default)]
    pub family: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
    /// Confidence tracks this pattern contributes to.
    pub tracks: Vec<String>,
    pub matchers: Matchers,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub substitutions: SubstitutionTable,
    pub evidence: EvidenceSpec,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Pattern {
    pub fn family(&self) -> &str {
        match &self.family {
            Some(family) => family,
            None => family_of(&self.id),
        }
    }

    pub fn is_structural(&self) -> bool {
        self.matchers.descriptor.is_some()
    }

    pub fn applies_to_profile(&self, profile: &str) -> bool {
        self.scope.profiles.is_empty() || self.scope.profiles.iter().any(|p| p == profile)
    }

    pub fn applies_to_mode(&self, mode: &str) -> bool {
        self.scope.modes.is_empty() || self.scope.modes.iter().any(|m| m == mode)
    }

    pub fn required_steps(&self) -> usize {
        self.matchers.steps.iter().filter(|s| !s.optional).count()
    }
}

/// Leading `.`-segment of a pattern id: `cadence.authentic.perfect` → `cadence`.
pub fn family_of(pattern_id: &str) -> &str {
    pattern_id.split('.').next().unwrap_or(pattern_id)
}

/// Where a pattern applies. Empty lists mean "everywhere".
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scope {
    #[serde(default)]
    pub profiles: Vec<String>,
    #[serde(default)]
    pub modes: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Matchers {
    #[serde(default)]
    pub window: Option<WindowBounds>,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
    /// Name of a registered structural descriptor.
    #[serde(default)]
    pub descriptor: Option<String>,
}

/// Inclusive token-count bounds for candidate windows.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowBounds {
    pub min: usize,
    pub max: usize,
}

/// Requirement for one token of a sequential pattern.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub role: RoleReq,
    /// Accepted labels; empty accepts any label.
    #[serde(default)]
    pub labels: Vec<String>,
    /// Accepted quality tags (`triad`, `seventh`, `first-inversion`, ...);
    /// empty accepts any quality.
    #[serde(default)]
    pub qualities: Vec<String>,
    /// Flags the token must carry.
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub secondary_target: Option<String>,
    #[serde(default)]
    pub optional: bool,
}

/// Role requirement of a step: `"any"`, one role, or a list of roles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RoleRepr", into = "RoleRepr")]
pub enum RoleReq {
    #[default]
    Any,
    One(Role),
    AnyOf(Vec<Role>),
}

impl RoleReq {
    pub fn accepts(&self, role: Role) -> bool {
        match self {
            RoleReq::Any => true,
            RoleReq::One(r) => *r == role,
            RoleReq::AnyOf(roles) => roles.contains(&role),
        }
    }
}

impl std::fmt::Display for RoleReq {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RoleReq::Any => f.write_str("any"),
            RoleReq::One(r) => write!(f, "{r}"),
            RoleReq::AnyOf(roles) => {
                let names: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
                write!(f, "{}", names.join("|"))
            }
        }
    }
}

/// Wire form of `RoleReq`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RoleRepr {
    One(String),
    Many(Vec<String>),
}

fn parse_role(name: &str) -> Result<Role, String> {
    Role::parse(name).ok_or_else(|| format!("unknown role `{name}`"))
}

impl TryFrom<RoleRepr> for RoleReq {
    type Error = String;

    fn try_from(repr: RoleRepr) -> Result<Self, Self::Error> {
        match repr {
            RoleRepr::One(name) if name == "any" => Ok(RoleReq::Any),
            RoleRepr::One(name) => Ok(RoleReq::One(parse_role(&name)?)),
            RoleRepr::Many(names) if names.is_empty() => Err("empty role list".to_string()),
            RoleRepr::Many(names) => names
                .iter()
                .map(|n| parse_role(n))
                .collect::<Result<Vec<_>, _>>()
                .map(RoleReq::AnyOf),
        }
    }
}

impl From<RoleReq> for RoleRepr {
    fn from(req: RoleReq) -> Self {
        match req {
            RoleReq::Any => RoleRepr::One("any".to_string()),
            RoleReq::One(r) => RoleRepr::One(r.as_str().to_string()),
            RoleReq::AnyOf(roles) => {
                RoleRepr::Many(roles.iter().map(|r| r.as_str().to_string()).collect())
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Presence {
    Required,
    Forbidden,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SopranoPosition {
    #[default]
    Anywhere,
    /// Only the final token of the window counts.
    Arrival,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SopranoConstraint {
    pub degrees: Vec<u8>,
    #[serde(default)]
    pub position: SopranoPosition,
}

/// Whole-window requirements checked after alignment succeeds.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Constraints {
    /// Every token of the window must be in this mode.
    pub mode: Option<String>,
    pub secondary_dominants: Option<Presence>,
    /// Permitted signed bass motions between consecutive tokens of the window.
    pub bass_motion: Option<Vec<i8>>,
    pub soprano: Option<SopranoConstraint>,
    pub required_flags: Vec<String>,
    pub forbidden_flags: Vec<String>,
    pub cadential_six_four: Option<Presence>,
    pub pedal_point: Option<Presence>,
    /// Minimum length (in root motions) of a descending-fifths chain.
    pub fifths_chain_min: Option<usize>,
    /// Treat a cadential six-four followed by a dominant as dominant.
    pub reclassify_cadential_six_four: bool,
}

fn default_scorer() -> String {
    "default".to_string()
}

/// Scoring weights and evaluation settings for one pattern.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvidenceSpec {
    pub base: f64,
    /// Feature extractors to run for this pattern's evidence.
    #[serde(default)]
    pub features: Vec<String>,
    /// Registered evaluator name.
    #[serde(default = "default_scorer")]
    pub scorer: String,
    #[serde(default)]
    pub bonuses: Bonuses,
    #[serde(default)]
    pub penalties: Penalties,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Bonuses {
    /// Scaled by the fraction of stepwise (or held) bass motions.
    pub smooth_bass: f64,
    pub first_inversion: f64,
    /// Dominant → tonic on the last two tokens with soprano on degree 1.
    pub strong_cadence: f64,
}

impl Default for Bonuses {
    fn default() -> Self {
        Bonuses {
            smooth_bass: 0.05,
            first_inversion: 0.03,
            strong_cadence: 0.15,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Penalties {
    /// Per bass leap larger than a fourth.
    pub bass_leap: f64,
}

impl Default for Penalties {
    fn default() -> Self {
        Penalties { bass_leap: 0.05 }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Metadata {
    pub priority: i32,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_requirement_forms() {
        let any: RoleReq = serde_json::from_str(r#""any""#).unwrap();
        assert_eq!(any, RoleReq::Any);
        let one: RoleReq = serde_json::from_str(r#""dominant""#).unwrap();
        assert!(one.accepts(Role::Dominant));
        assert!(!one.accepts(Role::Tonic));
        let many: RoleReq = serde_json::from_str(r#"["tonic", "dominant"]"#).unwrap();
        assert!(many.accepts(Role::Tonic));
        assert!(!many.accepts(Role::Predominant));
        assert!(serde_json::from_str::<RoleReq>(r#""subdominant""#).is_err());
        assert!(serde_json::from_str::<RoleReq>("[]").is_err());
    }

    #[test]
    fn role_requirement_serializes_back() {
        let req = RoleReq::AnyOf(vec![Role::Tonic, Role::Dominant]);
        assert_eq!(serde_json::to_string(&req).unwrap(), r#"["tonic","dominant"]"#);
        assert_eq!(req.to_string(), "tonic|dominant");
    }

    #[test]
    fn minimal_pattern_gets_defaults() {
        let json = r#"{
            "id": "cadence.half",
            "name": "Half cadence",
            "tracks": ["functional"],
            "matchers": {"steps": [{"role": "predominant"}, {"role": "dominant", "labels": ["V"]}]},
            "evidence": {"base": 0.5}
        }"#;
        let p: Pattern = serde_json::from_str(json).unwrap();
        assert_eq!(p.family(), "cadence");
        assert_eq!(p.evidence.scorer, "default");
        assert_eq!(p.evidence.bonuses.strong_cadence, 0.15);
        assert_eq!(p.required_steps(), 2);
        assert!(p.applies_to_profile("jazz"));
        assert!(p.applies_to_mode("dorian"));
        assert!(!p.is_structural());
    }

    #[test]
    fn family_is_leading_id_segment() {
        assert_eq!(family_of("sequence.descending_fifths"), "sequence");
        assert_eq!(family_of("standalone"), "standalone");
    }
}
