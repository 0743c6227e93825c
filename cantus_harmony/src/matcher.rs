// Matching engine: align a token sequence against every pattern in a library.
//
// For each pattern in scope for the active profile, windows of every length
// the pattern can accept slide across the sequence. Each (pattern, window)
// attempt yields exactly one `MatchResult`, successful or carrying a typed
// `MatchFailure`. Failures are ordinary values: one pattern or window failing
// never stops the others.
//
// Sequential patterns are aligned with two cursors, one over steps and one
// over tokens:
//
//   - a matching step consumes its token and both cursors advance;
//   - an optional step that does not match is skipped (step cursor only);
//   - an optional step is also skipped without trying it when the tokens left
//     are only enough for the required steps still ahead;
//   - an optional step that matched is taken back and skipped if the rest of
//     the window cannot be aligned after it;
//   - a required step that does not match aborts with `StepMismatch`;
//   - running out of tokens before the required steps, or finishing the steps
//     with tokens left over, is a `WindowSizeRejection`.
//
// A step checks, in order: role (against the *effective* role, see below),
// label, quality tags, flags, secondary target. Label comparison tries the
// expanded accepted set (see `substitution.rs`) in three passes: exact
// canonical spelling, then wildcard regexes, then canonical spelling with the
// token's secondary target stripped.
//
// Effective roles: with `reclassify_cadential_six_four`, a cadential six-four
// immediately followed by a dominant token inside the same window counts as
// dominant for this attempt. The token itself is never modified.
//
// Structural patterns run their descriptor predicate over the window instead
// of aligning steps. Either way, a window that passes is then checked against
// the pattern's global constraints and scored (`scoring.rs`).
//
// With `MatcherConfig::parallel`, patterns are matched on the rayon pool.
// Results are always returned in library order, then window length, then
// window start.

use crate::cache::MatchCache;
use crate::config::MatcherConfig;
use crate::constraints::{ConstraintInput, ConstraintRegistry};
use crate::descriptors::DescriptorRegistry;
use crate::events::{self, WindowEvents};
use crate::labels;
use crate::library::{CompiledPattern, CompiledStep, PatternLibrary};
use crate::pattern::StepSpec;
use crate::scoring::{self, ScoreBreakdown};
use crate::substitution::AcceptedLabel;
use crate::token::{Role, Span, Token};
use rayon::prelude::*;
use serde::Serialize;
use std::fmt;

/// How one step was satisfied.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepEvidence {
    pub step: usize,
    /// Absolute token index.
    pub token: usize,
    pub label: String,
    pub role: Role,
    /// Accepted label that matched, when the step lists labels.
    pub accepted_as: Option<String>,
    pub via_substitution: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MismatchReason {
    #[error("role {found} does not satisfy `{expected}`")]
    Role { expected: String, found: Role },
    #[error("label `{found}` is not one of {accepted:?}")]
    Label { found: String, accepted: Vec<String> },
    #[error("quality {found:?} is not one of {accepted:?}")]
    Quality {
        found: Vec<String>,
        accepted: Vec<String>,
    },
    #[error("missing flag `{flag}`")]
    MissingFlag { flag: String },
    #[error("secondary target {found:?} is not `{expected}`")]
    SecondaryTarget {
        expected: String,
        found: Option<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MatchFailure {
    #[error("step {step} rejected token {token}: {reason}")]
    StepMismatch {
        step: usize,
        token: usize,
        reason: MismatchReason,
    },
    #[error("constraint `{constraint}` violated: {detail}")]
    ConstraintViolation { constraint: String, detail: String },
    #[error("window of {len} tokens rejected (accepts {min}..={max}): {detail}")]
    WindowSizeRejection {
        len: usize,
        min: usize,
        max: usize,
        detail: String,
    },
    #[error("descriptor `{descriptor}` failed: {detail}")]
    DescriptorFailed { descriptor: String, detail: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FailureKind {
    StepMismatch,
    ConstraintViolation,
    WindowSizeRejection,
    DescriptorFailed,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::StepMismatch => "step_mismatch",
            FailureKind::ConstraintViolation => "constraint_violation",
            FailureKind::WindowSizeRejection => "window_size_rejection",
            FailureKind::DescriptorFailed => "descriptor_failed",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl MatchFailure {
    pub fn kind(&self) -> FailureKind {
        match self {
            MatchFailure::StepMismatch { .. } => FailureKind::StepMismatch,
            MatchFailure::ConstraintViolation { .. } => FailureKind::ConstraintViolation,
            MatchFailure::WindowSizeRejection { .. } => FailureKind::WindowSizeRejection,
            MatchFailure::DescriptorFailed { .. } => FailureKind::DescriptorFailed,
        }
    }
}

/// Outcome of one (pattern, window) attempt.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchResult {
    pub pattern_id: String,
    pub span: Span,
    /// Zero for failed attempts.
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub steps: Vec<StepEvidence>,
    /// Optional steps that were skipped.
    pub skipped_steps: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<MatchFailure>,
}

impl MatchResult {
    /// A successful result with no step detail.
    pub fn matched(pattern_id: impl Into<String>, span: Span, score: f64) -> Self {
        MatchResult {
            pattern_id: pattern_id.into(),
            span,
            score,
            breakdown: ScoreBreakdown {
                total: score,
                ..ScoreBreakdown::default()
            },
            steps: Vec::new(),
            skipped_steps: 0,
            failure: None,
        }
    }

    fn failed(pattern_id: &str, span: Span, failure: MatchFailure) -> Self {
        MatchResult {
            pattern_id: pattern_id.to_string(),
            span,
            score: 0.0,
            breakdown: ScoreBreakdown::default(),
            steps: Vec::new(),
            skipped_steps: 0,
            failure: Some(failure),
        }
    }

    pub fn success(&self) -> bool {
        self.failure.is_none()
    }
}

/// Read-only collaborators for matching.
#[derive(Clone, Copy)]
pub struct MatchContext<'a> {
    pub descriptors: &'a DescriptorRegistry,
    pub constraints: &'a ConstraintRegistry,
    pub config: &'a MatcherConfig,
}

/// Every attempt for every in-scope pattern, in library order.
pub fn match_all(
    ctx: MatchContext<'_>,
    library: &PatternLibrary,
    tokens: &[Token],
    profile: &str,
    mut cache: Option<&mut MatchCache>,
) -> Vec<MatchResult> {
    let patterns: Vec<&CompiledPattern> = library
        .patterns()
        .iter()
        .filter(|p| p.def.applies_to_profile(profile))
        .collect();

    let mut slots: Vec<Option<Vec<MatchResult>>> = patterns
        .iter()
        .map(|p| cache.as_deref_mut().and_then(|c| c.get(p.id(), profile, tokens)))
        .collect();

    let missing: Vec<usize> = (0..patterns.len()).filter(|&i| slots[i].is_none()).collect();
    let run = |i: usize| (i, match_pattern(ctx, patterns[i], tokens, profile));
    let computed: Vec<(usize, Vec<MatchResult>)> = if ctx.config.parallel {
        missing.par_iter().map(|&i| run(i)).collect()
    } else {
        missing.iter().map(|&i| run(i)).collect()
    };

    for (i, results) in computed {
        if let Some(c) = cache.as_deref_mut() {
            c.insert(patterns[i].id(), profile, tokens, results.clone());
        }
        slots[i] = Some(results);
    }

    slots.into_iter().flatten().flatten().collect()
}

/// Every attempt for one pattern. Empty if the pattern is out of scope for
/// `profile`.
pub fn match_pattern(
    ctx: MatchContext<'_>,
    pattern: &CompiledPattern,
    tokens: &[Token],
    profile: &str,
) -> Vec<MatchResult> {
    let def = &pattern.def;
    if !def.applies_to_profile(profile) {
        return Vec::new();
    }
    let Some((lo, hi)) = pattern.effective_bounds() else {
        return Vec::new();
    };

    let n = tokens.len();
    if n < lo {
        return vec![MatchResult::failed(
            &def.id,
            Span::new(0, n),
            MatchFailure::WindowSizeRejection {
                len: n,
                min: lo,
                max: hi,
                detail: "sequence is shorter than the shortest acceptable window".to_string(),
            },
        )];
    }

    let mut out = Vec::new();
    for len in lo..=hi.min(n) {
        for start in 0..=n - len {
            let span = Span::new(start, start + len);
            let window = &tokens[span.start..span.end];
            if !window.iter().all(|t| def.applies_to_mode(&t.mode)) {
                continue;
            }
            let result = match try_window(ctx, pattern, tokens, span, profile, (lo, hi)) {
                Ok(result) => result,
                Err(failure) => MatchResult::failed(&def.id, span, failure),
            };
            out.push(result);
        }
    }

    tracing::debug!(
        pattern = %def.id,
        attempts = out.len(),
        matched = out.iter().filter(|r| r.success()).count(),
        "matched pattern"
    );
    out
}

fn try_window(
    ctx: MatchContext<'_>,
    pattern: &CompiledPattern,
    tokens: &[Token],
    span: Span,
    profile: &str,
    bounds: (usize, usize),
) -> Result<MatchResult, MatchFailure> {
    let def = &pattern.def;
    let window = &tokens[span.start..span.end];
    let roles = effective_roles(pattern, tokens, span);

    let (steps, skipped_steps, events) = match &def.matchers.descriptor {
        Some(name) => {
            let events = events::extract(window);
            check_descriptor(ctx.descriptors, name, window, &events)?;
            (Vec::new(), 0, events)
        }
        None => {
            let (steps, skipped) = align(
                &def.matchers.steps,
                &pattern.steps,
                window,
                &roles,
                span.start,
                profile,
                bounds,
            )?;
            (steps, skipped, events::extract(window))
        }
    };

    let input = ConstraintInput {
        window,
        roles: &roles,
        events: &events,
    };
    ctx.constraints
        .check(&def.constraints, &input)
        .map_err(|(constraint, detail)| MatchFailure::ConstraintViolation { constraint, detail })?;

    let breakdown = scoring::score_window(&def.evidence, window, &roles, &events, ctx.config);
    Ok(MatchResult {
        pattern_id: def.id.clone(),
        span,
        score: breakdown.total,
        breakdown,
        steps,
        skipped_steps,
        failure: None,
    })
}

fn check_descriptor(
    descriptors: &DescriptorRegistry,
    name: &str,
    window: &[Token],
    events: &WindowEvents,
) -> Result<(), MatchFailure> {
    let failed = |detail: &str| MatchFailure::DescriptorFailed {
        descriptor: name.to_string(),
        detail: detail.to_string(),
    };
    let predicate = descriptors
        .get(name)
        .ok_or_else(|| failed("no descriptor registered under this name"))?;
    if predicate(window, events) {
        Ok(())
    } else {
        Err(failed("window does not have the described structure"))
    }
}

/// Roles as seen by this pattern, parallel to the window.
fn effective_roles(pattern: &CompiledPattern, tokens: &[Token], span: Span) -> Vec<Role> {
    let reclassify = pattern.def.constraints.reclassify_cadential_six_four;
    (span.start..span.end)
        .map(|i| {
            let token = &tokens[i];
            let before_dominant = i + 1 < span.end && tokens[i + 1].role == Role::Dominant;
            if reclassify && before_dominant && events::is_cadential_six_four(token) {
                Role::Dominant
            } else {
                token.role
            }
        })
        .collect()
}

/// Steps against tokens with backtracking over optional steps. An optional
/// step first tries to take the current token; if the rest of the window then
/// fails to align, it is skipped instead. When both fail, the failure of the
/// consuming branch is reported.
struct Aligner<'a> {
    specs: &'a [StepSpec],
    compiled: &'a [CompiledStep],
    window: &'a [Token],
    roles: &'a [Role],
    offset: usize,
    profile: &'a str,
    bounds: (usize, usize),
    /// required_after[s]: required steps strictly after step s.
    required_after: Vec<usize>,
}

impl Aligner<'_> {
    fn size_rejection(&self, detail: String) -> MatchFailure {
        MatchFailure::WindowSizeRejection {
            len: self.window.len(),
            min: self.bounds.0,
            max: self.bounds.1,
            detail,
        }
    }

    /// Evidence for steps `s..` (in reverse step order) and the number of
    /// skipped optional steps.
    fn from(&self, s: usize, t: usize) -> Result<(Vec<StepEvidence>, usize), MatchFailure> {
        let Some((spec, step)) = self.specs.get(s).zip(self.compiled.get(s)) else {
            if t < self.window.len() {
                return Err(self.size_rejection(format!(
                    "{} tokens left after the last step",
                    self.window.len() - t
                )));
            }
            return Ok((Vec::new(), 0));
        };

        let skip = || self.from(s + 1, t).map(|(evidence, skipped)| (evidence, skipped + 1));
        let remaining = self.window.len() - t;
        if spec.optional && remaining <= self.required_after[s] {
            return skip();
        }
        if remaining == 0 {
            return Err(self.size_rejection(format!("ran out of tokens at required step {s}")));
        }

        let token = &self.window[t];
        match check_step(spec, step, token, self.roles[t], self.profile) {
            Ok(accepted) => {
                let consumed = self.from(s + 1, t + 1).map(|(mut evidence, skipped)| {
                    evidence.push(StepEvidence {
                        step: s,
                        token: self.offset + t,
                        label: token.label.clone(),
                        role: self.roles[t],
                        via_substitution: accepted.is_some_and(|a| a.via_substitution),
                        accepted_as: accepted.map(|a| a.text.clone()),
                    });
                    (evidence, skipped)
                });
                match consumed {
                    Err(failure) if spec.optional => skip().map_err(|_| failure),
                    other => other,
                }
            }
            Err(_) if spec.optional => skip(),
            Err(reason) => Err(MatchFailure::StepMismatch {
                step: s,
                token: self.offset + t,
                reason,
            }),
        }
    }
}

fn align(
    specs: &[StepSpec],
    compiled: &[CompiledStep],
    window: &[Token],
    roles: &[Role],
    offset: usize,
    profile: &str,
    bounds: (usize, usize),
) -> Result<(Vec<StepEvidence>, usize), MatchFailure> {
    let mut required_after = vec![0usize; specs.len()];
    for s in (0..specs.len().saturating_sub(1)).rev() {
        required_after[s] = required_after[s + 1] + usize::from(!specs[s + 1].optional);
    }

    let aligner = Aligner {
        specs,
        compiled,
        window,
        roles,
        offset,
        profile,
        bounds,
        required_after,
    };
    let (mut evidence, skipped) = aligner.from(0, 0)?;
    evidence.reverse();
    Ok((evidence, skipped))
}

fn check_step<'a>(
    spec: &StepSpec,
    step: &'a CompiledStep,
    token: &Token,
    role: Role,
    profile: &str,
) -> Result<Option<&'a AcceptedLabel>, MismatchReason> {
    if !spec.role.accepts(role) {
        return Err(MismatchReason::Role {
            expected: spec.role.to_string(),
            found: role,
        });
    }

    let accepted = if spec.labels.is_empty() {
        None
    } else {
        let set = step.accepted(profile);
        let hit = match_label(set, &token.label).ok_or_else(|| MismatchReason::Label {
            found: token.label.clone(),
            accepted: set.iter().map(|a| a.text.clone()).collect(),
        })?;
        Some(hit)
    };

    if !spec.qualities.is_empty() {
        let mut found: Vec<String> = labels::quality_tags(&token.label)
            .into_iter()
            .map(str::to_string)
            .collect();
        found.extend(token.quality.clone());
        if !spec.qualities.iter().any(|q| found.contains(q)) {
            return Err(MismatchReason::Quality {
                found,
                accepted: spec.qualities.clone(),
            });
        }
    }

    if let Some(flag) = spec.flags.iter().find(|f| !token.has_flag(f)) {
        return Err(MismatchReason::MissingFlag { flag: flag.clone() });
    }

    if let Some(expected) = &spec.secondary_target {
        let found = token
            .secondary_target
            .clone()
            .or_else(|| labels::parse_label(&token.label).target);
        let same = found
            .as_deref()
            .is_some_and(|f| labels::normalize(f, false) == labels::normalize(expected, false));
        if !same {
            return Err(MismatchReason::SecondaryTarget {
                expected: expected.clone(),
                found,
            });
        }
    }

    Ok(accepted)
}

/// Find the accepted label that admits `label`, trying exact canonical
/// spelling, then wildcards, then the token with its secondary target
/// stripped.
pub fn match_label<'a>(accepted: &'a [AcceptedLabel], label: &str) -> Option<&'a AcceptedLabel> {
    let sensitive = labels::normalize(label, true);
    let insensitive = labels::normalize(label, false);
    let token_form = |a: &AcceptedLabel| if a.inversion_sensitive { &sensitive } else { &insensitive };

    if let Some(hit) = accepted
        .iter()
        .find(|a| a.regex.is_none() && &a.canonical == token_form(*a))
    {
        return Some(hit);
    }
    if let Some(hit) = accepted.iter().find(|a| {
        a.regex
            .as_ref()
            .is_some_and(|re| re.is_match(&sensitive) || re.is_match(label))
    }) {
        return Some(hit);
    }

    let stripped_sensitive = labels::strip_secondary(label, true);
    let stripped_insensitive = labels::strip_secondary(label, false);
    accepted.iter().find(|a| {
        let token_stripped = if a.inversion_sensitive {
            &stripped_sensitive
        } else {
            &stripped_insensitive
        };
        // Only target-free accepted labels may match a stripped token.
        a.regex.is_none() && a.canonical == a.stripped && &a.stripped == token_stripped
    })
}
