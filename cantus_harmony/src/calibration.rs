// Confidence calibration: map raw aggregate confidence to empirical
// reliability, but only when the data justify it.
//
// `fit` runs the quality gates in two phases. Pre-fit gates look at the
// samples alone (count, target variance, |pearson(raw, target)|); if any
// fails, nothing is fitted. Post-fit gates look at the candidate mapping's
// outputs (ECE must not rise by more than `max_ece_increase`, and outputs
// taken in raw-score order must be non-decreasing for at least
// `min_monotonic_fraction` of adjacent pairs). A mapping that fails anything
// is stored as identity with `passed_gates = false`, so applying it is
// indistinguishable from applying no calibration at all.
//
// The per-method helpers (`fit_logistic`, `fit_isotonic`) return
// `Result<Mapping, FitError>`: a fit that could not be computed is an error,
// a fit that was computed but is not trusted is a gate failure. `auto` tries
// logistic then isotonic and keeps the first that passes every gate.
//
// Mappings serialise to JSON so fitting (offline, `cantus fit`) and
// application (`Engine::analyze`) are decoupled.

use crate::evidence::clamp_unit;
use crate::metrics::{self, CalibrationMetrics, ReliabilityBin};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

const LOGISTIC_MAX_ITERATIONS: usize = 100;
const LOGISTIC_RIDGE: f64 = 1e-3;
const LOGISTIC_MAX_STEP: f64 = 5.0;
const LOGISTIC_TOLERANCE: f64 = 1e-8;
/// A passing gate closer than this share of its threshold is reported.
const MARGINAL_BAND: f64 = 0.1;

#[derive(Clone, Debug, PartialEq, Error)]
pub enum FitError {
    #[error("degenerate input: {0}")]
    Degenerate(String),
    #[error("no convergence after {iterations} iterations")]
    NonConvergent { iterations: usize },
}

#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("unknown calibration method `{0}` (expected identity, logistic, isotonic or auto)")]
pub struct UnknownMethod(pub String);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMethod {
    Identity,
    Logistic,
    Isotonic,
    #[default]
    Auto,
}

impl CalibrationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationMethod::Identity => "identity",
            CalibrationMethod::Logistic => "logistic",
            CalibrationMethod::Isotonic => "isotonic",
            CalibrationMethod::Auto => "auto",
        }
    }

    /// Methods actually fitted, in increasing complexity.
    fn candidates(self) -> &'static [CalibrationMethod] {
        match self {
            CalibrationMethod::Identity => &[],
            CalibrationMethod::Logistic => &[CalibrationMethod::Logistic],
            CalibrationMethod::Isotonic => &[CalibrationMethod::Isotonic],
            CalibrationMethod::Auto => &[CalibrationMethod::Logistic, CalibrationMethod::Isotonic],
        }
    }
}

impl fmt::Display for CalibrationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CalibrationMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" => Ok(CalibrationMethod::Identity),
            "logistic" => Ok(CalibrationMethod::Logistic),
            "isotonic" => Ok(CalibrationMethod::Isotonic),
            "auto" => Ok(CalibrationMethod::Auto),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Mapping {
    Identity,
    Logistic { a: f64, b: f64 },
    /// Piecewise-linear through `(breakpoints[i], values[i])`, flat outside.
    Isotonic { breakpoints: Vec<f64>, values: Vec<f64> },
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

impl Mapping {
    /// Evaluate the mapping without gate handling or clamping.
    pub fn eval(&self, x: f64) -> f64 {
        match self {
            Mapping::Identity => x,
            Mapping::Logistic { a, b } => sigmoid(a * x + b),
            Mapping::Isotonic { breakpoints, values } => interpolate(breakpoints, values, x),
        }
    }

    pub fn is_identity(&self) -> bool {
        matches!(self, Mapping::Identity)
    }
}

fn interpolate(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return x;
    }
    if x <= xs[0] {
        return ys[0];
    }
    if x >= xs[n - 1] {
        return ys[n - 1];
    }
    let hi = xs[..n].partition_point(|&b| b <= x);
    let lo = hi - 1;
    let span = xs[hi] - xs[lo];
    if span <= 0.0 {
        return ys[lo];
    }
    ys[lo] + (ys[hi] - ys[lo]) * (x - xs[lo]) / span
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityGates {
    pub min_samples: usize,
    pub min_target_variance: f64,
    pub min_abs_correlation: f64,
    pub max_ece_increase: f64,
    pub min_monotonic_fraction: f64,
    pub ece_bins: usize,
}

impl Default for QualityGates {
    fn default() -> Self {
        QualityGates {
            min_samples: 50,
            min_target_variance: 0.01,
            min_abs_correlation: 0.1,
            max_ece_increase: 0.02,
            min_monotonic_fraction: 0.9,
            ece_bins: metrics::DEFAULT_BINS,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGate {
    SampleCount,
    TargetVariance,
    Correlation,
    EceIncrease,
    Monotonicity,
}

impl QualityGate {
    pub fn as_str(self) -> &'static str {
        match self {
            QualityGate::SampleCount => "sample_count",
            QualityGate::TargetVariance => "target_variance",
            QualityGate::Correlation => "correlation",
            QualityGate::EceIncrease => "ece_increase",
            QualityGate::Monotonicity => "monotonicity",
        }
    }

    /// Gates whose observed value must stay at or below the threshold.
    fn is_upper_bound(self) -> bool {
        matches!(self, QualityGate::EceIncrease)
    }

    fn passes(self, observed: f64, threshold: f64) -> bool {
        if self.is_upper_bound() {
            observed <= threshold
        } else {
            observed >= threshold
        }
    }

    fn is_marginal(self, observed: f64, threshold: f64) -> bool {
        let band = threshold.abs() * MARGINAL_BAND;
        if self.is_upper_bound() {
            observed > threshold - band
        } else {
            observed < threshold + band
        }
    }
}

impl fmt::Display for QualityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateFailure {
    pub gate: QualityGate,
    pub observed: f64,
    pub threshold: f64,
    #[serde(default)]
    pub detail: String,
}

impl GateFailure {
    fn new(gate: QualityGate, observed: f64, threshold: f64) -> Self {
        GateFailure {
            gate,
            observed,
            threshold,
            detail: String::new(),
        }
    }
}

impl fmt::Display for GateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cmp = if self.gate.is_upper_bound() { ">" } else { "<" };
        write!(f, "{}: {:.4} {cmp} {:.4}", self.gate, self.observed, self.threshold)?;
        if !self.detail.is_empty() {
            write!(f, " ({})", self.detail)?;
        }
        Ok(())
    }
}

/// One labelled calibration example, as stored in samples files.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub raw: f64,
    pub target: f64,
}

impl CalibrationSample {
    pub fn split(samples: &[CalibrationSample]) -> (Vec<f64>, Vec<f64>) {
        samples.iter().map(|s| (s.raw, s.target)).unzip()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMapping {
    pub mapping: Mapping,
    /// What the caller asked for; `mapping` says what was kept.
    pub method: CalibrationMethod,
    pub passed_gates: bool,
    #[serde(default)]
    pub failed_gates: Vec<GateFailure>,
    #[serde(default)]
    pub fit_errors: Vec<String>,
    /// Raw scores against targets, at fit time.
    #[serde(default)]
    pub baseline: CalibrationMetrics,
    /// Mapped scores against targets, at fit time.
    #[serde(default)]
    pub calibrated: CalibrationMetrics,
}

impl CalibrationMapping {
    /// A mapping that leaves scores untouched apart from clamping.
    pub fn identity() -> Self {
        CalibrationMapping {
            mapping: Mapping::Identity,
            method: CalibrationMethod::Identity,
            passed_gates: true,
            failed_gates: Vec::new(),
            fit_errors: Vec::new(),
            baseline: CalibrationMetrics::default(),
            calibrated: CalibrationMetrics::default(),
        }
    }

    /// Calibrated confidence in [0, 1]. NaN maps to 0.
    pub fn apply(&self, x: f64) -> f64 {
        let x = clamp_unit(x);
        if !self.passed_gates {
            return x;
        }
        clamp_unit(self.mapping.eval(x))
    }

    pub fn failed(&self, gate: QualityGate) -> bool {
        self.failed_gates.iter().any(|f| f.gate == gate)
    }
}

impl Default for CalibrationMapping {
    fn default() -> Self {
        CalibrationMapping::identity()
    }
}

/// Drop pairs with a non-finite side and clamp both sides to [0, 1].
fn clean_pairs(raw: &[f64], targets: &[f64]) -> (Vec<f64>, Vec<f64>) {
    raw.iter()
        .zip(targets)
        .filter(|(x, t)| x.is_finite() && t.is_finite())
        .map(|(&x, &t)| (x.clamp(0.0, 1.0), t.clamp(0.0, 1.0)))
        .unzip()
}

/// Maximum-likelihood fit of `sigmoid(a·x + b)` by Newton-Raphson, with a
/// small ridge on `a` so separable data still has a finite optimum.
pub fn fit_logistic(raw: &[f64], targets: &[f64]) -> Result<Mapping, FitError> {
    let n = raw.len().min(targets.len());
    if n < 2 {
        return Err(FitError::Degenerate(format!("need at least two samples, got {n}")));
    }
    let (xs, ts) = (&raw[..n], &targets[..n]);
    if metrics::variance(xs) <= f64::EPSILON {
        return Err(FitError::Degenerate("raw scores are constant".to_string()));
    }

    let mean_t = (ts.iter().sum::<f64>() / n as f64).clamp(1e-6, 1.0 - 1e-6);
    let mut a = 0.0;
    let mut b = (mean_t / (1.0 - mean_t)).ln();
    let mut converged = false;

    for _ in 0..LOGISTIC_MAX_ITERATIONS {
        let (mut ga, mut gb) = (LOGISTIC_RIDGE * a, 0.0);
        let (mut haa, mut hab, mut hbb) = (LOGISTIC_RIDGE, 0.0, 1e-9);
        for (&x, &t) in xs.iter().zip(ts) {
            let p = sigmoid(a * x + b);
            let w = p * (1.0 - p);
            ga += (p - t) * x;
            gb += p - t;
            haa += w * x * x;
            hab += w * x;
            hbb += w;
        }
        let det = haa * hbb - hab * hab;
        if det.is_nan() || det <= 1e-12 {
            return Err(FitError::Degenerate("singular Hessian".to_string()));
        }
        let mut step_a = (hbb * ga - hab * gb) / det;
        let mut step_b = (haa * gb - hab * ga) / det;
        let largest = step_a.abs().max(step_b.abs());
        if largest > LOGISTIC_MAX_STEP {
            step_a *= LOGISTIC_MAX_STEP / largest;
            step_b *= LOGISTIC_MAX_STEP / largest;
        }
        a -= step_a;
        b -= step_b;
        if !a.is_finite() || !b.is_finite() {
            return Err(FitError::Degenerate("parameters diverged".to_string()));
        }
        if largest < LOGISTIC_TOLERANCE {
            converged = true;
            break;
        }
    }

    if !converged {
        return Err(FitError::NonConvergent {
            iterations: LOGISTIC_MAX_ITERATIONS,
        });
    }
    if a <= 0.0 {
        return Err(FitError::Degenerate(format!("non-increasing fit (a = {a:.4})")));
    }
    Ok(Mapping::Logistic { a, b })
}

/// Pool-adjacent-violators over the distinct raw values.
pub fn fit_isotonic(raw: &[f64], targets: &[f64]) -> Result<Mapping, FitError> {
    let n = raw.len().min(targets.len());
    let mut pairs: Vec<(f64, f64)> = raw[..n].iter().copied().zip(targets[..n].iter().copied()).collect();
    pairs.sort_by(|l, r| l.0.total_cmp(&r.0));

    // (x, target sum, weight) per distinct x.
    let mut groups: Vec<(f64, f64, f64)> = Vec::new();
    for (x, t) in pairs {
        match groups.last_mut() {
            Some(last) if last.0 == x => {
                last.1 += t;
                last.2 += 1.0;
            }
            _ => groups.push((x, t, 1.0)),
        }
    }
    if groups.len() < 2 {
        return Err(FitError::Degenerate(format!(
            "need at least two distinct raw scores, got {}",
            groups.len()
        )));
    }

    // Blocks of pooled groups: (target sum, weight, number of groups).
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(groups.len());
    for &(_, sum, weight) in &groups {
        blocks.push((sum, weight, 1));
        while blocks.len() >= 2 {
            let last = blocks[blocks.len() - 1];
            let prev = blocks[blocks.len() - 2];
            if prev.0 / prev.1 <= last.0 / last.1 {
                break;
            }
            blocks.pop();
            if let Some(merged) = blocks.last_mut() {
                merged.0 += last.0;
                merged.1 += last.1;
                merged.2 += last.2;
            }
        }
    }

    let breakpoints: Vec<f64> = groups.iter().map(|g| g.0).collect();
    let values: Vec<f64> = blocks
        .iter()
        .flat_map(|&(sum, weight, count)| std::iter::repeat_n(sum / weight, count))
        .collect();
    Ok(Mapping::Isotonic { breakpoints, values })
}

fn fit_method(method: CalibrationMethod, raw: &[f64], targets: &[f64]) -> Result<Mapping, FitError> {
    match method {
        CalibrationMethod::Logistic => fit_logistic(raw, targets),
        CalibrationMethod::Isotonic => fit_isotonic(raw, targets),
        CalibrationMethod::Identity | CalibrationMethod::Auto => Ok(Mapping::Identity),
    }
}

fn check(gate: QualityGate, observed: f64, threshold: f64, out: &mut Vec<GateFailure>) {
    if !gate.passes(observed, threshold) {
        out.push(GateFailure::new(gate, observed, threshold));
    }
}

fn prefit_failures(xs: &[f64], ts: &[f64], gates: &QualityGates) -> Vec<GateFailure> {
    let mut out = Vec::new();
    check(
        QualityGate::SampleCount,
        xs.len() as f64,
        gates.min_samples as f64,
        &mut out,
    );
    check(
        QualityGate::TargetVariance,
        metrics::variance(ts),
        gates.min_target_variance,
        &mut out,
    );
    check(
        QualityGate::Correlation,
        metrics::pearson(xs, ts).abs(),
        gates.min_abs_correlation,
        &mut out,
    );
    out
}

fn postfit_failures(
    xs: &[f64],
    outputs: &[f64],
    baseline: &CalibrationMetrics,
    calibrated: &CalibrationMetrics,
    gates: &QualityGates,
) -> Vec<GateFailure> {
    let mut out = Vec::new();
    check(
        QualityGate::EceIncrease,
        calibrated.ece - baseline.ece,
        gates.max_ece_increase,
        &mut out,
    );
    check(
        QualityGate::Monotonicity,
        metrics::monotonic_fraction(xs, outputs),
        gates.min_monotonic_fraction,
        &mut out,
    );
    out
}

pub fn fit(
    raw: &[f64],
    targets: &[f64],
    method: CalibrationMethod,
    gates: &QualityGates,
) -> CalibrationMapping {
    let (xs, ts) = clean_pairs(raw, targets);
    let baseline = CalibrationMetrics::compute(&xs, &ts, gates.ece_bins);
    let mut result = CalibrationMapping {
        method,
        passed_gates: false,
        baseline: baseline.clone(),
        calibrated: baseline.clone(),
        ..CalibrationMapping::identity()
    };

    if raw.len() != targets.len() {
        let mut failure = GateFailure::new(
            QualityGate::SampleCount,
            raw.len().min(targets.len()) as f64,
            gates.min_samples as f64,
        );
        failure.detail = format!("{} raw scores but {} targets", raw.len(), targets.len());
        result.failed_gates.push(failure);
        tracing::warn!(method = %method, "calibration inputs differ in length; keeping identity");
        return result;
    }

    let pre = prefit_failures(&xs, &ts, gates);
    if method == CalibrationMethod::Identity {
        result.passed_gates = pre.is_empty();
        result.failed_gates = pre;
        return result;
    }
    if !pre.is_empty() {
        tracing::warn!(
            method = %method,
            failed = pre.len(),
            samples = xs.len(),
            "calibration pre-fit gates failed; keeping identity"
        );
        result.failed_gates = pre;
        return result;
    }

    for &candidate in method.candidates() {
        let mapping = match fit_method(candidate, &xs, &ts) {
            Ok(mapping) => mapping,
            Err(err) => {
                tracing::debug!(method = %candidate, %err, "calibration fit errored");
                result.fit_errors.push(format!("{candidate}: {err}"));
                continue;
            }
        };
        let outputs: Vec<f64> = xs.iter().map(|&x| clamp_unit(mapping.eval(x))).collect();
        let calibrated = CalibrationMetrics::compute(&outputs, &ts, gates.ece_bins);
        let post = postfit_failures(&xs, &outputs, &baseline, &calibrated, gates);
        if post.is_empty() {
            tracing::info!(
                method = %candidate,
                samples = xs.len(),
                ece_before = baseline.ece,
                ece_after = calibrated.ece,
                "calibration mapping accepted"
            );
            result.mapping = mapping;
            result.passed_gates = true;
            result.calibrated = calibrated;
            result.failed_gates.clear();
            return result;
        }
        for failure in post {
            if !result.failed(failure.gate) {
                result.failed_gates.push(failure);
            }
        }
    }

    tracing::warn!(
        method = %method,
        failed = result.failed_gates.len(),
        errors = result.fit_errors.len(),
        "no calibration candidate passed; keeping identity"
    );
    result
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricDeltas {
    pub ece: f64,
    pub brier: f64,
    pub pearson: f64,
}

/// Baseline-vs-calibrated comparison of a mapping on a sample set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub bins: usize,
    pub baseline: CalibrationMetrics,
    pub calibrated: CalibrationMetrics,
    /// `calibrated − baseline`; negative ECE and Brier deltas are improvements.
    pub delta: MetricDeltas,
    pub reliability: Vec<ReliabilityBin>,
    pub warnings: Vec<String>,
}

fn gate_warning(gate: QualityGate, observed: f64, threshold: f64, warnings: &mut Vec<String>) {
    if !gate.passes(observed, threshold) {
        warnings.push(format!("{gate} failed: {observed:.4} against threshold {threshold:.4}"));
    } else if gate.is_marginal(observed, threshold) {
        warnings.push(format!("{gate} marginal: {observed:.4} against threshold {threshold:.4}"));
    }
}

pub fn evaluate(
    mapping: &CalibrationMapping,
    raw: &[f64],
    targets: &[f64],
    bins: usize,
    gates: &QualityGates,
) -> EvaluationReport {
    let bins = bins.max(1);
    let mut warnings = Vec::new();
    if raw.len() != targets.len() {
        warnings.push(format!(
            "{} raw scores but {} targets; evaluating the common prefix",
            raw.len(),
            targets.len()
        ));
    }
    let (xs, ts) = clean_pairs(raw, targets);
    let outputs: Vec<f64> = xs.iter().map(|&x| mapping.apply(x)).collect();
    let baseline = CalibrationMetrics::compute(&xs, &ts, bins);
    let calibrated = CalibrationMetrics::compute(&outputs, &ts, bins);

    if !mapping.passed_gates {
        warnings.push("mapping did not pass its quality gates; identity is applied".to_string());
    }
    gate_warning(
        QualityGate::SampleCount,
        xs.len() as f64,
        gates.min_samples as f64,
        &mut warnings,
    );
    gate_warning(
        QualityGate::TargetVariance,
        baseline.target_variance,
        gates.min_target_variance,
        &mut warnings,
    );
    gate_warning(
        QualityGate::Correlation,
        baseline.pearson.abs(),
        gates.min_abs_correlation,
        &mut warnings,
    );
    gate_warning(
        QualityGate::EceIncrease,
        calibrated.ece - baseline.ece,
        gates.max_ece_increase,
        &mut warnings,
    );
    gate_warning(
        QualityGate::Monotonicity,
        metrics::monotonic_fraction(&xs, &outputs),
        gates.min_monotonic_fraction,
        &mut warnings,
    );

    EvaluationReport {
        bins,
        delta: MetricDeltas {
            ece: calibrated.ece - baseline.ece,
            brier: calibrated.brier - baseline.brier,
            pearson: calibrated.pearson - baseline.pearson,
        },
        reliability: metrics::reliability_curve(&outputs, &ts, bins),
        baseline,
        calibrated,
        warnings,
    }
}
