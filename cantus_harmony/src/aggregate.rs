// Evidence aggregation: conflict resolution, track fusion, combined score.
//
// Input evidence is first put in a fixed order: raw score descending, then
// span start, span end, pattern id. Every later step walks that order, so the
// result never depends on how the caller happened to order its evidence.
//
// Conflict resolution (one of):
//
//   max-pool   keep an item only if its span overlaps no item already kept.
//
//   soft-NMS   each item accumulates a decay factor from every earlier
//              (higher-or-equal scored) item that overlaps it, whether or not
//              that item was itself kept:
//
//                decay *= 1 − overlap_decay · exp(−(higher − this))
//
//              Scores in the exponent are the undecayed raw scores. The product
//              runs over all such items. A decayed item is dropped when
//              `decay < min_decay`; otherwise its raw score and track weights
//              are scaled by `decay`.
//
//              Two refinements are off by default. `coverage_weighted`
//              multiplies each term by the share of this item's span the other
//              one covers; a positive `keep_threshold` also drops items whose
//              decayed score `raw · decay` falls below it.
//
// Track fusion is a soft OR: `total ← total + w · (1 − total)`. Totals only
// grow with more positive evidence and can never pass 1.
//
// A diversity bonus of `per_family` for each distinct pattern family among the
// kept evidence (capped at `max_families`) is added to every track, then all
// tracks are clamped to [0, 1]. The combined confidence is
// `max_weight · max(track) + mean_weight · mean(non-zero tracks)`.

use crate::evidence::{Evidence, clamp_unit};
use crate::token::Span;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoftNmsParams {
    pub overlap_decay: f64,
    pub min_decay: f64,
    /// Scale each decay term by the covered share of the lower item's span.
    pub coverage_weighted: bool,
    /// Minimum decayed score; 0 disables the check.
    pub keep_threshold: f64,
}

impl Default for SoftNmsParams {
    fn default() -> Self {
        SoftNmsParams {
            overlap_decay: 0.5,
            min_decay: 0.1,
            coverage_weighted: false,
            keep_threshold: 0.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ConflictStrategy {
    MaxPool,
    SoftNms(SoftNmsParams),
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::SoftNms(SoftNmsParams::default())
    }
}

impl ConflictStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::MaxPool => "max_pool",
            ConflictStrategy::SoftNms(_) => "soft_nms",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorConfig {
    pub strategy: ConflictStrategy,
    pub diversity_per_family: f64,
    pub diversity_max_families: usize,
    pub max_weight: f64,
    pub mean_weight: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        AggregatorConfig {
            strategy: ConflictStrategy::default(),
            diversity_per_family: 0.025,
            diversity_max_families: 4,
            max_weight: 0.7,
            mean_weight: 0.3,
        }
    }
}

/// What happened to one item during soft-NMS.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DecayRecord {
    pub pattern_id: String,
    pub span: Span,
    pub decay: f64,
    pub kept: bool,
}

/// Enough detail to explain a score without re-running the pipeline.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregateDebug {
    pub strategy: String,
    pub count_before: usize,
    pub count_after: usize,
    /// Plain sums of kept track weights, before fusion.
    pub raw_sums: BTreeMap<String, f64>,
    pub diversity_bonus: f64,
    pub pattern_ids: Vec<String>,
    pub families: Vec<String>,
    /// Soft-NMS only: every item that was decayed.
    pub decays: Vec<DecayRecord>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AggregateResult {
    pub tracks: BTreeMap<String, f64>,
    pub combined: f64,
    /// Evidence surviving conflict resolution, as scaled.
    pub kept: Vec<Evidence>,
    pub debug: AggregateDebug,
}

fn evidence_order(a: &Evidence, b: &Evidence) -> Ordering {
    b.raw_score
        .total_cmp(&a.raw_score)
        .then(a.span.start.cmp(&b.span.start))
        .then(a.span.end.cmp(&b.span.end))
        .then_with(|| a.pattern_id.cmp(&b.pattern_id))
}

pub fn aggregate(evidence: &[Evidence], config: &AggregatorConfig) -> AggregateResult {
    let mut sorted: Vec<Evidence> = evidence.to_vec();
    sorted.sort_by(evidence_order);

    let mut debug = AggregateDebug {
        strategy: config.strategy.name().to_string(),
        count_before: sorted.len(),
        pattern_ids: sorted
            .iter()
            .map(|e| e.pattern_id.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect(),
        ..AggregateDebug::default()
    };

    let kept = match &config.strategy {
        ConflictStrategy::MaxPool => max_pool(sorted),
        ConflictStrategy::SoftNms(params) => soft_nms(sorted, params, &mut debug.decays),
    };
    debug.count_after = kept.len();

    let mut tracks: BTreeMap<String, f64> = BTreeMap::new();
    for item in &kept {
        for (track, &weight) in &item.tracks {
            let w = clamp_unit(weight);
            *debug.raw_sums.entry(track.clone()).or_default() += w;
            let total = tracks.entry(track.clone()).or_default();
            *total += w * (1.0 - *total);
        }
    }

    let families: BTreeSet<String> = kept.iter().map(|e| e.family().to_string()).collect();
    let counted = families.len().min(config.diversity_max_families);
    debug.diversity_bonus = config.diversity_per_family * counted as f64;
    debug.families = families.into_iter().collect();
    for total in tracks.values_mut() {
        *total = clamp_unit(*total + debug.diversity_bonus);
    }

    let combined = combine(&tracks, config);
    let (count_before, count_after) = (debug.count_before, debug.count_after);
    tracing::debug!(
        before = count_before,
        after = count_after,
        combined,
        "aggregated evidence"
    );
    AggregateResult {
        tracks,
        combined,
        kept,
        debug,
    }
}

fn combine(tracks: &BTreeMap<String, f64>, config: &AggregatorConfig) -> f64 {
    let active: Vec<f64> = tracks.values().copied().filter(|&v| v > 0.0).collect();
    if active.is_empty() {
        return 0.0;
    }
    let max = active.iter().copied().fold(0.0, f64::max);
    let mean = active.iter().sum::<f64>() / active.len() as f64;
    clamp_unit(config.max_weight * max + config.mean_weight * mean)
}

fn max_pool(sorted: Vec<Evidence>) -> Vec<Evidence> {
    let mut kept: Vec<Evidence> = Vec::new();
    for item in sorted {
        if kept.iter().all(|k| !k.span.overlaps(item.span)) {
            kept.push(item);
        }
    }
    kept
}

fn soft_nms(sorted: Vec<Evidence>, params: &SoftNmsParams, records: &mut Vec<DecayRecord>) -> Vec<Evidence> {
    // (span, undecayed score) of every item already walked, dropped or not.
    let mut processed: Vec<(Span, f64)> = Vec::with_capacity(sorted.len());
    let mut kept: Vec<Evidence> = Vec::new();
    for mut item in sorted {
        let raw = item.raw_score;
        let span_len = item.span.len().max(1) as f64;
        let mut decay = 1.0;
        let mut decayed = false;
        for &(span, higher) in &processed {
            let overlap = span.overlap_len(item.span);
            if overlap == 0 {
                continue;
            }
            decayed = true;
            let coverage = if params.coverage_weighted {
                overlap as f64 / span_len
            } else {
                1.0
            };
            let gap = (higher - raw).max(0.0);
            decay *= 1.0 - params.overlap_decay * coverage * (-gap).exp();
        }
        processed.push((item.span, raw));

        if !decayed {
            kept.push(item);
            continue;
        }

        let keep = decay >= params.min_decay && raw * decay >= params.keep_threshold;
        records.push(DecayRecord {
            pattern_id: item.pattern_id.clone(),
            span: item.span,
            decay,
            kept: keep,
        });
        if keep {
            item.raw_score *= decay;
            for weight in item.tracks.values_mut() {
                *weight *= decay;
            }
            kept.push(item);
        }
    }
    kept
}
