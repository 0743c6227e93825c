// Calibration quality metrics.
//
// All functions take predictions and targets as parallel slices and only look
// at the common prefix when lengths differ (the calibrator rejects mismatched
// inputs before it gets here). Empty input yields 0 for every error metric.
//
// ECE uses fixed-width bins over [0, 1]; a prediction of exactly 1.0 lands in
// the last bin.

use serde::{Deserialize, Serialize};

pub const DEFAULT_BINS: usize = 10;

/// Population variance.
pub fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n
}

/// Pearson correlation; 0 when either side is constant.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let (xs, ys) = (&xs[..n], &ys[..n]);
    let mx = xs.iter().sum::<f64>() / n as f64;
    let my = ys.iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut vx = 0.0;
    let mut vy = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        cov += (x - mx) * (y - my);
        vx += (x - mx) * (x - mx);
        vy += (y - my) * (y - my);
    }
    if vx <= f64::EPSILON || vy <= f64::EPSILON {
        return 0.0;
    }
    cov / (vx.sqrt() * vy.sqrt())
}

pub fn brier(predictions: &[f64], targets: &[f64]) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }
    predictions
        .iter()
        .zip(targets)
        .map(|(p, t)| (p - t) * (p - t))
        .sum::<f64>()
        / n as f64
}

fn bin_index(p: f64, bins: usize) -> usize {
    ((p.clamp(0.0, 1.0) * bins as f64) as usize).min(bins - 1)
}

/// One non-empty reliability bin.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReliabilityBin {
    pub center: f64,
    /// Mean target in the bin.
    pub reliability: f64,
    /// Mean prediction in the bin.
    pub confidence: f64,
    pub count: usize,
}

pub fn reliability_curve(predictions: &[f64], targets: &[f64], bins: usize) -> Vec<ReliabilityBin> {
    let bins = bins.max(1);
    let mut sums = vec![(0.0f64, 0.0f64, 0usize); bins];
    for (&p, &t) in predictions.iter().zip(targets) {
        let slot = &mut sums[bin_index(p, bins)];
        slot.0 += p;
        slot.1 += t;
        slot.2 += 1;
    }
    let width = 1.0 / bins as f64;
    sums.into_iter()
        .enumerate()
        .filter(|(_, (_, _, count))| *count > 0)
        .map(|(i, (p_sum, t_sum, count))| ReliabilityBin {
            center: (i as f64 + 0.5) * width,
            reliability: t_sum / count as f64,
            confidence: p_sum / count as f64,
            count,
        })
        .collect()
}

/// Expected calibration error.
pub fn ece(predictions: &[f64], targets: &[f64], bins: usize) -> f64 {
    let n = predictions.len().min(targets.len());
    if n == 0 {
        return 0.0;
    }
    reliability_curve(predictions, targets, bins)
        .iter()
        .map(|b| b.count as f64 / n as f64 * (b.confidence - b.reliability).abs())
        .sum()
}

/// Share of adjacent pairs, taken in raw-score order, whose outputs do not
/// decrease. 1.0 for fewer than two samples.
pub fn monotonic_fraction(raw: &[f64], outputs: &[f64]) -> f64 {
    let n = raw.len().min(outputs.len());
    if n < 2 {
        return 1.0;
    }
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| raw[a].total_cmp(&raw[b]).then(a.cmp(&b)));
    let ordered = order
        .windows(2)
        .filter(|w| outputs[w[1]] >= outputs[w[0]] - 1e-12)
        .count();
    ordered as f64 / (n - 1) as f64
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetrics {
    pub samples: usize,
    pub ece: f64,
    pub brier: f64,
    pub pearson: f64,
    pub target_variance: f64,
}

impl CalibrationMetrics {
    pub fn compute(predictions: &[f64], targets: &[f64], bins: usize) -> Self {
        let n = predictions.len().min(targets.len());
        CalibrationMetrics {
            samples: n,
            ece: ece(predictions, targets, bins),
            brier: brier(predictions, targets),
            pearson: pearson(predictions, targets),
            target_variance: variance(&targets[..n]),
        }
    }
}
