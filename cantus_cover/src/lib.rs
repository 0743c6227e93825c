// Optimal cover: weighted interval scheduling over half-open spans.
//
// Given a set of scored spans `[start, end)`, select the subset of pairwise
// non-overlapping spans with maximum total score. This is the classic
// weighted-interval-scheduling dynamic program:
//
// 1. Sort by end index, then start index. The sort is stable, so intervals
//    with identical `(end, start)` keep their input order.
// 2. For each interval `k` (1-based in sorted order), binary-search the number
//    of earlier intervals whose end is <= this interval's start. Because the
//    sorted ends are non-decreasing, those form a prefix `pred(k)`.
// 3. `best[k] = max(best[k-1], score[k] + best[pred(k)])`, recording whether
//    interval `k` was taken. Inclusion requires a *strict* improvement, so on
//    equal totals the solution built from earlier-ending intervals wins.
// 4. Backtrack from `k = n`, then reverse to restore ascending order.
//
// Overall O(n log n). Intervals with a non-finite or non-positive score, or
// with `end < start`, can never improve the total and are ignored.
//
// This crate knows nothing about tokens, patterns or music. The payload type
// is opaque and is cloned into the output; `cantus_harmony` uses it to carry
// candidate-match indices.
//
// **Determinism.** For identical input (including order) the output is
// identical. Tie-break order: `(end, start, input position)`.

/// A scored half-open span `[start, end)` with an opaque payload.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ScoredInterval<T> {
    pub start: usize,
    pub end: usize,
    pub score: f64,
    pub payload: T,
}

impl<T> ScoredInterval<T> {
    pub fn new(start: usize, end: usize, score: f64, payload: T) -> Self {
        Self {
            start,
            end,
            score,
            payload,
        }
    }

    /// Number of positions covered.
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether two spans share at least one position.
    pub fn overlaps<U>(&self, other: &ScoredInterval<U>) -> bool {
        self.start < other.end && other.start < self.end
    }

    fn is_selectable(&self) -> bool {
        self.end >= self.start && self.score.is_finite() && self.score > 0.0
    }
}

/// Select a maximum-total-score subset of pairwise non-overlapping intervals.
///
/// The input need not be sorted. The result is in ascending `(end, start)`
/// order. Empty input yields an empty result.
pub fn solve<T: Clone>(intervals: &[ScoredInterval<T>]) -> Vec<ScoredInterval<T>> {
    solve_indices(intervals)
        .into_iter()
        .map(|i| intervals[i].clone())
        .collect()
}

/// Like [`solve`], but returns positions into `intervals` instead of clones.
pub fn solve_indices<T>(intervals: &[ScoredInterval<T>]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..intervals.len())
        .filter(|&i| intervals[i].is_selectable())
        .collect();
    order.sort_by_key(|&i| (intervals[i].end, intervals[i].start));

    let n = order.len();
    if n == 0 {
        return Vec::new();
    }

    let ends: Vec<usize> = order.iter().map(|&i| intervals[i].end).collect();
    let mut best = vec![0.0f64; n + 1];
    let mut taken = vec![false; n + 1];
    let mut pred = vec![0usize; n + 1];

    for k in 1..=n {
        let interval = &intervals[order[k - 1]];
        let p = ends[..k - 1].partition_point(|&end| end <= interval.start);
        pred[k] = p;

        let with = interval.score + best[p];
        if with > best[k - 1] {
            best[k] = with;
            taken[k] = true;
        } else {
            best[k] = best[k - 1];
        }
    }

    let mut selected = Vec::new();
    let mut k = n;
    while k > 0 {
        if taken[k] {
            selected.push(order[k - 1]);
            k = pred[k];
        } else {
            k -= 1;
        }
    }
    selected.reverse();
    selected
}

/// Sum of scores of a set of intervals.
pub fn total_score<T>(intervals: &[ScoredInterval<T>]) -> f64 {
    intervals.iter().map(|iv| iv.score).sum()
}
