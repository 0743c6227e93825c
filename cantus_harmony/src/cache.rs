// Caller-owned memoisation of per-pattern match results.
//
// Matching one pattern against one token sequence is a pure function of
// (pattern, profile, sequence), so its results can be reused across calls
// that analyse the same sequence again, e.g. re-running with a different
// calibration mapping or aggregation strategy. The cache is an ordinary value
// passed in by `&mut`; there is no shared or global cache. One cache belongs
// to one library and matcher config: keys do not include either.
//
// Keys use an `FxHasher` content hash of the whole token sequence plus its
// length.

use crate::matcher::MatchResult;
use crate::token::Token;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
    pattern_id: String,
    profile: String,
    signature: u64,
    len: usize,
}

impl CacheKey {
    fn new(pattern_id: &str, profile: &str, tokens: &[Token]) -> Self {
        CacheKey {
            pattern_id: pattern_id.to_string(),
            profile: profile.to_string(),
            signature: sequence_signature(tokens),
            len: tokens.len(),
        }
    }
}

/// Content hash of a token sequence.
pub fn sequence_signature(tokens: &[Token]) -> u64 {
    let mut hasher = FxHasher::default();
    tokens.hash(&mut hasher);
    hasher.finish()
}

#[derive(Debug, Default)]
pub struct MatchCache {
    entries: FxHashMap<CacheKey, Vec<MatchResult>>,
    hits: u64,
    misses: u64,
}

impl MatchCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached results for one pattern, counting the lookup as a hit or miss.
    pub fn get(&mut self, pattern_id: &str, profile: &str, tokens: &[Token]) -> Option<Vec<MatchResult>> {
        let found = self
            .entries
            .get(&CacheKey::new(pattern_id, profile, tokens))
            .cloned();
        if found.is_some() {
            self.hits += 1;
        } else {
            self.misses += 1;
        }
        found
    }

    pub fn insert(&mut self, pattern_id: &str, profile: &str, tokens: &[Token], results: Vec<MatchResult>) {
        self.entries
            .insert(CacheKey::new(pattern_id, profile, tokens), results);
    }

    pub fn hits(&self) -> u64 {
        self.hits
    }

    pub fn misses(&self) -> u64 {
        self.misses
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.hits = 0;
        self.misses = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Role, Span};

    #[test]
    fn signature_depends_on_content() {
        let a = vec![Token::new("V", Role::Dominant), Token::new("I", Role::Tonic)];
        let mut b = a.clone();
        assert_eq!(sequence_signature(&a), sequence_signature(&b));
        b[1] = Token::new("I", Role::Tonic).with_soprano(1);
        assert_ne!(sequence_signature(&a), sequence_signature(&b));
    }

    #[test]
    fn lookups_count_hits_and_misses() {
        let tokens = vec![Token::new("V", Role::Dominant)];
        let mut cache = MatchCache::new();
        assert!(cache.get("p", "classical", &tokens).is_none());
        cache.insert("p", "classical", &tokens, vec![MatchResult::matched("p", Span::new(0, 1), 0.5)]);
        assert_eq!(cache.get("p", "classical", &tokens).map(|r| r.len()), Some(1));
        assert!(cache.get("p", "jazz", &tokens).is_none());
        assert_eq!((cache.hits(), cache.misses()), (1, 2));
        cache.clear();
        assert!(cache.is_empty());
    }
}
