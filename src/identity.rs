use std::collections::HashMap;

use sha2::{Digest, Sha256};
use strsim::normalized_levenshtein;
use tracing::{debug, info};

use crate::error::SchemaError;
use crate::table::{Cell, Table};

pub const DEFAULT_MATCH_THRESHOLD: f64 = 70.0;

/// Similarity of two names on a 0..=100 scale.
///
/// Case and surrounding whitespace are ignored, and token order is tolerated
/// ("Silva Bernardo" vs "Bernardo Silva") by also comparing sorted tokens.
pub fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 100.0;
    }
    let la = a.trim().to_lowercase();
    let lb = b.trim().to_lowercase();
    if la.is_empty() || lb.is_empty() {
        return 0.0;
    }
    let direct = normalized_levenshtein(&la, &lb);
    let sorted = normalized_levenshtein(&sorted_tokens(&la), &sorted_tokens(&lb));
    (direct.max(sorted) * 100.0).clamp(0.0, 100.0)
}

fn sorted_tokens(s: &str) -> String {
    let mut tokens: Vec<&str> = s.split_whitespace().collect();
    tokens.sort_unstable();
    tokens.join(" ")
}

/// Best choice scoring strictly above `threshold`; the earliest choice wins ties.
pub fn best_match<'a>(name: &str, choices: &'a [String], threshold: f64) -> Option<(&'a str, f64)> {
    let mut best: Option<(&'a str, f64)> = None;
    for choice in choices {
        let score = similarity(name, choice);
        if best.is_none_or(|(_, s)| score > s) {
            best = Some((choice.as_str(), score));
            if score >= 100.0 {
                break;
            }
        }
    }
    best.filter(|(_, score)| *score > threshold)
}

/// Identity of one reference value list, so cached matches are never reused
/// against a different reference snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SnapshotId(String);

impl SnapshotId {
    pub fn of(values: &[String]) -> Self {
        let mut hasher = Sha256::new();
        for v in values {
            hasher.update(v.as_bytes());
            hasher.update([0u8]);
        }
        let digest = hasher.finalize();
        SnapshotId(digest.iter().map(|b| format!("{b:02x}")).collect())
    }
}

#[derive(Debug, Default)]
pub struct MatchCache {
    entries: HashMap<(String, SnapshotId), Option<(String, f64)>>,
    hits: usize,
    misses: usize,
}

impl MatchCache {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    pub distinct: usize,
    pub matched: usize,
    pub unmatched: Vec<String>,
}

impl ResolveReport {
    pub fn match_rate(&self) -> f64 {
        if self.distinct == 0 {
            0.0
        } else {
            self.matched as f64 / self.distinct as f64
        }
    }
}

/// Maps names from one source onto the canonical names of a reference table.
/// One resolver lives for one pipeline run; its memo table is dropped with it.
#[derive(Debug)]
pub struct IdentityResolver {
    threshold: f64,
    cache: MatchCache,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self::new(DEFAULT_MATCH_THRESHOLD)
    }
}

impl IdentityResolver {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            cache: MatchCache::default(),
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn cache(&self) -> &MatchCache {
        &self.cache
    }

    pub fn lookup(&mut self, value: &str, choices: &[String], snapshot: &SnapshotId) -> Option<(String, f64)> {
        let key = (value.to_string(), snapshot.clone());
        if let Some(hit) = self.cache.entries.get(&key) {
            self.cache.hits += 1;
            return hit.clone();
        }
        self.cache.misses += 1;
        let found = best_match(value, choices, self.threshold).map(|(c, s)| (c.to_string(), s));
        self.cache.entries.insert(key, found.clone());
        found
    }

    /// Canonicalizes `initial[match_column]` against `reference[match_column]`
    /// and pulls `target_column` from the first reference row of each match.
    ///
    /// The match column is rewritten in place (canonical name, or null when no
    /// reference scores above the threshold), so further targets can be chained
    /// against the same canonicalization. An empty reference is a degraded join:
    /// every target becomes null.
    pub fn resolve(
        &mut self,
        initial: &mut Table,
        reference: &Table,
        match_column: &str,
        target_column: &str,
    ) -> Result<ResolveReport, SchemaError> {
        let match_idx = initial.require_column(match_column)?;

        let (choices, lookup) = if reference.is_empty() {
            (Vec::new(), HashMap::new())
        } else {
            let ref_match = reference.require_column(match_column)?;
            let ref_target = reference.require_column(target_column)?;
            let mut lookup: HashMap<String, Cell> = HashMap::new();
            let mut choices = Vec::new();
            for row in reference.rows() {
                if row[ref_match].is_null() {
                    continue;
                }
                let key = row[ref_match].key_repr();
                if !lookup.contains_key(&key) {
                    lookup.insert(key.clone(), row[ref_target].clone());
                    choices.push(key);
                }
            }
            (choices, lookup)
        };
        let snapshot = SnapshotId::of(&choices);

        let mut report = ResolveReport::default();
        let mut resolved: HashMap<String, Option<String>> = HashMap::new();
        for value in initial.distinct_values(match_column) {
            let hit = self.lookup(&value, &choices, &snapshot);
            report.distinct += 1;
            match &hit {
                Some((canonical, score)) => {
                    report.matched += 1;
                    if canonical != &value {
                        debug!(source = %value, canonical = %canonical, score, "fuzzy identity match");
                    }
                }
                None => report.unmatched.push(value.clone()),
            }
            resolved.insert(value, hit.map(|(c, _)| c));
        }

        let mut canonical_col = Vec::with_capacity(initial.len());
        let mut target_col = Vec::with_capacity(initial.len());
        for row in initial.rows() {
            let cell = &row[match_idx];
            let canonical = if cell.is_null() {
                None
            } else {
                resolved.get(&cell.key_repr()).cloned().flatten()
            };
            match canonical {
                Some(name) => {
                    target_col.push(lookup.get(&name).cloned().unwrap_or_default());
                    canonical_col.push(Cell::Text(name));
                }
                None => {
                    target_col.push(Cell::Null);
                    canonical_col.push(Cell::Null);
                }
            }
        }
        initial.set_column(match_column, canonical_col);
        initial.set_column(target_column, target_col);

        info!(
            table = %initial.name,
            column = match_column,
            target = target_column,
            matched = report.matched,
            distinct = report.distinct,
            "identity resolution done"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_duplicate_scores_full() {
        let choices = vec!["Bukayo Saka".to_string(), "Bukayo Saka".to_string()];
        let (name, score) = best_match("Bukayo Saka", &choices, DEFAULT_MATCH_THRESHOLD).unwrap();
        assert_eq!(name, "Bukayo Saka");
        assert_eq!(score, 100.0);
    }

    #[test]
    fn token_order_is_tolerated() {
        assert!(similarity("Silva Bernardo", "Bernardo Silva") > 99.0);
    }

    #[test]
    fn snapshot_id_depends_on_content() {
        let a = SnapshotId::of(&["x".to_string()]);
        let b = SnapshotId::of(&["y".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a, SnapshotId::of(&["x".to_string()]));
    }
}
