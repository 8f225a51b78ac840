use crate::config::MatchingConfig;
use crate::normalizer::{NormalizedName, Normalizer};
use crate::types::{MatchedField, ScreeningQuery, SourceRecord};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use strsim::normalized_levenshtein;

// Token pairs below this similarity are treated as unaligned
const TOKEN_FLOOR: f64 = 0.5;

// Largest side solved exactly; longer names fall back to greedy alignment
const MAX_EXACT_TOKENS: usize = 12;

/// Attributes that can boost a name score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Attributes<'a> {
    pub date_of_birth: Option<NaiveDate>,
    pub nationality: Option<&'a str>,
}

/// A query normalized once per screening
#[derive(Debug, Clone)]
pub struct PreparedQuery {
    /// Primary name first, then aliases in input order. May be empty.
    names: Vec<NormalizedName>,
    date_of_birth: Option<NaiveDate>,
    nationality: Option<String>,
}

impl PreparedQuery {
    pub fn is_empty(&self) -> bool {
        self.names.iter().all(|n| n.is_empty())
    }

    fn attributes(&self) -> Attributes<'_> {
        Attributes {
            date_of_birth: self.date_of_birth,
            nationality: self.nationality.as_deref(),
        }
    }
}

/// Best comparison between a query and one record
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore {
    pub score: f64,
    pub matched_name: String,
    pub matched_fields: BTreeSet<MatchedField>,
}

#[derive(Debug, Clone)]
pub struct FuzzyMatcher {
    normalizer: Normalizer,
    dob_bonus: f64,
    nationality_bonus: f64,
    order_penalty: f64,
    initial_similarity: f64,
}

impl Default for FuzzyMatcher {
    fn default() -> Self {
        Self::new(&MatchingConfig::default())
    }
}

impl FuzzyMatcher {
    pub fn new(config: &MatchingConfig) -> Self {
        Self {
            normalizer: Normalizer::from_config(config),
            dob_bonus: config.dob_bonus,
            nationality_bonus: config.nationality_bonus,
            order_penalty: config.order_penalty,
            initial_similarity: config.initial_similarity,
        }
    }

    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    pub fn prepare(&self, query: &ScreeningQuery) -> PreparedQuery {
        let names = std::iter::once(query.subject_name())
            .chain(query.aliases().iter().map(String::as_str))
            .map(|n| self.normalizer.normalize(n))
            .collect();

        PreparedQuery {
            names,
            date_of_birth: query.date_of_birth(),
            nationality: query.nationality().map(str::to_uppercase),
        }
    }

    /// Final score in [0, 1]: name alignment plus attribute boosts, capped at 1.0.
    /// A side with zero tokens always scores 0.
    pub fn score(
        &self,
        query: &NormalizedName,
        candidate: &NormalizedName,
        query_attrs: &Attributes<'_>,
        candidate_attrs: &Attributes<'_>,
    ) -> f64 {
        let base = self.name_score(query, candidate);
        if base <= 0.0 {
            return 0.0;
        }
        let (bonus, _, _) = self.attribute_bonus(query_attrs, candidate_attrs);
        (base + bonus).min(1.0)
    }

    /// Order-aware token alignment score in [0, 1]
    pub fn name_score(&self, query: &NormalizedName, candidate: &NormalizedName) -> f64 {
        if query.is_empty() || candidate.is_empty() {
            return 0.0;
        }
        if query.tokens == candidate.tokens {
            return 1.0;
        }

        let q = &query.tokens;
        let c = &candidate.tokens;

        let sims: Vec<Vec<f64>> = q
            .iter()
            .map(|a| c.iter().map(|b| self.token_similarity(a, b)).collect())
            .collect();

        let lens_q: Vec<f64> = q.iter().map(|t| t.chars().count() as f64).collect();
        let lens_c: Vec<f64> = c.iter().map(|t| t.chars().count() as f64).collect();

        let weight = |i: usize, j: usize| sims[i][j] * (lens_q[i] + lens_c[j]);
        let pairs = best_alignment(q.len(), c.len(), &weight);

        let total: f64 = lens_q.iter().sum::<f64>() + lens_c.iter().sum::<f64>();
        let aligned: f64 = pairs.iter().map(|&(i, j)| weight(i, j)).sum();
        let mut score = aligned / total;

        if pairs.len() > 1 {
            let mut inversions = 0usize;
            for a in 0..pairs.len() {
                for b in (a + 1)..pairs.len() {
                    if pairs[b].1 < pairs[a].1 {
                        inversions += 1;
                    }
                }
            }
            let possible = pairs.len() * (pairs.len() - 1) / 2;
            score -= self.order_penalty * inversions as f64 / possible as f64;
        }

        score.clamp(0.0, 1.0)
    }

    fn token_similarity(&self, a: &str, b: &str) -> f64 {
        if a == b {
            return 1.0;
        }

        let a_len = a.chars().count();
        let b_len = b.chars().count();
        let sim = if a_len == 1 || b_len == 1 {
            // "C" aligns with "Carlos"
            if a.chars().next() == b.chars().next() {
                self.initial_similarity
            } else {
                0.0
            }
        } else {
            normalized_levenshtein(a, b)
        };

        if sim < TOKEN_FLOOR {
            0.0
        } else {
            sim
        }
    }

    fn attribute_bonus(&self, query: &Attributes<'_>, candidate: &Attributes<'_>) -> (f64, bool, bool) {
        let dob = matches!(
            (query.date_of_birth, candidate.date_of_birth),
            (Some(a), Some(b)) if a == b
        );
        let nationality = matches!(
            (query.nationality, candidate.nationality),
            (Some(a), Some(b)) if a.eq_ignore_ascii_case(b)
        );

        let mut bonus = 0.0;
        if dob {
            bonus += self.dob_bonus;
        }
        if nationality {
            bonus += self.nationality_bonus;
        }
        (bonus, dob, nationality)
    }

    /// Best score over every query name against the record's primary name and aliases.
    /// Returns `None` when no names share any aligned token.
    pub fn evaluate(&self, query: &PreparedQuery, record: &SourceRecord) -> Option<CandidateScore> {
        if query.is_empty() {
            return None;
        }

        let candidates: Vec<(NormalizedName, &str, bool)> = std::iter::once((record.primary_name.as_str(), true))
            .chain(record.aliases.iter().map(|a| (a.as_str(), false)))
            .map(|(raw, primary)| (self.normalizer.normalize(raw), raw, primary))
            .filter(|(n, _, _)| !n.is_empty())
            .collect();

        // (name score, candidate is primary, query name is primary, matched name)
        let mut best: Option<(f64, bool, bool, &str)> = None;
        for (qi, qname) in query.names.iter().enumerate() {
            if qname.is_empty() {
                continue;
            }
            for (cname, raw, c_primary) in &candidates {
                let s = self.name_score(qname, cname);
                if s <= 0.0 {
                    continue;
                }
                let current = (s, *c_primary, qi == 0, *raw);
                if best.map_or(true, |b| prefer(&current, &b) == Ordering::Greater) {
                    best = Some(current);
                }
            }
        }

        let (name_score, c_primary, q_primary, matched_name) = best?;

        let candidate_attrs = Attributes {
            date_of_birth: record.birth_date,
            nationality: record.nationality.as_deref(),
        };
        let (bonus, dob, nationality) = self.attribute_bonus(&query.attributes(), &candidate_attrs);

        let mut matched_fields = BTreeSet::new();
        if c_primary && q_primary {
            matched_fields.insert(MatchedField::Name);
        } else {
            matched_fields.insert(MatchedField::Alias);
        }
        if dob {
            matched_fields.insert(MatchedField::Dob);
        }
        if nationality {
            matched_fields.insert(MatchedField::Nationality);
        }

        Some(CandidateScore {
            score: round_score((name_score + bonus).min(1.0)),
            matched_name: matched_name.to_string(),
            matched_fields,
        })
    }
}

// Higher score wins; then record primary name, then query primary name, then lexically smaller name
fn prefer(a: &(f64, bool, bool, &str), b: &(f64, bool, bool, &str)) -> Ordering {
    a.0.partial_cmp(&b.0)
        .unwrap_or(Ordering::Equal)
        .then(a.1.cmp(&b.1))
        .then(a.2.cmp(&b.2))
        .then_with(|| b.3.cmp(a.3))
}

/// Scores are reported at 4 decimal places so equal alignments compare equal
pub fn round_score(score: f64) -> f64 {
    (score * 10_000.0).round() / 10_000.0
}

/// Maximum-weight one-to-one alignment between `rows` and `cols` tokens.
/// Exact bitmask DP over the smaller side, greedy beyond `MAX_EXACT_TOKENS`.
fn best_alignment(rows: usize, cols: usize, weight: &dyn Fn(usize, usize) -> f64) -> Vec<(usize, usize)> {
    let transposed = cols > rows;
    let (n, m) = if transposed { (cols, rows) } else { (rows, cols) };
    let w = |i: usize, j: usize| if transposed { weight(j, i) } else { weight(i, j) };

    let pairs = if m <= MAX_EXACT_TOKENS {
        exact_alignment(n, m, &w)
    } else {
        greedy_alignment(n, m, &w)
    };

    let mut pairs: Vec<(usize, usize)> = pairs
        .into_iter()
        .map(|(i, j)| if transposed { (j, i) } else { (i, j) })
        .collect();
    pairs.sort();
    pairs
}

fn exact_alignment(n: usize, m: usize, w: &dyn Fn(usize, usize) -> f64) -> Vec<(usize, usize)> {
    let states = 1usize << m;
    let mut dp = vec![f64::NEG_INFINITY; states];
    dp[0] = 0.0;
    // parent[i][mask] = (previous mask, column taken by row i)
    let mut parent: Vec<Vec<(usize, Option<usize>)>> = Vec::with_capacity(n);

    for i in 0..n {
        let mut next = dp.clone();
        let mut back: Vec<(usize, Option<usize>)> = (0..states).map(|mask| (mask, None)).collect();

        for mask in 0..states {
            if dp[mask] == f64::NEG_INFINITY {
                continue;
            }
            for j in 0..m {
                if mask & (1 << j) != 0 {
                    continue;
                }
                let wij = w(i, j);
                if wij <= 0.0 {
                    continue;
                }
                let target = mask | (1 << j);
                let candidate = dp[mask] + wij;
                if candidate > next[target] {
                    next[target] = candidate;
                    back[target] = (mask, Some(j));
                }
            }
        }

        dp = next;
        parent.push(back);
    }

    let mut best_mask = 0;
    for mask in 0..states {
        if dp[mask] > dp[best_mask] {
            best_mask = mask;
        }
    }

    let mut pairs = Vec::new();
    let mut mask = best_mask;
    for i in (0..n).rev() {
        let (prev, taken) = parent[i][mask];
        if let Some(j) = taken {
            pairs.push((i, j));
        }
        mask = prev;
    }
    pairs
}

fn greedy_alignment(n: usize, m: usize, w: &dyn Fn(usize, usize) -> f64) -> Vec<(usize, usize)> {
    let mut all: Vec<(f64, usize, usize)> = (0..n)
        .flat_map(|i| (0..m).map(move |j| (i, j)))
        .map(|(i, j)| (w(i, j), i, j))
        .filter(|(wij, _, _)| *wij > 0.0)
        .collect();
    all.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut used_rows = vec![false; n];
    let mut used_cols = vec![false; m];
    let mut pairs = Vec::new();
    for (_, i, j) in all {
        if !used_rows[i] && !used_cols[j] {
            used_rows[i] = true;
            used_cols[j] = true;
            pairs.push((i, j));
        }
    }
    pairs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matcher() -> FuzzyMatcher {
        FuzzyMatcher::default()
    }

    fn norm(name: &str) -> NormalizedName {
        Normalizer::default().normalize(name)
    }

    fn record(name: &str, aliases: &[&str], dob: Option<NaiveDate>) -> SourceRecord {
        SourceRecord {
            source_id: "ofac".to_string(),
            list_name: "SDN".to_string(),
            record_id: "1".to_string(),
            primary_name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            birth_date: dob,
            nationality: None,
            subject_type: None,
        }
    }

    fn dob(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_identical_names_score_one() {
        let m = matcher();
        assert_eq!(m.name_score(&norm("Bank Melli Iran"), &norm("BANK MELLI IRAN")), 1.0);
    }

    #[test]
    fn test_initial_aligns_with_full_token() {
        let m = matcher();
        let s = m.name_score(&norm("Juan Carlos Perez"), &norm("Juan C. Perez"));
        assert!(s > 0.95 && s < 1.0, "score was {}", s);
    }

    #[test]
    fn test_typo_scores_between_thresholds() {
        let m = matcher();
        let s = m.name_score(&norm("Viktor Petrenko"), &norm("Victor Petrenko"));
        assert!(s >= 0.80 && s < 0.95, "score was {}", s);
    }

    #[test]
    fn test_reordered_tokens_tolerated_with_small_penalty() {
        let m = matcher();
        let in_order = m.name_score(&norm("Juan Carlos Perez"), &norm("Juan Carlos Perez"));
        let reordered = m.name_score(&norm("Perez Juan Carlos"), &norm("Juan Carlos Perez"));
        assert!(reordered < in_order);
        assert!(reordered >= 0.95, "score was {}", reordered);
    }

    #[test]
    fn test_missing_middle_name_tolerated() {
        let m = matcher();
        let s = m.name_score(&norm("Juan Perez"), &norm("Juan Carlos Perez"));
        assert!(s > 0.70, "score was {}", s);
        assert!(s < 0.90, "score was {}", s);
    }

    #[test]
    fn test_unrelated_names_score_zero() {
        let m = matcher();
        assert_eq!(m.name_score(&norm("Zzqx Flibber"), &norm("Juan Carlos Perez")), 0.0);
    }

    #[test]
    fn test_empty_name_scores_zero_even_with_dob() {
        let m = matcher();
        let attrs = Attributes {
            date_of_birth: Some(dob(1980, 1, 1)),
            nationality: None,
        };
        assert_eq!(m.score(&norm("..."), &norm("Juan Perez"), &attrs, &attrs), 0.0);
    }

    #[test]
    fn test_attribute_boosts_are_capped() {
        let m = matcher();
        let attrs = Attributes {
            date_of_birth: Some(dob(1980, 1, 1)),
            nationality: Some("MX"),
        };
        assert_eq!(m.score(&norm("Juan Perez"), &norm("Juan Perez"), &attrs, &attrs), 1.0);

        let base = m.name_score(&norm("Viktor Petrenko"), &norm("Victor Petrenko"));
        let boosted = m.score(&norm("Viktor Petrenko"), &norm("Victor Petrenko"), &attrs, &attrs);
        assert!((boosted - (base + 0.15).min(1.0)).abs() < 1e-9);
    }

    #[test]
    fn test_missing_candidate_attributes_no_penalty() {
        let m = matcher();
        let q = Attributes {
            date_of_birth: Some(dob(1980, 1, 1)),
            nationality: Some("MX"),
        };
        let c = Attributes::default();
        let base = m.name_score(&norm("Viktor Petrenko"), &norm("Victor Petrenko"));
        assert_eq!(m.score(&norm("Viktor Petrenko"), &norm("Victor Petrenko"), &q, &c), base);
    }

    #[test]
    fn test_score_is_deterministic() {
        let m = matcher();
        let q = norm("Mohammed Al Rashid");
        let c = norm("Muhammad Rashidi");
        let a = Attributes::default();
        assert_eq!(m.score(&q, &c, &a, &a), m.score(&q, &c, &a, &a));
    }

    #[test]
    fn test_evaluate_uses_best_alias_and_dob() {
        let m = matcher();
        let query = m.prepare(&ScreeningQuery::individual("Juan Carlos Perez").with_date_of_birth(dob(1980, 1, 1)));
        let rec = record("Johnny P", &["Juan C. Perez"], Some(dob(1980, 1, 1)));

        let result = m.evaluate(&query, &rec).unwrap();
        assert_eq!(result.matched_name, "Juan C. Perez");
        assert_eq!(result.score, 1.0);
        assert!(result.matched_fields.contains(&MatchedField::Alias));
        assert!(result.matched_fields.contains(&MatchedField::Dob));
        assert!(!result.matched_fields.contains(&MatchedField::Name));
    }

    #[test]
    fn test_evaluate_prefers_primary_on_equal_score() {
        let m = matcher();
        let query = m.prepare(&ScreeningQuery::individual("Ivan Petrov"));
        let rec = record("Ivan Petrov", &["IVAN PETROV"], None);

        let result = m.evaluate(&query, &rec).unwrap();
        assert_eq!(result.matched_name, "Ivan Petrov");
        assert!(result.matched_fields.contains(&MatchedField::Name));
    }

    #[test]
    fn test_query_alias_order_does_not_change_result() {
        let m = matcher();
        let rec = record("Ali Hassan", &["Abu Hassan"], None);
        let a = m.prepare(&ScreeningQuery::individual("Zzqx").with_aliases(["Ali Hasan", "Abu Hasan"]));
        let b = m.prepare(&ScreeningQuery::individual("Zzqx").with_aliases(["Abu Hasan", "Ali Hasan"]));
        assert_eq!(m.evaluate(&a, &rec), m.evaluate(&b, &rec));
    }

    #[test]
    fn test_evaluate_empty_query_is_none() {
        let m = matcher();
        let query = m.prepare(&ScreeningQuery::individual("???"));
        assert!(query.is_empty());
        assert!(m.evaluate(&query, &record("Juan Perez", &[], None)).is_none());
    }

    #[test]
    fn test_greedy_alignment_handles_long_names() {
        let m = matcher();
        let long = "a1 b2 c3 d4 e5 f6 g7 h8 i9 j10 k11 l12 m13 n14";
        assert_eq!(m.name_score(&norm(long), &norm(long)), 1.0);
        let s = m.name_score(&norm(long), &norm("a1 b2 c3 d4 e5 f6 g7 h8 i9 j10 k11 l12 m13 n15"));
        assert!(s > 0.9 && s < 1.0);
    }
}
