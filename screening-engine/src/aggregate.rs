//! Merging per-source matches into one ranked, classified result

use crate::matcher::CandidateScore;
use crate::registry::SourceSettings;
use crate::types::{Match, RiskLevel, ScreeningStatus, SourceRecord};
use chrono::NaiveDate;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

pub fn build_match(record: &SourceRecord, settings: &SourceSettings, scored: CandidateScore) -> Match {
    let mut contributing_sources = BTreeSet::new();
    contributing_sources.insert(record.source_id.clone());

    Match {
        source_id: record.source_id.clone(),
        record_id: record.record_id.clone(),
        list_name: record.list_name.clone(),
        list_kind: settings.list_kind,
        source_priority: settings.priority,
        matched_name: scored.matched_name,
        score: scored.score,
        matched_fields: scored.matched_fields,
        subject_type: record.subject_type,
        birth_date: record.birth_date,
        contributing_sources,
    }
}

/// Score descending, then exact DOB, sanctions before PEP, source priority,
/// record id and finally source id. Total, so output order is deterministic.
pub fn compare_matches(a: &Match, b: &Match) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.dob_matched().cmp(&a.dob_matched()))
        .then_with(|| a.list_kind.cmp(&b.list_kind))
        .then_with(|| a.source_priority.cmp(&b.source_priority))
        .then_with(|| a.record_id.cmp(&b.record_id))
        .then_with(|| a.source_id.cmp(&b.source_id))
}

/// Sorts, then folds matches from different sources that name the same person:
/// identical matched name and identical known birth date. The best-ranked
/// instance is kept and records every contributing source.
pub fn merge_matches(mut matches: Vec<Match>) -> Vec<Match> {
    matches.sort_by(compare_matches);

    let mut merged: Vec<Match> = Vec::with_capacity(matches.len());
    let mut seen: HashMap<(String, NaiveDate), usize> = HashMap::new();

    for m in matches {
        let key = match m.birth_date {
            Some(dob) => (m.matched_name.clone(), dob),
            None => {
                merged.push(m);
                continue;
            }
        };

        match seen.get(&key) {
            Some(&idx) if !merged[idx].contributing_sources.contains(&m.source_id) => {
                let kept = &mut merged[idx];
                kept.contributing_sources.extend(m.contributing_sources);
            }
            Some(_) => merged.push(m),
            None => {
                seen.insert(key, merged.len());
                merged.push(m);
            }
        }
    }

    merged
}

pub fn classify_risk(matches: &[Match], high_risk_cutoff: f64) -> RiskLevel {
    if matches.is_empty() {
        return RiskLevel::Low;
    }
    if matches.iter().any(|m| m.score >= high_risk_cutoff) {
        return RiskLevel::High;
    }

    let sources: BTreeSet<&str> = matches
        .iter()
        .flat_map(|m| m.contributing_sources.iter().map(String::as_str))
        .collect();
    if sources.len() >= 2 {
        RiskLevel::High
    } else {
        RiskLevel::Medium
    }
}

pub fn resolve_status(succeeded: usize, failed: usize) -> ScreeningStatus {
    match (succeeded, failed) {
        (_, 0) => ScreeningStatus::Completed,
        (0, _) => ScreeningStatus::Failed,
        _ => ScreeningStatus::PartialFailure,
    }
}
