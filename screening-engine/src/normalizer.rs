//! Name canonicalization shared by queries and watch-list records
//!
//! - Unicode compatibility decomposition with combining marks stripped
//! - Transliteration of letters that do not decompose (ß, æ, ø, ł ...)
//! - Lowercase, punctuation to whitespace, apostrophes dropped
//! - Honorifics and particles removed via a configurable stop-list

use crate::config::MatchingConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Derived form of a name. `tokens` keep their original order for scoring,
/// `folded_form` is the sorted token string used for exact shortcuts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedName {
    pub tokens: Vec<String>,
    pub folded_form: String,
}

impl NormalizedName {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Tokens joined in their original order
    pub fn ordered_form(&self) -> String {
        self.tokens.join(" ")
    }
}

#[derive(Debug, Clone)]
pub struct Normalizer {
    stop_words: HashSet<String>,
}

impl Default for Normalizer {
    fn default() -> Self {
        Self::from_config(&MatchingConfig::default())
    }
}

impl Normalizer {
    pub fn new<I, S>(stop_words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            stop_words: stop_words
                .into_iter()
                .map(|w| fold_text(w.as_ref()).trim().to_string())
                .filter(|w| !w.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &MatchingConfig) -> Self {
        Self::new(&config.stop_words)
    }

    /// Never fails. Input with no letters or digits yields zero tokens.
    pub fn normalize(&self, name: &str) -> NormalizedName {
        let folded = fold_text(name);
        let all: Vec<&str> = folded.split_whitespace().collect();

        let kept: Vec<String> = all
            .iter()
            .filter(|t| !self.stop_words.contains(**t))
            .map(|t| t.to_string())
            .collect();

        // A name made only of particles ("Al", "De La") keeps them
        let tokens = if kept.is_empty() {
            all.into_iter().map(String::from).collect()
        } else {
            kept
        };

        let mut sorted = tokens.clone();
        sorted.sort();

        NormalizedName {
            folded_form: sorted.join(" "),
            tokens,
        }
    }
}

fn fold_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for c in input.nfkd().filter(|c| !is_combining_mark(*c)) {
        match c {
            '\'' | '\u{2019}' | '\u{2018}' | '`' | '\u{02BC}' => {}
            'ß' => out.push_str("ss"),
            'æ' | 'Æ' => out.push_str("ae"),
            'œ' | 'Œ' => out.push_str("oe"),
            'ø' | 'Ø' => out.push('o'),
            'đ' | 'Đ' | 'ð' | 'Ð' => out.push('d'),
            'ł' | 'Ł' => out.push('l'),
            'þ' | 'Þ' => out.push_str("th"),
            'ı' => out.push('i'),
            c if c.is_alphanumeric() => out.extend(c.to_lowercase()),
            _ => out.push(' '),
        }
    }

    out
}

// Country names seen in OFAC and UN feeds, mapped to ISO-3166 alpha-2
const COUNTRY_CODES: &[(&str, &str)] = &[
    ("afghanistan", "AF"),
    ("belarus", "BY"),
    ("burma", "MM"),
    ("china", "CN"),
    ("colombia", "CO"),
    ("congo democratic republic of the", "CD"),
    ("cuba", "CU"),
    ("egypt", "EG"),
    ("eritrea", "ER"),
    ("france", "FR"),
    ("germany", "DE"),
    ("india", "IN"),
    ("iran", "IR"),
    ("iran islamic republic of", "IR"),
    ("iraq", "IQ"),
    ("jordan", "JO"),
    ("korea north", "KP"),
    ("democratic peoples republic of korea", "KP"),
    ("kuwait", "KW"),
    ("lebanon", "LB"),
    ("libya", "LY"),
    ("mali", "ML"),
    ("mexico", "MX"),
    ("myanmar", "MM"),
    ("nicaragua", "NI"),
    ("nigeria", "NG"),
    ("pakistan", "PK"),
    ("russia", "RU"),
    ("russian federation", "RU"),
    ("saudi arabia", "SA"),
    ("somalia", "SO"),
    ("south sudan", "SS"),
    ("spain", "ES"),
    ("sudan", "SD"),
    ("syria", "SY"),
    ("syrian arab republic", "SY"),
    ("turkey", "TR"),
    ("ukraine", "UA"),
    ("united arab emirates", "AE"),
    ("united kingdom", "GB"),
    ("united states", "US"),
    ("venezuela", "VE"),
    ("yemen", "YE"),
    ("zimbabwe", "ZW"),
];

/// Canonical nationality value: ISO alpha-2 upper-cased when recognisable,
/// otherwise the folded upper-case name. Empty input yields `None`.
pub fn normalize_country(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        return Some(trimmed.to_ascii_uppercase());
    }

    let folded = fold_text(trimmed).split_whitespace().collect::<Vec<_>>().join(" ");
    COUNTRY_CODES
        .iter()
        .find(|(name, _)| *name == folded)
        .map(|(_, code)| code.to_string())
        .or_else(|| Some(folded.to_uppercase()))
}
