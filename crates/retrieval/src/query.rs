//! Query contexts and term extraction.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use edflow_core::{Patient, Room};
use edflow_rules::RuleCategory;
use regex::Regex;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "that", "this", "are", "was", "were", "has", "have", "from",
    "into", "than", "then", "when", "who", "any", "all", "not", "but", "its", "per", "les",
    "des", "pour", "dans", "avec", "une", "sur",
];

fn word_regex() -> &'static Regex {
    static WORD: OnceLock<Regex> = OnceLock::new();
    WORD.get_or_init(|| Regex::new(r"\w+").expect("static pattern"))
}

/// Split text into lowercase index terms.
///
/// Words shorter than three characters, pure numbers and stop words are dropped.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.chars().count() >= 3)
        .filter(|w| !w.chars().all(|c| c.is_ascii_digit()))
        .filter(|w| !STOP_WORDS.contains(&w.as_str()))
        .collect()
}

/// What the caller wants rules for.
#[derive(Debug, Clone, Default)]
pub struct QueryContext<'a> {
    /// Restrict to one category
    pub category: Option<RuleCategory>,

    /// Free-text part of the query
    pub text: String,

    /// Patient the decision concerns
    pub patient: Option<&'a Patient>,

    /// Room the patient holds or is considered for
    pub room: Option<&'a Room>,
}

impl<'a> QueryContext<'a> {
    /// Free-text query.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Query for one rule category.
    pub fn for_category(category: RuleCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    /// Restrict to a category.
    pub fn with_category(mut self, category: RuleCategory) -> Self {
        self.category = Some(category);
        self
    }

    /// Attach patient facts.
    pub fn with_patient(mut self, patient: &'a Patient) -> Self {
        self.patient = Some(patient);
        self
    }

    /// Attach room facts.
    pub fn with_room(mut self, room: Option<&'a Room>) -> Self {
        self.room = room;
        self
    }

    /// Terms describing the context.
    pub fn terms(&self) -> BTreeSet<String> {
        let mut terms = tokenize(&self.text);

        if let Some(category) = self.category {
            terms.insert(category.as_str().to_string());
        }

        if let Some(patient) = self.patient {
            for flag in patient.vitals.clinical_flags() {
                terms.insert(flag.to_string());
            }
            if let Some(class) = patient.triage_class {
                terms.insert(class.as_str().to_string());
            }
            for tag in &patient.required_capabilities {
                terms.extend(tokenize(tag));
            }
        }

        if let Some(room) = self.room {
            for tag in &room.capabilities {
                terms.extend(tokenize(tag));
            }
        }

        terms
    }

    /// Single string sent to an embedding oracle.
    pub fn render(&self) -> String {
        let terms: Vec<String> = self.terms().into_iter().collect();
        if self.text.trim().is_empty() {
            terms.join(" ")
        } else {
            format!("{} {}", self.text.trim(), terms.join(" "))
        }
    }
}
