//! Rule model - immutable, declarative guidance for the agent.

use edflow_core::{RuleId, TriageClass};
use serde::{Deserialize, Serialize};

use crate::condition::{Condition, EvalContext};

/// Which pipeline stage consults a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleCategory {
    /// Triage thresholds
    Triage,
    /// Admission criteria (room requirements)
    Admission,
    /// Transfer protocols
    Transfer,
}

impl RuleCategory {
    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Triage => "triage",
            Self::Admission => "admission",
            Self::Transfer => "transfer",
        }
    }
}

impl std::fmt::Display for RuleCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RuleCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "triage" => Ok(Self::Triage),
            "admission" => Ok(Self::Admission),
            "transfer" => Ok(Self::Transfer),
            other => Err(format!("unknown rule category '{}'", other)),
        }
    }
}

/// Urgency of a transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferPriority {
    /// Routine
    #[default]
    Normal,
    /// Immediate
    Immediate,
}

/// Recommended action of a rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuleAction {
    /// Set the triage class, optionally adding room requirements
    AssignTriage {
        class: TriageClass,
        #[serde(default)]
        requires: Vec<String>,
    },

    /// Add room capability requirements
    RequireCapabilities { tags: Vec<String> },

    /// Move the patient to a unit
    Transfer {
        unit: String,
        #[serde(default)]
        priority: TransferPriority,
    },

    /// Send the patient home
    Discharge,
}

impl RuleAction {
    /// Category the action belongs to.
    pub fn category(&self) -> RuleCategory {
        match self {
            Self::AssignTriage { .. } => RuleCategory::Triage,
            Self::RequireCapabilities { .. } => RuleCategory::Admission,
            Self::Transfer { .. } | Self::Discharge => RuleCategory::Transfer,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::AssignTriage { class, requires } => {
                format!("assign triage {} {}", class, requires.join(" "))
            }
            Self::RequireCapabilities { tags } => format!("require {}", tags.join(" ")),
            Self::Transfer { unit, .. } => format!("transfer to {}", unit),
            Self::Discharge => "discharge home".to_string(),
        }
    }
}

/// A rule as loaded from a rule file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    /// Unique identifier
    pub id: RuleId,

    /// Category
    pub category: RuleCategory,

    /// When the rule applies
    pub trigger: Condition,

    /// What it recommends
    pub action: RuleAction,

    /// Free-text justification, used for retrieval and explanations
    #[serde(default)]
    pub rationale: String,
}

impl Rule {
    /// Whether the trigger holds for the given facts.
    pub fn matches(&self, ctx: &EvalContext<'_>) -> bool {
        self.trigger.evaluate(ctx)
    }

    /// Explicit severity threshold of the trigger, used to break triage ties.
    pub fn severity_threshold(&self) -> Option<f64> {
        self.trigger.severity_threshold()
    }

    /// Text indexed by the retrieval engine.
    pub fn search_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.id.as_str().replace(['-', '_', '.'], " "),
            self.category,
            self.action.describe(),
            self.rationale
        )
    }

    /// Validate and normalize a freshly parsed rule.
    pub(crate) fn prepare(mut self) -> Result<Self, String> {
        if self.id.is_blank() {
            return Err("rule id is empty".to_string());
        }
        self.trigger.validate().map_err(|e| format!("invalid trigger: {}", e))?;
        if self.action.category() != self.category {
            return Err(format!(
                "action '{}' does not belong to category '{}'",
                self.action.describe().trim(),
                self.category
            ));
        }

        self.trigger.normalize();
        match &mut self.action {
            RuleAction::AssignTriage { requires: tags, .. } | RuleAction::RequireCapabilities { tags } => {
                for tag in tags.iter_mut() {
                    *tag = tag.trim().to_lowercase();
                }
                tags.retain(|t| !t.is_empty());
            }
            RuleAction::Transfer { unit, .. } => {
                if unit.trim().is_empty() {
                    return Err("transfer destination is empty".to_string());
                }
            }
            RuleAction::Discharge => {}
        }
        if let RuleAction::RequireCapabilities { tags } = &self.action {
            if tags.is_empty() {
                return Err("admission rule requires no capability".to_string());
            }
        }
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Rule {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_prepare_accepts_valid_rule() {
        let rule = parse(
            r#"{
                "id": "triage-critical",
                "category": "triage",
                "trigger": {"kind": "threshold", "attribute": "severity_score", "op": ">=", "value": 7},
                "action": {"type": "assign_triage", "class": "critical", "requires": ["Resuscitation"]},
                "rationale": "Severe physiological derangement needs immediate resuscitation."
            }"#,
        )
        .prepare()
        .unwrap();

        assert_eq!(rule.severity_threshold(), Some(7.0));
        match &rule.action {
            RuleAction::AssignTriage { requires, .. } => assert_eq!(requires, &vec!["resuscitation".to_string()]),
            other => panic!("unexpected action {:?}", other),
        }
        let text = rule.search_text();
        assert!(text.contains("triage critical"));
        assert!(text.contains("resuscitation"));
    }

    #[test]
    fn test_prepare_rejects_category_mismatch() {
        let rule = parse(
            r#"{
                "id": "bad",
                "category": "admission",
                "trigger": {"kind": "threshold", "attribute": "pain_score", "op": ">", "value": 5},
                "action": {"type": "discharge"}
            }"#,
        );
        let err = rule.prepare().unwrap_err();
        assert!(err.contains("does not belong"));
    }

    #[test]
    fn test_prepare_rejects_blank_id() {
        let rule = parse(
            r#"{
                "id": "  ",
                "category": "transfer",
                "trigger": {"kind": "triage_at_least", "class": "urgent"},
                "action": {"type": "transfer", "unit": "ICU"}
            }"#,
        );
        assert_eq!(rule.prepare().unwrap_err(), "rule id is empty");
    }
}
