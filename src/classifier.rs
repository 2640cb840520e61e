//! Question inclusion rules.
//!
//! Decides, from a question's text and identifiers alone, whether the
//! responses under it count as service-satisfaction answers. Accepted
//! questions carry a priority used by the priority merge policy.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Priority of questions that explicitly ask about the service experience.
pub const TOP_PRIORITY: i32 = 10;

/// Priority of questions no rule matched.
pub const NEUTRAL_PRIORITY: i32 = 0;

/// Score reported for rejected questions.
pub const REJECT_SCORE: i32 = -1;

/// A question rejected by id, regardless of its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExcludedQuestion {
    pub survey: String,
    pub question: String,
}

/// Configurable rule set. Terms are matched case- and accent-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSet {
    /// Technical/product terms that reject a question.
    #[serde(default = "default_deny_terms")]
    pub deny_terms: Vec<String>,

    /// Terms that override the deny list and accept at top priority.
    #[serde(default = "default_rescue_terms")]
    pub rescue_terms: Vec<String>,

    /// Experience/service terms that accept at top priority.
    #[serde(default = "default_allow_terms")]
    pub allow_terms: Vec<String>,

    /// (survey, question) pairs that are always rejected.
    #[serde(default)]
    pub excluded_questions: Vec<ExcludedQuestion>,
}

impl Default for RuleSet {
    fn default() -> Self {
        Self {
            deny_terms: default_deny_terms(),
            rescue_terms: default_rescue_terms(),
            allow_terms: default_allow_terms(),
            excluded_questions: Vec::new(),
        }
    }
}

fn default_deny_terms() -> Vec<String> {
    ["internet", "banda larga", "wifi", "fibra", "conexão", "serviço"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_rescue_terms() -> Vec<String> {
    vec!["atendimento".to_string()]
}

fn default_allow_terms() -> Vec<String> {
    ["experiência", "atendimento", "suporte", "agente"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Why a question was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    /// Matched an entry of `excluded_questions`.
    ExcludedId,
    /// Text contained a deny term.
    Keyword(String),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::ExcludedId => write!(f, "excluded by id"),
            RejectReason::Keyword(term) => write!(f, "term '{}'", term),
        }
    }
}

/// Classification outcome for one question block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accept { priority: i32 },
    Reject(RejectReason),
}

impl Decision {
    #[allow(dead_code)] // Convenience for callers that only need the verdict
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accept { .. })
    }

    /// Priority score; negative means rejected.
    pub fn score(&self) -> i32 {
        match self {
            Decision::Accept { priority } => *priority,
            Decision::Reject(_) => REJECT_SCORE,
        }
    }
}

/// Pure question classifier built from a `RuleSet`.
#[derive(Debug, Clone)]
pub struct QuestionClassifier {
    deny_terms: Vec<(String, String)>,
    rescue_terms: Vec<String>,
    allow_terms: Vec<String>,
    excluded: Vec<ExcludedQuestion>,
}

impl Default for QuestionClassifier {
    fn default() -> Self {
        Self::new(&RuleSet::default())
    }
}

impl QuestionClassifier {
    pub fn new(rules: &RuleSet) -> Self {
        Self {
            // Keep the configured spelling for the audit trail.
            deny_terms: rules
                .deny_terms
                .iter()
                .map(|t| (fold(t), t.clone()))
                .filter(|(folded, _)| !folded.is_empty())
                .collect(),
            rescue_terms: fold_all(&rules.rescue_terms),
            allow_terms: fold_all(&rules.allow_terms),
            excluded: rules
                .excluded_questions
                .iter()
                .map(|e| ExcludedQuestion {
                    survey: e.survey.trim().to_string(),
                    question: e.question.trim().to_string(),
                })
                .collect(),
        }
    }

    /// Classify a question.
    ///
    /// Rule order: explicit id exclusion, rescue terms, deny terms, allow
    /// terms, then neutral acceptance.
    pub fn classify(&self, text: &str, question_id: Option<&str>, survey_id: Option<&str>) -> Decision {
        if let (Some(question), Some(survey)) = (question_id, survey_id) {
            let (question, survey) = (question.trim(), survey.trim());
            if self
                .excluded
                .iter()
                .any(|e| e.survey == survey && e.question == question)
            {
                return Decision::Reject(RejectReason::ExcludedId);
            }
        }

        let text = fold(text);

        if self.rescue_terms.iter().any(|t| text.contains(t.as_str())) {
            return Decision::Accept {
                priority: TOP_PRIORITY,
            };
        }

        if let Some((_, original)) = self
            .deny_terms
            .iter()
            .find(|(folded, _)| text.contains(folded.as_str()))
        {
            return Decision::Reject(RejectReason::Keyword(original.clone()));
        }

        if self.allow_terms.iter().any(|t| text.contains(t.as_str())) {
            return Decision::Accept {
                priority: TOP_PRIORITY,
            };
        }

        Decision::Accept {
            priority: NEUTRAL_PRIORITY,
        }
    }
}

fn fold_all(terms: &[String]) -> Vec<String> {
    terms
        .iter()
        .map(|t| fold(t))
        .filter(|t| !t.is_empty())
        .collect()
}

/// Lowercase and strip Portuguese diacritics.
pub(crate) fn fold(s: &str) -> String {
    s.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'ç' => 'c',
            other => other,
        })
        .collect()
}

/// Accepted and rejected question labels seen during a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QuestionAudit {
    pub accepted: BTreeSet<String>,
    /// Label to rejection reason.
    pub rejected: BTreeMap<String, String>,
}

impl QuestionAudit {
    pub fn record(&mut self, label: &str, decision: &Decision) {
        match decision {
            Decision::Accept { .. } => {
                self.accepted.insert(label.to_string());
            }
            Decision::Reject(reason) => {
                self.rejected.insert(label.to_string(), reason.to_string());
            }
        }
    }

    pub fn merge(&mut self, other: QuestionAudit) {
        self.accepted.extend(other.accepted);
        self.rejected.extend(other.rejected);
    }

    pub fn is_empty(&self) -> bool {
        self.accepted.is_empty() && self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(text: &str) -> Decision {
        QuestionClassifier::default().classify(text, None, None)
    }

    #[test]
    fn test_internet_without_atendimento_is_rejected() {
        let texts = [
            "Como avalia sua internet?",
            "Qualidade da INTERNET em casa",
            "A velocidade da internet atende?",
        ];
        for text in texts {
            assert_eq!(
                classify(text),
                Decision::Reject(RejectReason::Keyword("internet".to_string())),
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_service_terms_accept_at_top_priority() {
        let texts = [
            "Sobre sua experiência neste atendimento",
            "Como foi o atendimento?",
            "Nota para o atendimento da internet",
            "O que achou do serviço de atendimento?",
            "Qual sua experiência geral?",
        ];
        for text in texts {
            assert_eq!(
                classify(text),
                Decision::Accept {
                    priority: TOP_PRIORITY
                },
                "{}",
                text
            );
        }
    }

    #[test]
    fn test_deny_terms_are_accent_insensitive() {
        assert!(!classify("Estabilidade da conexao").is_accepted());
        assert!(!classify("Qualidade do SERVIÇO contratado").is_accepted());
        assert!(!classify("Sinal do wifi").is_accepted());
    }

    #[test]
    fn test_unmatched_question_is_neutral() {
        let decision = classify("Você recomendaria a empresa?");
        assert_eq!(
            decision,
            Decision::Accept {
                priority: NEUTRAL_PRIORITY
            }
        );
        assert_eq!(decision.score(), 0);
    }

    #[test]
    fn test_excluded_id_overrides_text() {
        let rules = RuleSet {
            excluded_questions: vec![ExcludedQuestion {
                survey: "77".to_string(),
                question: "301".to_string(),
            }],
            ..RuleSet::default()
        };
        let classifier = QuestionClassifier::new(&rules);

        let text = "Sobre sua experiência neste atendimento";
        assert_eq!(
            classifier.classify(text, Some("301"), Some("77")),
            Decision::Reject(RejectReason::ExcludedId)
        );
        // Same question id in another survey is not affected
        assert!(classifier.classify(text, Some("301"), Some("78")).is_accepted());
        assert!(classifier.classify(text, Some("302"), Some("77")).is_accepted());
    }

    #[test]
    fn test_reject_score_is_negative() {
        assert!(classify("fibra óptica").score() < 0);
    }

    #[test]
    fn test_audit_records_both_outcomes() {
        let mut audit = QuestionAudit::default();
        audit.record("[1] Atendimento", &classify("Atendimento"));
        audit.record("[2] Internet", &classify("Internet"));

        assert!(audit.accepted.contains("[1] Atendimento"));
        assert_eq!(
            audit.rejected.get("[2] Internet").map(String::as_str),
            Some("term 'internet'")
        );

        let mut other = QuestionAudit::default();
        other.record("[3] Outra", &classify("Outra"));
        audit.merge(other);
        assert_eq!(audit.accepted.len(), 2);
    }
}
