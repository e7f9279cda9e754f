use log::{debug, warn};
use regex::{Regex, RegexBuilder};

use crate::Category;

/// Assigns a category to a new thread out of its first message.
pub trait Classifier: Send + Sync {
    fn classify(&self, subject: &str, body: &str) -> Category;
}

/// Classifier evaluating a priority-ordered table of patterns top
/// down: the first category with a matching pattern wins, otherwise
/// [`Category::General`].
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    rules: Vec<(Category, Vec<Regex>)>,
}

impl PatternClassifier {
    /// Builds a classifier from a table of case insensitive
    /// patterns. Invalid patterns are skipped.
    pub fn new<'a, I, P>(table: I) -> Self
    where
        I: IntoIterator<Item = (Category, P)>,
        P: IntoIterator<Item = &'a str>,
    {
        let rules = table
            .into_iter()
            .map(|(category, patterns)| {
                let patterns = patterns
                    .into_iter()
                    .filter_map(|pattern| {
                        RegexBuilder::new(pattern)
                            .case_insensitive(true)
                            .build()
                            .map_err(|err| {
                                warn!("invalid {} pattern {}, skipping it: {}", category, pattern, err)
                            })
                            .ok()
                    })
                    .collect();
                (category, patterns)
            })
            .collect();

        Self { rules }
    }

    pub fn rules(&self) -> impl Iterator<Item = &Category> {
        self.rules.iter().map(|(category, _)| category)
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new([
            (
                Category::ComplianceNotice,
                vec![
                    r"\bnotice\b",
                    r"\bpenalt(y|ies)\b",
                    r"\bnon[- ]?compliance\b",
                    r"\bdemand\b",
                    r"\bscrutiny\b",
                ],
            ),
            (
                Category::NilFiling,
                vec![r"\bnil\s+(return|filing)\b", r"\bnil\b.*\b(vat|gst)\b"],
            ),
            (Category::VatFiling, vec![r"\bvat\b"]),
            (Category::GstFiling, vec![r"\bgst\b", r"\bgstr-?\d"]),
            (
                Category::ItrSubmission,
                vec![r"\bitr\b", r"\bincome\s+tax\s+return\b"],
            ),
            (
                Category::DocumentRequest,
                vec![
                    r"\bdocuments?\b.*\b(request|required|needed|pending)\b",
                    r"\b(please|kindly)\s+(send|share|provide)\b",
                    r"\bmissing\s+documents?\b",
                ],
            ),
        ])
    }
}

impl Classifier for PatternClassifier {
    fn classify(&self, subject: &str, body: &str) -> Category {
        let text = format!("{}\n{}", subject, body);

        let category = self
            .rules
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|pattern| pattern.is_match(&text)))
            .map(|(category, _)| *category)
            .unwrap_or_default();

        debug!("classified {:?} as {}", subject, category);
        category
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table() {
        let classifier = PatternClassifier::default();

        for (subject, body, expected) in [
            ("NIL return for March", "", Category::NilFiling),
            ("Nil VAT filing", "", Category::NilFiling),
            ("VAT return Q1", "", Category::VatFiling),
            ("GSTR-3B filed", "", Category::GstFiling),
            ("Your ITR", "", Category::ItrSubmission),
            ("Hello", "Kindly send the bank statements", Category::DocumentRequest),
            ("Penalty notice for VAT", "", Category::ComplianceNotice),
            ("Lunch?", "See you at noon", Category::General),
        ] {
            assert_eq!(classifier.classify(subject, body), expected, "subject: {subject}");
        }
    }

    #[test]
    fn table_order_wins() {
        let classifier = PatternClassifier::new([
            (Category::GstFiling, vec!["filing"]),
            (Category::VatFiling, vec!["vat"]),
        ]);

        assert_eq!(classifier.classify("VAT filing", ""), Category::GstFiling);
    }

    #[test]
    fn invalid_patterns_are_skipped() {
        let classifier = PatternClassifier::new([(Category::VatFiling, vec!["(", "vat"])]);
        assert_eq!(classifier.classify("vat", ""), Category::VatFiling);
    }
}
