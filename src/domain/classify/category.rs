use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the business category of a thread.
#[derive(Debug, Clone, Copy, Default, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub enum Category {
    NilFiling,
    VatFiling,
    GstFiling,
    ItrSubmission,
    DocumentRequest,
    ComplianceNotice,
    #[default]
    General,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NilFiling => "nil_filing",
            Self::VatFiling => "vat_filing",
            Self::GstFiling => "gst_filing",
            Self::ItrSubmission => "itr_submission",
            Self::DocumentRequest => "document_request",
            Self::ComplianceNotice => "compliance_notice",
            Self::General => "general",
        }
    }
}

impl From<&str> for Category {
    fn from(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "nil_filing" => Self::NilFiling,
            "vat_filing" => Self::VatFiling,
            "gst_filing" => Self::GstFiling,
            "itr_submission" => Self::ItrSubmission,
            "document_request" | "doc_request" => Self::DocumentRequest,
            "compliance_notice" => Self::ComplianceNotice,
            _ => Self::General,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
