use regex::Regex;
use std::sync::OnceLock;

/// Normalizes a subject for comparison: reply and forward prefixes
/// (including localized ones) and leading `[tag]`s are stripped
/// repeatedly, whitespaces are folded and the result is lower-cased.
pub fn normalize_subject(subject: &str) -> String {
    static PREFIX: OnceLock<Regex> = OnceLock::new();
    static TAG: OnceLock<Regex> = OnceLock::new();

    let prefix = PREFIX.get_or_init(|| {
        Regex::new(r"(?i)^\s*(re|fwd?|aw|rv|enc|tr|vs|sv|antw|odp|wg)(\s*\[\d+\])?\s*:\s*").unwrap()
    });
    let tag = TAG.get_or_init(|| Regex::new(r"^\s*\[[^\]]*\]\s*").unwrap());

    let mut subject = subject.trim().to_owned();

    loop {
        let stripped = prefix.replace(&subject, "");
        let stripped = tag.replace(&stripped, "").into_owned();

        if stripped == subject {
            break;
        }

        subject = stripped;
    }

    subject
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::normalize_subject;

    #[test]
    fn strips_repeated_prefixes() {
        let expected = "vat return q1";

        for subject in [
            "VAT return Q1",
            "Re: VAT return Q1",
            "RE: re: Fwd: VAT return Q1",
            "Fw:   VAT   return\tQ1 ",
            "AW: WG: VAT return Q1",
            "Re[2]: VAT return Q1",
            "[EXTERNAL] Re: [Ticket #4] VAT return Q1",
        ] {
            assert_eq!(normalize_subject(subject), expected, "subject: {subject}");
        }
    }

    #[test]
    fn keeps_inner_prefixes() {
        assert_eq!(normalize_subject("About re: filings"), "about re: filings");
        assert_eq!(normalize_subject("Reminder: filings"), "reminder: filings");
    }

    #[test]
    fn empty_subject() {
        assert_eq!(normalize_subject(""), "");
        assert_eq!(normalize_subject("Re: "), "");
    }
}
