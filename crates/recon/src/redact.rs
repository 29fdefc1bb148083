//! Masking of sensitive substrings in free text.
//!
//! Applied to every `reason_code` before it is logged, previewed, or written
//! into a dispute kit. After masking the text is scanned again; any pattern
//! that still matches makes [`Redactor::redact`] fail rather than return a
//! partially masked string.

use regex::Regex;

use crate::error::ReconError;

pub const EMAIL_PLACEHOLDER: &str = "[REDACTED_EMAIL]";
pub const TOKEN_PLACEHOLDER: &str = "Bearer [REDACTED_TOKEN]";
pub const SECRET_PLACEHOLDER: &str = "[REDACTED_SECRET]";
pub const NUMBER_PLACEHOLDER: &str = "[REDACTED_NUMBER]";

struct Rule {
    name: &'static str,
    pattern: Regex,
    placeholder: &'static str,
}

pub struct Redactor {
    // Order matters: secrets contain digit runs, so they go before numbers.
    rules: Vec<Rule>,
}

const PATTERNS: [(&str, &str, &str); 4] = [
    (
        "email",
        r"(?i)[a-z0-9._%+\-]+@[a-z0-9\-]+(?:\.[a-z0-9\-]+)*\.[a-z]{2,}",
        EMAIL_PLACEHOLDER,
    ),
    (
        "bearer_token",
        r"(?i)\bbearer\s+[a-z0-9\-._~+/]+=*",
        TOKEN_PLACEHOLDER,
    ),
    (
        "secret_key",
        concat!(
            r"\b(?:",
            r"(?:sk|rk|pk)_(?:live|test)_[A-Za-z0-9]{8,}",
            r"|AKIA[0-9A-Z]{16}",
            r"|gh[pousr]_[A-Za-z0-9]{20,}",
            r"|xox[abprs]-[A-Za-z0-9\-]{10,}",
            r"|AIza[0-9A-Za-z\-_]{35}",
            r")",
        ),
        SECRET_PLACEHOLDER,
    ),
    // Card-style groups (4-4-4-n, 4-6-5) or 13+ contiguous digits. Longer runs
    // are masked whole so no tail of digits survives. Dates such as
    // `2026-01-01 2026-01-04` are not grouped that way and stay readable.
    (
        "long_number",
        r"\d{4}(?:[ \-]\d{4}){2}[ \-]\d{1,7}|\d{4}[ \-]\d{6}[ \-]\d{5}|\d{13,}",
        NUMBER_PLACEHOLDER,
    ),
];

impl Redactor {
    pub fn new() -> Result<Self, ReconError> {
        let rules = PATTERNS
            .into_iter()
            .map(|(name, pattern, placeholder)| {
                Regex::new(pattern)
                    .map(|pattern| Rule {
                        name,
                        pattern,
                        placeholder,
                    })
                    .map_err(|e| ReconError::Redaction(format!("pattern {name}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    /// Mask every sensitive substring.
    pub fn redact(&self, text: &str) -> Result<String, ReconError> {
        let mut out = text.to_string();
        for rule in &self.rules {
            out = rule.pattern.replace_all(&out, rule.placeholder).into_owned();
        }
        if let Some(rule) = self.rules.iter().find(|r| r.pattern.is_match(&out)) {
            return Err(ReconError::Redaction(format!(
                "{} pattern still present after masking",
                rule.name
            )));
        }
        Ok(out)
    }

    /// Names of the patterns that match `text`, for diagnostics.
    pub fn findings(&self, text: &str) -> Vec<&'static str> {
        self.rules
            .iter()
            .filter(|r| r.pattern.is_match(text))
            .map(|r| r.name)
            .collect()
    }
}
