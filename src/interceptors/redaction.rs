//! Secret scrubbing for recorded and reported frames

use crate::config::RedactionRule;
use crate::error::{Error, Result};
use regex::Regex;
use serde_json::Value;
use std::borrow::Cow;

/// Outcome of redacting a payload
#[derive(Debug, Clone, PartialEq)]
pub struct Redacted {
    pub value: Value,
    /// Whether anything was replaced
    pub redacted: bool,
}

/// Whole-token secret redactor
pub struct Redactor {
    rules: Vec<CompiledRule>,
    enabled: bool,
}

struct CompiledRule {
    name: String,
    pattern: Regex,
    replacement: String,
}

impl Redactor {
    /// Create a redactor with the given rules
    pub fn new(rules: Vec<RedactionRule>) -> Result<Self> {
        let compiled = rules
            .into_iter()
            .map(|rule| {
                let pattern = Regex::new(&rule.pattern).map_err(|e| {
                    Error::Config(format!(
                        "Invalid regex pattern for redaction rule '{}': {}",
                        rule.name, e
                    ))
                })?;
                Ok(CompiledRule {
                    name: rule.name,
                    pattern,
                    replacement: rule.replacement,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules: compiled,
            enabled: true,
        })
    }

    /// Redactor with the built-in rules
    pub fn with_defaults() -> Result<Self> {
        Self::new(crate::config::default_redaction_rules())
    }

    /// Redactor that passes everything through
    pub fn disabled() -> Self {
        Self {
            rules: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Scrub secrets from free text
    pub fn redact_text<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if !self.enabled {
            return Cow::Borrowed(text);
        }
        let mut current: Cow<'a, str> = Cow::Borrowed(text);
        for rule in &self.rules {
            let replaced = match rule.pattern.replace_all(&current, rule.replacement.as_str()) {
                Cow::Owned(s) => Some(s),
                Cow::Borrowed(_) => None,
            };
            if let Some(s) = replaced {
                tracing::trace!(rule = %rule.name, "Redaction rule matched");
                current = Cow::Owned(s);
            }
        }
        current
    }

    /// Scrub secrets from a structured payload.
    ///
    /// The payload is serialized, scrubbed, and parsed back. If any step
    /// fails the original payload is returned unredacted.
    pub fn redact_value(&self, value: &Value) -> Redacted {
        if !self.enabled {
            return Redacted {
                value: value.clone(),
                redacted: false,
            };
        }

        let serialized = match serde_json::to_string(value) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!("Redaction skipped, payload not serializable: {}", e);
                return Redacted {
                    value: value.clone(),
                    redacted: false,
                };
            }
        };

        let scrubbed = self.redact_text(&serialized);
        if let Cow::Borrowed(_) = scrubbed {
            return Redacted {
                value: value.clone(),
                redacted: false,
            };
        }

        match serde_json::from_str(&scrubbed) {
            Ok(parsed) => Redacted {
                value: parsed,
                redacted: true,
            },
            Err(e) => {
                tracing::warn!("Redaction produced invalid JSON, passing original through: {}", e);
                Redacted {
                    value: value.clone(),
                    redacted: false,
                }
            }
        }
    }
}
