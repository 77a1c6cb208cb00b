//! Preflight content checks.
//!
//! Input is rejected before any external call if it is too large or looks
//! like it contains credentials. Issues are reported as human-readable
//! strings; size issues always mention "size".

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

/// Outcome of a safety check.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SafetyReport {
    pub safe: bool,
    pub issues: Vec<String>,
}

/// Checks submitted content before it leaves the process.
pub trait ContentSafety: Send + Sync {
    fn check(&self, content: &str) -> SafetyReport;
}

/// Limits and secret patterns, loadable from the prompt library file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SecuritySettings {
    /// Maximum content length in characters.
    pub max_code_size: usize,
    /// Case-insensitive regexes for likely secrets.
    pub redact_patterns: Vec<String>,
}

impl Default for SecuritySettings {
    fn default() -> Self {
        Self {
            max_code_size: 50_000,
            redact_patterns: default_patterns(),
        }
    }
}

fn default_patterns() -> Vec<String> {
    [
        r"-----BEGIN [A-Z ]*PRIVATE KEY-----",
        r"AKIA[0-9A-Z]{16}",
        r#"api[_-]?key\s*[:=]\s*['"][^'"\s]{8,}['"]"#,
        r#"password\s*[:=]\s*['"][^'"]+['"]"#,
        r"bearer\s+[a-z0-9\-._~+/]{20,}=*",
    ]
    .iter()
    .map(|p| p.to_string())
    .collect()
}

/// Size limit plus regex-based secret detection.
#[derive(Debug, Clone)]
pub struct PatternSafetyChecker {
    max_code_size: usize,
    patterns: Vec<(String, Regex)>,
}

impl PatternSafetyChecker {
    /// Compiles the given patterns.
    ///
    /// # Errors
    ///
    /// Returns the first pattern that fails to compile.
    pub fn new(max_code_size: usize, patterns: &[String]) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| {
                RegexBuilder::new(p)
                    .case_insensitive(true)
                    .build()
                    .map(|re| (p.clone(), re))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            max_code_size,
            patterns,
        })
    }

    pub fn from_settings(settings: &SecuritySettings) -> Result<Self, regex::Error> {
        Self::new(settings.max_code_size, &settings.redact_patterns)
    }

    pub fn max_code_size(&self) -> usize {
        self.max_code_size
    }
}

impl Default for PatternSafetyChecker {
    fn default() -> Self {
        let settings = SecuritySettings::default();
        // The built-in patterns are known to compile.
        Self::from_settings(&settings).unwrap_or(Self {
            max_code_size: settings.max_code_size,
            patterns: Vec::new(),
        })
    }
}

impl ContentSafety for PatternSafetyChecker {
    fn check(&self, content: &str) -> SafetyReport {
        let mut issues = Vec::new();

        let size = content.chars().count();
        if size > self.max_code_size {
            issues.push(format!(
                "Code exceeds maximum size ({} > {} chars)",
                size, self.max_code_size
            ));
        }

        for (source, re) in &self.patterns {
            if re.is_match(content) {
                issues.push(format!("Found potential secret: {}", source));
            }
        }

        SafetyReport {
            safe: issues.is_empty(),
            issues,
        }
    }
}
