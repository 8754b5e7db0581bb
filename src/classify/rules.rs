//! User-supplied path-glob → label rules.
//!
//! Rule files are TOML with one `[[rule]]` table per entry:
//!
//! ```toml
//! [[rule]]
//! glob = "docs/**"
//! label = "docs"
//! ```
//!
//! Rules are ordered and the first match wins.

use std::path::Path;

use glob::{MatchOptions, Pattern};
use serde::Deserialize;

use crate::error::{ClassifyError, ConfigError};

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RuleFile {
    #[serde(default, rename = "rule")]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawRule {
    glob: String,
    label: String,
}

#[derive(Debug, Clone)]
pub struct Rule {
    pattern: Pattern,
    label: String,
}

impl Rule {
    pub fn pattern(&self) -> &str {
        self.pattern.as_str()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn matches(&self, path: &str) -> bool {
        self.pattern.matches_with(path, MATCH_OPTIONS)
    }
}

/// Ordered rule list.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build from `(glob, label)` pairs; indices in errors are 1-based.
    pub fn from_pairs<'a>(
        pairs: impl IntoIterator<Item = (&'a str, &'a str)>,
    ) -> Result<Self, ConfigError> {
        let mut rules = Vec::new();
        for (i, (glob, label)) in pairs.into_iter().enumerate() {
            let index = i + 1;
            let glob = glob.trim();
            let label = label.trim();
            if glob.is_empty() {
                return Err(ConfigError::EmptyField {
                    index,
                    field: "glob",
                });
            }
            if label.is_empty() {
                return Err(ConfigError::EmptyField {
                    index,
                    field: "label",
                });
            }
            let pattern = Pattern::new(glob).map_err(|source| ConfigError::InvalidGlob {
                index,
                glob: glob.to_string(),
                source,
            })?;
            rules.push(Rule {
                pattern,
                label: label.to_string(),
            });
        }
        Ok(Self { rules })
    }

    /// Load and validate a rule file. Malformed entries fail here, never later.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::ReadRules {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, path)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let file: RuleFile = toml::from_str(text).map_err(|source| ConfigError::ParseRules {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_pairs(
            file.rules
                .iter()
                .map(|r| (r.glob.as_str(), r.label.as_str())),
        )
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First rule matching `path`.
    ///
    /// Fails when two rules with the same pattern both match and disagree on
    /// the label. Overlapping but different patterns are resolved by order.
    pub fn resolve(&self, path: &str) -> Result<Option<&Rule>, ClassifyError> {
        let matching: Vec<&Rule> = self.rules.iter().filter(|r| r.matches(path)).collect();

        for (i, a) in matching.iter().enumerate() {
            if let Some(b) = matching[i + 1..]
                .iter()
                .find(|b| b.pattern() == a.pattern() && b.label != a.label)
            {
                return Err(ClassifyError::Ambiguous {
                    path: path.to_string(),
                    pattern: a.pattern().to_string(),
                    first: a.label.clone(),
                    second: b.label.clone(),
                });
            }
        }

        Ok(matching.first().copied())
    }
}
