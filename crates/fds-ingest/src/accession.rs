//! Accession resolution through an ordered pattern cascade
//!
//! Patterns are tried in configuration order and the first match wins.
//! Each pattern compiles independently the first time it is needed; a
//! pattern that fails to compile is logged once and then treated as
//! "no match" for every path, so the cascade always moves on.

use crate::config::{normalize_pattern, IngestConfig};
use regex::Regex;
use std::sync::OnceLock;
use tracing::{trace, warn};

struct PatternSlot {
    source: String,
    compiled: OnceLock<Result<Regex, regex::Error>>,
}

impl PatternSlot {
    fn new(source: String) -> Self {
        Self {
            source,
            compiled: OnceLock::new(),
        }
    }

    fn compiled(&self) -> &Result<Regex, regex::Error> {
        self.compiled.get_or_init(|| {
            Regex::new(&self.source).inspect_err(|e| {
                warn!(
                    pattern = %self.source,
                    error = %e,
                    "Accession pattern failed to compile, skipping it"
                );
            })
        })
    }

    fn find<'p>(&self, path: &'p str) -> Option<&'p str> {
        match self.compiled() {
            Ok(regex) => regex.find(path).map(|m| m.as_str()),
            Err(_) => {
                trace!(pattern = %self.source, "Skipping uncompilable pattern");
                None
            },
        }
    }
}

/// First-match-wins accession extractor
pub struct AccessionResolver {
    patterns: Vec<PatternSlot>,
}

impl AccessionResolver {
    /// Build a resolver from raw patterns, normalizing their escaping
    pub fn new<I>(patterns: I) -> Self
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| PatternSlot::new(normalize_pattern(p.as_ref())))
                .collect(),
        }
    }

    /// Build a resolver from an already-normalized configuration
    pub fn from_config(config: &IngestConfig) -> Self {
        Self {
            patterns: config
                .accession_patterns()
                .iter()
                .cloned()
                .map(PatternSlot::new)
                .collect(),
        }
    }

    /// Return the text matched by the first pattern that matches `path`.
    ///
    /// An empty cascade always resolves to `None`.
    pub fn resolve<'p>(&self, path: &'p str) -> Option<&'p str> {
        self.patterns.iter().find_map(|slot| slot.find(path))
    }

    /// Patterns that fail to compile, with the compiler's message
    pub fn invalid_patterns(&self) -> Vec<(&str, String)> {
        self.patterns
            .iter()
            .filter_map(|slot| match slot.compiled() {
                Ok(_) => None,
                Err(e) => Some((slot.source.as_str(), e.to_string())),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

impl std::fmt::Debug for AccessionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.patterns.iter().map(|slot| &slot.source))
            .finish()
    }
}
