//! Ordered chain of named regex filters.
//!
//! Each candidate is tested against the filters in configured order; the
//! first match rejects it under that filter's name and later filters never
//! see it. Matching is a search anywhere in the text unless the pattern
//! anchors itself.

use anyhow::{Context, Result};
use regex::{Regex, RegexBuilder};

use tally_common::config::{FilterSpec, RegexFlag};
use tally_common::Candidate;

pub struct RegexFilter {
    pub name: String,
    regex: Regex,
}

impl RegexFilter {
    pub fn from_spec(spec: &FilterSpec) -> Result<Self> {
        let mut builder = RegexBuilder::new(&spec.pattern);
        for flag in &spec.flags {
            match flag {
                RegexFlag::Ignorecase => builder.case_insensitive(true),
                RegexFlag::Dotall => builder.dot_matches_new_line(true),
                RegexFlag::Multiline => builder.multi_line(true),
                RegexFlag::Verbose => builder.ignore_whitespace(true),
                RegexFlag::Unicode => builder.unicode(true),
            };
        }
        let regex = builder
            .build()
            .with_context(|| format!("Invalid pattern for filter {}", spec.name))?;
        Ok(Self {
            name: spec.name.clone(),
            regex,
        })
    }

    pub fn matches(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }
}

/// Survivors plus the rejects grouped per filter, in chain order.
#[derive(Debug, Default)]
pub struct FilterOutcome {
    pub survivors: Vec<Candidate>,
    pub rejected: Vec<(String, Vec<Candidate>)>,
}

impl FilterOutcome {
    pub fn rejected_count(&self) -> usize {
        self.rejected.iter().map(|(_, c)| c.len()).sum()
    }
}

pub struct FilterChain {
    filters: Vec<RegexFilter>,
}

impl FilterChain {
    pub fn from_specs(specs: &[FilterSpec]) -> Result<Self> {
        let filters = specs
            .iter()
            .map(RegexFilter::from_spec)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { filters })
    }

    /// Name of the first filter matching `text`.
    pub fn first_match(&self, text: &str) -> Option<&str> {
        self.filters
            .iter()
            .find(|f| f.matches(text))
            .map(|f| f.name.as_str())
    }

    pub fn apply(&self, candidates: Vec<Candidate>) -> FilterOutcome {
        let mut rejected: Vec<(String, Vec<Candidate>)> = self
            .filters
            .iter()
            .map(|f| (f.name.clone(), Vec::new()))
            .collect();
        let mut survivors = Vec::new();

        for candidate in candidates {
            match self.filters.iter().position(|f| f.matches(&candidate.text)) {
                Some(i) => rejected[i].1.push(candidate),
                None => survivors.push(candidate),
            }
        }

        for (name, bucket) in &rejected {
            if !bucket.is_empty() {
                tracing::info!(filter = name.as_str(), rejected = bucket.len(), "Filter applied");
            }
        }

        FilterOutcome {
            survivors,
            rejected,
        }
    }
}
