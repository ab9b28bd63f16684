//! Unit selection predicates
//!
//! [`UnitFilter`] decides which configured units a run processes. Any
//! `Fn(&UnitDescriptor) -> bool` is a filter; [`SelectionFilter`] implements
//! the name/tag selection exposed on the command line.

use std::collections::HashSet;

use crate::UnitDescriptor;

/// Decides whether a unit is processed
pub trait UnitFilter: Send + Sync {
    /// Whether `unit` should be processed in this run
    fn should_process(&self, unit: &UnitDescriptor) -> bool;
}

impl<F> UnitFilter for F
where
    F: Fn(&UnitDescriptor) -> bool + Send + Sync,
{
    fn should_process(&self, unit: &UnitDescriptor) -> bool {
        self(unit)
    }
}

/// Name and tag based selection
///
/// Applied in this order, all comparisons case-insensitive:
/// 1. outdated units are dropped
/// 2. if `channels` is non-empty, only those names are kept
/// 3. if `types` is non-empty, only units with at least one of those tags are kept
/// 4. names in `skip` are dropped
/// 5. units with any tag in `exclude_types` are dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectionFilter {
    channels: HashSet<String>,
    skip: HashSet<String>,
    types: HashSet<String>,
    exclude_types: HashSet<String>,
}

fn normalize<I, S>(values: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    values
        .into_iter()
        .map(|v| v.as_ref().trim().to_lowercase())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Split a comma-separated CLI value into trimmed items
pub fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
        .collect()
}

impl SelectionFilter {
    /// Keep only these unit names
    pub fn with_channels<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, names: I) -> Self {
        self.channels = normalize(names);
        self
    }

    /// Drop these unit names
    pub fn with_skip<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, names: I) -> Self {
        self.skip = normalize(names);
        self
    }

    /// Keep only units carrying one of these tags
    pub fn with_types<I: IntoIterator<Item = S>, S: AsRef<str>>(mut self, tags: I) -> Self {
        self.types = normalize(tags);
        self
    }

    /// Drop units carrying any of these tags
    pub fn with_exclude_types<I: IntoIterator<Item = S>, S: AsRef<str>>(
        mut self,
        tags: I,
    ) -> Self {
        self.exclude_types = normalize(tags);
        self
    }

    fn has_any_tag(unit: &UnitDescriptor, tags: &HashSet<String>) -> bool {
        unit.tags.iter().any(|t| tags.contains(&t.to_lowercase()))
    }
}

impl UnitFilter for SelectionFilter {
    fn should_process(&self, unit: &UnitDescriptor) -> bool {
        if unit.outdated {
            return false;
        }
        let name = unit.name.to_lowercase();
        if !self.channels.is_empty() && !self.channels.contains(&name) {
            return false;
        }
        if !self.types.is_empty() && !Self::has_any_tag(unit, &self.types) {
            return false;
        }
        if self.skip.contains(&name) {
            return false;
        }
        !Self::has_any_tag(unit, &self.exclude_types)
    }
}
