//! Path alias table.

use std::path::{Path, PathBuf};

use crate::resolver::ResolveError;

/// Maps short symbolic prefixes (`@`, `@core`) to absolute directories.
///
/// Aliases are matched in declaration order. A prefix only matches when the
/// specifier is the prefix itself or continues with a `/`, so `@` never
/// captures `@core/dom`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AliasTable {
    entries: Vec<(String, PathBuf)>,
}

impl AliasTable {
    /// Create an empty alias table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an alias. Later duplicates replace the earlier target in place.
    pub fn insert(&mut self, alias: impl Into<String>, target: impl Into<PathBuf>) {
        let alias = alias.into();
        let target = target.into();

        if let Some(entry) = self.entries.iter_mut().find(|(a, _)| *a == alias) {
            entry.1 = target;
        } else {
            self.entries.push((alias, target));
        }
    }

    /// Builder-style [`AliasTable::insert`].
    pub fn with(mut self, alias: impl Into<String>, target: impl Into<PathBuf>) -> Self {
        self.insert(alias, target);
        self
    }

    /// Rewrite a specifier through the first matching alias.
    pub fn apply(&self, specifier: &str) -> Option<PathBuf> {
        for (alias, target) in &self.entries {
            if specifier == alias {
                tracing::trace!("matched alias: {}={}", alias, target.display());
                return Some(target.clone());
            }

            if let Some(rest) = specifier
                .strip_prefix(alias.as_str())
                .and_then(|rest| rest.strip_prefix('/'))
            {
                tracing::trace!("matched alias: {}={}", alias, target.display());
                return Some(target.join(rest));
            }
        }

        None
    }

    /// Check that every alias points at an existing directory.
    pub fn validate(&self) -> Result<(), ResolveError> {
        for (alias, target) in &self.entries {
            if !target.is_dir() {
                return Err(ResolveError::AliasTargetMissing {
                    alias: alias.clone(),
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }

    /// Iterate over `(alias, target)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.entries.iter().map(|(a, t)| (a.as_str(), t.as_path()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
