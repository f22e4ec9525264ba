//! Node-style module resolution.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::alias::AliasTable;

const MODULES_DIR: &str = "node_modules";

/// Errors that can occur while resolving a specifier.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("Module not found: '{specifier}' (imported from {})", .from.display())]
    NotFound { specifier: String, from: PathBuf },

    #[error("Alias '{alias}' points to a missing directory: {}", .target.display())]
    AliasTargetMissing { alias: String, target: PathBuf },

    #[error("Invalid package.json in {}: {message}", .path.display())]
    InvalidPackage { path: PathBuf, message: String },
}

/// Resolves import specifiers to absolute file paths.
#[derive(Debug, Clone)]
pub struct Resolver {
    aliases: AliasTable,
    extensions: Vec<String>,
}

impl Resolver {
    /// Create a resolver with the given aliases and extensions to try
    /// (each including the leading dot, e.g. `.js`).
    pub fn new(aliases: AliasTable, extensions: Vec<String>) -> Self {
        Self {
            aliases,
            extensions,
        }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Resolve `specifier` as imported from a module in `from_dir`.
    pub fn resolve(&self, specifier: &str, from_dir: &Path) -> Result<PathBuf, ResolveError> {
        let not_found = || ResolveError::NotFound {
            specifier: specifier.to_string(),
            from: from_dir.to_path_buf(),
        };

        if let Some(aliased) = self.aliases.apply(specifier) {
            return self.load_path(&aliased)?.ok_or_else(not_found);
        }

        if is_path_like(specifier) {
            let candidate = normalize_path(&from_dir.join(specifier));
            return self.load_path(&candidate)?.ok_or_else(not_found);
        }

        self.load_package(specifier, from_dir)?.ok_or_else(not_found)
    }

    /// Try a path as a file, then as a directory.
    fn load_path(&self, path: &Path) -> Result<Option<PathBuf>, ResolveError> {
        let path = normalize_path(path);
        if let Some(file) = self.load_as_file(&path) {
            return Ok(Some(file));
        }
        self.load_as_directory(&path)
    }

    fn load_as_file(&self, path: &Path) -> Option<PathBuf> {
        if path.is_file() {
            return Some(path.to_path_buf());
        }

        self.extensions.iter().find_map(|ext| {
            let mut candidate = path.as_os_str().to_owned();
            candidate.push(ext);
            let candidate = PathBuf::from(candidate);
            candidate.is_file().then_some(candidate)
        })
    }

    fn load_as_directory(&self, dir: &Path) -> Result<Option<PathBuf>, ResolveError> {
        if !dir.is_dir() {
            return Ok(None);
        }

        if let Some(main) = read_package_main(dir)? {
            let main_path = normalize_path(&dir.join(main));
            if let Some(file) = self.load_as_file(&main_path) {
                return Ok(Some(file));
            }
            if let Some(index) = self.load_index(&main_path) {
                return Ok(Some(index));
            }
        }

        Ok(self.load_index(dir))
    }

    fn load_index(&self, dir: &Path) -> Option<PathBuf> {
        self.load_as_file(&dir.join("index"))
    }

    /// Walk up from `from_dir` looking for the package in `node_modules`.
    fn load_package(
        &self,
        specifier: &str,
        from_dir: &Path,
    ) -> Result<Option<PathBuf>, ResolveError> {
        for dir in from_dir.ancestors() {
            let modules = dir.join(MODULES_DIR);
            if !modules.is_dir() {
                continue;
            }

            let candidate = modules.join(specifier);
            if let Some(found) = self.load_path(&candidate)? {
                tracing::trace!("resolved package {} -> {}", specifier, found.display());
                return Ok(Some(found));
            }
        }
        Ok(None)
    }
}

fn is_path_like(specifier: &str) -> bool {
    specifier == "."
        || specifier == ".."
        || specifier.starts_with("./")
        || specifier.starts_with("../")
        || Path::new(specifier).is_absolute()
}

fn read_package_main(dir: &Path) -> Result<Option<String>, ResolveError> {
    let manifest = dir.join("package.json");
    if !manifest.is_file() {
        return Ok(None);
    }

    let invalid = |message: String| ResolveError::InvalidPackage {
        path: manifest.clone(),
        message,
    };

    let content = fs::read_to_string(&manifest).map_err(|e| invalid(e.to_string()))?;
    let value: serde_json::Value =
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))?;

    Ok(value
        .get("main")
        .and_then(|m| m.as_str())
        .filter(|m| !m.is_empty())
        .map(str::to_string))
}

/// Lexically normalize a path, folding `.` and `..` components.
pub fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !normalized.pop() {
                    normalized.push("..");
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}
