//! Trait definitions shared by all loaders.

use std::path::{Path, PathBuf};

use crate::lint::{LintConfig, LintDiagnostic};

/// Options shared by every loader in a build.
#[derive(Debug, Clone)]
pub struct LoaderOptions {
    /// Lint rule severities
    pub lint: LintConfig,

    /// Syntax lowering target (e.g. "es2015")
    pub target: String,

    /// Minify extracted CSS
    pub minify_css: bool,

    /// URL prefix for emitted assets
    pub public_path: String,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            lint: LintConfig::default(),
            target: "es2015".to_string(),
            minify_css: false,
            public_path: String::new(),
        }
    }
}

/// Per-module context handed to each loader.
#[derive(Debug, Clone, Copy)]
pub struct LoaderContext<'a> {
    /// Absolute path of the module being loaded
    pub resource: &'a Path,

    /// Source root of the project
    pub context_dir: &'a Path,

    /// Produce source maps
    pub source_map: bool,

    /// Hot updates are active
    pub hot: bool,

    pub options: &'a LoaderOptions,
}

/// Module contents as they move through a loader chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Source {
    Text(String),
    Binary(Vec<u8>),
}

impl Source {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Source::Text(text) => text.as_bytes(),
            Source::Binary(bytes) => bytes,
        }
    }
}

/// A file emitted next to the bundles (images, fonts).
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedAsset {
    /// Output filename relative to the destination directory
    pub name: String,

    pub bytes: Vec<u8>,
}

/// The state of a module between loaders, and the final result of its chain.
#[derive(Debug, Clone)]
pub struct LoadedModule {
    /// Current contents; JavaScript once the chain has finished
    pub source: Source,

    /// JSON source map for `source`, when one was produced
    pub map: Option<String>,

    /// CSS extracted from this module
    pub css: Option<String>,

    /// Assets to write alongside the bundles
    pub assets: Vec<EmittedAsset>,
}

impl LoadedModule {
    /// Wrap raw file contents, decoding UTF-8 when possible.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let source = match String::from_utf8(bytes) {
            Ok(text) => Source::Text(text),
            Err(e) => Source::Binary(e.into_bytes()),
        };

        Self {
            source,
            map: None,
            css: None,
            assets: Vec::new(),
        }
    }

    /// Take the text contents or fail with an encoding error.
    pub fn take_text(&mut self, resource: &Path) -> Result<String, LoaderError> {
        match std::mem::replace(&mut self.source, Source::Text(String::new())) {
            Source::Text(text) => Ok(text),
            Source::Binary(_) => Err(LoaderError::Encoding(resource.to_path_buf())),
        }
    }

    /// The text contents, if any.
    pub fn text(&self) -> Option<&str> {
        match &self.source {
            Source::Text(text) => Some(text),
            Source::Binary(_) => None,
        }
    }
}

/// Errors that can occur while loading a module.
#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("[{loader}] {}: {message}", .path.display())]
    Transform {
        loader: &'static str,
        path: PathBuf,
        message: String,
    },

    #[error("Lint errors in {}:\n{}", .path.display(), format_diagnostics(.path, .diagnostics))]
    Lint {
        path: PathBuf,
        diagnostics: Vec<LintDiagnostic>,
    },

    #[error("Cannot resolve '{specifier}' referenced from {}", .path.display())]
    Resolve { path: PathBuf, specifier: String },

    #[error("{} is not valid UTF-8", .0.display())]
    Encoding(PathBuf),

    #[error("Failed to read {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

impl LoaderError {
    pub(crate) fn transform(loader: &'static str, path: &Path, message: impl ToString) -> Self {
        LoaderError::Transform {
            loader,
            path: path.to_path_buf(),
            message: message.to_string(),
        }
    }

    /// Whether the failure came from the lint step.
    pub fn is_lint(&self) -> bool {
        matches!(self, LoaderError::Lint { .. })
    }
}

fn format_diagnostics(path: &Path, diagnostics: &[LintDiagnostic]) -> String {
    diagnostics
        .iter()
        .map(|d| format!("  {}:{}", path.display(), d))
        .collect::<Vec<_>>()
        .join("\n")
}

/// A single step in a rule's chain.
pub trait Loader: Send + Sync {
    /// Loader identifier used in logs and errors (e.g. "sass", "transpile")
    fn name(&self) -> &'static str;

    /// Transform the module produced by the previous loader.
    fn run(&self, input: LoadedModule, ctx: &LoaderContext<'_>)
        -> Result<LoadedModule, LoaderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_text_and_keeps_binary() {
        let text = LoadedModule::from_bytes(b"export default 1;".to_vec());
        assert_eq!(text.text(), Some("export default 1;"));

        let binary = LoadedModule::from_bytes(vec![0, 159, 146, 150]);
        assert!(matches!(binary.source, Source::Binary(_)));
    }

    #[test]
    fn take_text_rejects_binary() {
        let mut module = LoadedModule::from_bytes(vec![0xff, 0xfe]);
        let err = module.take_text(Path::new("favicon.ico")).unwrap_err();

        assert!(matches!(err, LoaderError::Encoding(_)));
    }
}
