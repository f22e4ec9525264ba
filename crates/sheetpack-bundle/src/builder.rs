//! Production and development builds written to disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use sheetpack_loaders::{CoverageError, LoaderError};
use sheetpack_resolve::ResolveError;

use crate::compiler::{Compilation, Compiler};
use crate::config::PipelineConfig;

/// Errors that can occur during a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error(transparent)]
    Coverage(#[from] CoverageError),

    #[error(transparent)]
    Load(#[from] LoaderError),

    #[error("Failed to link {}: {message}", .path.display())]
    LinkError { path: PathBuf, message: String },

    #[error("Copy source not found: {}", .0.display())]
    CopySourceMissing(PathBuf),

    #[error("Failed to render template: {0}")]
    TemplateError(String),

    #[error("Failed to read {}: {message}", .path.display())]
    ReadError { path: PathBuf, message: String },

    #[error("Failed to write output: {0}")]
    WriteError(String),
}

/// Broad classification of build failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Resolution,
    RuleCoverage,
    Lint,
    Transform,
    Io,
}

impl BuildError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BuildError::Resolve(_) | BuildError::CopySourceMissing(_) => ErrorKind::Resolution,
            BuildError::Load(LoaderError::Resolve { .. }) => ErrorKind::Resolution,
            BuildError::Coverage(CoverageError::Io { .. }) => ErrorKind::Io,
            BuildError::Coverage(_) => ErrorKind::RuleCoverage,
            BuildError::Load(LoaderError::Lint { .. }) => ErrorKind::Lint,
            BuildError::Load(LoaderError::Io { .. }) => ErrorKind::Io,
            BuildError::Load(_) | BuildError::LinkError { .. } | BuildError::TemplateError(_) => {
                ErrorKind::Transform
            }
            BuildError::ReadError { .. } | BuildError::WriteError(_) => ErrorKind::Io,
        }
    }

    /// Lint and transform failures come from source the developer is
    /// editing; a running server reports them instead of exiting.
    pub fn is_recoverable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Lint | ErrorKind::Transform)
    }
}

/// Result of a build operation.
#[derive(Debug)]
pub struct BuildResult {
    /// Number of modules bundled
    pub modules: usize,

    /// Names of the files written, relative to the output directory
    pub artifacts: Vec<String>,

    /// Total build time in milliseconds
    pub duration_ms: u64,

    /// Output directory
    pub output_dir: PathBuf,
}

/// Builds the project into its output directory.
pub struct Builder {
    compiler: Compiler,
}

impl Builder {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        Self {
            compiler: Compiler::new(config),
        }
    }

    /// Clean the output directory, compile, then write every artifact.
    ///
    /// Nothing is written unless the whole compilation succeeds, so a failed
    /// build leaves an empty output directory.
    pub async fn build(&self) -> Result<BuildResult, BuildError> {
        let output_dir = self.compiler.config().output.dir.clone();

        clean(&output_dir).await?;

        let compiler = self.compiler.clone();
        let compilation = tokio::task::spawn_blocking(move || compiler.compile())
            .await
            .map_err(|e| BuildError::WriteError(format!("build task failed: {}", e)))??;

        let artifacts = write_compilation(&compilation, &output_dir).await?;

        Ok(BuildResult {
            modules: compilation.modules.len(),
            artifacts,
            duration_ms: compilation.duration_ms,
            output_dir,
        })
    }
}

/// Remove everything from `dir`, creating it if needed.
pub async fn clean(dir: &Path) -> Result<(), BuildError> {
    if tokio::fs::try_exists(dir).await.unwrap_or(false) {
        tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| BuildError::WriteError(format!("{}: {}", dir.display(), e)))?;
    }

    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| BuildError::WriteError(format!("{}: {}", dir.display(), e)))
}

async fn write_compilation(
    compilation: &Compilation,
    output_dir: &Path,
) -> Result<Vec<String>, BuildError> {
    let mut written = Vec::new();

    for artifact in compilation.artifacts() {
        let path = output_dir.join(&artifact.name);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| BuildError::WriteError(format!("{}: {}", parent.display(), e)))?;
        }

        tokio::fs::write(&path, &artifact.bytes)
            .await
            .map_err(|e| BuildError::WriteError(format!("{}: {}", path.display(), e)))?;

        tracing::debug!("wrote {} ({} bytes)", artifact.name, artifact.bytes.len());
        written.push(artifact.name.clone());
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use crate::testing::{write, write_project};
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn listing(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    fn named<'a>(names: &'a [String], ext: &str) -> &'a str {
        names
            .iter()
            .find(|n| n.starts_with("bundle.") && n.ends_with(ext))
            .unwrap()
    }

    async fn build(root: &Path, mode: Mode) -> Result<BuildResult, BuildError> {
        Builder::new(Arc::new(PipelineConfig::new(root, mode)))
            .build()
            .await
    }

    #[tokio::test]
    async fn production_builds_are_idempotent() {
        let temp = tempdir().unwrap();
        write_project(temp.path());
        let dist = temp.path().join("dist");

        build(temp.path(), Mode::Production).await.unwrap();
        let first = listing(&dist);

        build(temp.path(), Mode::Production).await.unwrap();
        let second = listing(&dist);

        assert_eq!(first, second);
        assert!(named(&first, ".js") != "bundle.js");
        assert!(named(&first, ".css") != "bundle.css");
    }

    #[tokio::test]
    async fn development_builds_use_plain_names() {
        let temp = tempdir().unwrap();
        write_project(temp.path());

        let result = build(temp.path(), Mode::Development).await.unwrap();
        let files = listing(&result.output_dir);

        assert!(files.contains(&"bundle.js".to_string()));
        assert!(files.contains(&"bundle.css".to_string()));
        assert!(files.contains(&"bundle.js.map".to_string()));
        assert!(files.contains(&"favicon.ico".to_string()));
        assert!(files.contains(&"index.html".to_string()));
        assert!(files
            .iter()
            .filter(|n| n.starts_with("bundle."))
            .all(|n| n == "bundle.js" || n == "bundle.css" || n == "bundle.js.map"));
    }

    #[tokio::test]
    async fn style_and_script_hashes_are_independent() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write_project(root);
        let dist = root.join("dist");

        build(root, Mode::Production).await.unwrap();
        let before = listing(&dist);

        write(root, "src/scss/index.scss", ".excel { color: blue; }\n");
        build(root, Mode::Production).await.unwrap();
        let after_style = listing(&dist);

        assert_eq!(named(&before, ".js"), named(&after_style, ".js"));
        assert_ne!(named(&before, ".css"), named(&after_style, ".css"));

        write(root, "src/core/dom.js", "export const $ = (selector) => document.querySelector(selector);\n");
        build(root, Mode::Production).await.unwrap();
        let after_script = listing(&dist);

        assert_ne!(named(&after_style, ".js"), named(&after_script, ".js"));
        assert_eq!(named(&after_style, ".css"), named(&after_script, ".css"));
    }

    #[tokio::test]
    async fn previous_artifacts_are_removed() {
        let temp = tempdir().unwrap();
        write_project(temp.path());
        write(temp.path(), "dist/stale.js", "old");

        build(temp.path(), Mode::Development).await.unwrap();

        assert!(!temp.path().join("dist/stale.js").exists());
    }

    #[tokio::test]
    async fn missing_alias_target_leaves_empty_output() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write_project(root);
        write(root, "dist/stale.js", "old");
        fs::remove_dir_all(root.join("src/core")).unwrap();
        write(root, "src/index.js", "import './scss/index.scss';\n");

        let err = build(root, Mode::Production).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert!(listing(&root.join("dist")).is_empty());
    }

    #[tokio::test]
    async fn unresolved_alias_import_leaves_empty_output() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write_project(root);
        write(root, "src/index.js", "import {Table} from '@core/Table';\nnew Table();\n");

        let err = build(root, Mode::Production).await.unwrap_err();

        assert!(matches!(err, BuildError::Resolve(_)));
        assert!(listing(&root.join("dist")).is_empty());
    }

    #[tokio::test]
    async fn unlisted_extension_fails_the_build() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        write_project(root);
        write(root, "src/components/formula.ts", "export {};\n");

        let err = build(root, Mode::Production).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RuleCoverage);
        assert!(listing(&root.join("dist")).is_empty());
    }

    #[test]
    fn lint_and_transform_errors_are_recoverable() {
        let lint = BuildError::Load(LoaderError::Lint {
            path: PathBuf::from("src/index.js"),
            diagnostics: Vec::new(),
        });
        let coverage = BuildError::Coverage(CoverageError::Unhandled(PathBuf::from("a.ts")));

        assert!(lint.is_recoverable());
        assert!(!coverage.is_recoverable());
        assert_eq!(
            BuildError::CopySourceMissing(PathBuf::from("favicon.ico")).kind(),
            ErrorKind::Resolution
        );
    }
}
