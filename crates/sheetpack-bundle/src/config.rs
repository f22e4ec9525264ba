//! Build configuration.
//!
//! Everything the pipeline needs is gathered into one immutable
//! [`PipelineConfig`] at process start; the mode is read from the environment
//! exactly once, in [`Mode::from_env`].

use std::path::{Path, PathBuf};

use sheetpack_loaders::{content_hash, LoaderOptions, RuleTable};
use sheetpack_resolve::AliasTable;

/// Environment variable selecting the build mode.
pub const MODE_ENV: &str = "NODE_ENV";

/// Build mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Development,
    Production,
}

impl Mode {
    /// Read the mode from `NODE_ENV`.
    pub fn from_env() -> Self {
        Self::from_node_env(std::env::var(MODE_ENV).ok().as_deref())
    }

    /// Only the exact value `production` selects production; anything else,
    /// including an unset variable, is development.
    pub fn from_node_env(value: Option<&str>) -> Self {
        match value {
            Some("production") => Mode::Production,
            _ => Mode::Development,
        }
    }

    pub fn is_production(self) -> bool {
        self == Mode::Production
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Development => "development",
            Mode::Production => "production",
        }
    }
}

/// Kind of bundle produced by a build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Script,
    Stylesheet,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Script => "js",
            ArtifactKind::Stylesheet => "css",
        }
    }
}

/// Filename pattern and destination of the bundles.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputDescriptor {
    /// Filename stem shared by all bundles
    pub stem: String,

    /// Destination directory
    pub dir: PathBuf,
}

impl OutputDescriptor {
    /// `bundle.js` in development, `bundle.<hash>.js` in production.
    pub fn filename(&self, kind: ArtifactKind, mode: Mode, contents: &[u8]) -> String {
        match mode {
            Mode::Development => format!("{}.{}", self.stem, kind.extension()),
            Mode::Production => format!(
                "{}.{}.{}",
                self.stem,
                content_hash(contents),
                kind.extension()
            ),
        }
    }
}

/// HTML entry file settings.
#[derive(Debug, Clone, PartialEq)]
pub struct HtmlOptions {
    /// Document title passed to the template
    pub title: String,

    /// Template path relative to the context directory
    pub template: PathBuf,

    /// Output filename
    pub filename: String,
}

impl Default for HtmlOptions {
    fn default() -> Self {
        Self {
            title: "Pure JavaScript Excel".to_string(),
            template: PathBuf::from("index.html"),
            filename: "index.html".to_string(),
        }
    }
}

/// A file or directory copied verbatim into the output.
#[derive(Debug, Clone, PartialEq)]
pub struct CopyPattern {
    /// Absolute source path
    pub from: PathBuf,

    /// Destination relative to the output directory
    pub to: PathBuf,
}

/// Development server settings.
#[derive(Debug, Clone, PartialEq)]
pub struct DevServerOptions {
    pub host: String,
    pub port: u16,
    pub open: bool,
    pub compress: bool,
    pub hot: bool,
}

impl Default for DevServerOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            open: true,
            compress: true,
            hot: true,
        }
    }
}

/// Complete, immutable configuration of one pipeline invocation.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub mode: Mode,

    /// Project root; module ids are relative to it
    pub root: PathBuf,

    /// Source directory entries are resolved from
    pub context: PathBuf,

    pub output: OutputDescriptor,

    /// Entry specifiers, evaluated in order
    pub entries: Vec<String>,

    pub aliases: AliasTable,

    /// Extensions tried when a specifier has none
    pub extensions: Vec<String>,

    pub rules: RuleTable,

    pub html: HtmlOptions,

    pub copy: Vec<CopyPattern>,

    pub loaders: LoaderOptions,

    pub dev_server: DevServerOptions,
}

impl PipelineConfig {
    /// Configuration of the spreadsheet project rooted at `root`.
    pub fn new(root: impl Into<PathBuf>, mode: Mode) -> Self {
        let root = root.into();
        let context = root.join("src");
        let dist = root.join("dist");

        Self {
            mode,
            aliases: AliasTable::new()
                .with("@", context.clone())
                .with("@core", context.join("core")),
            copy: vec![CopyPattern {
                from: context.join("favicon.ico"),
                to: PathBuf::new(),
            }],
            output: OutputDescriptor {
                stem: "bundle".to_string(),
                dir: dist,
            },
            entries: vec!["@babel/polyfill".to_string(), "./index.js".to_string()],
            extensions: vec![".js".to_string()],
            rules: RuleTable::standard(),
            html: HtmlOptions::default(),
            loaders: LoaderOptions::default(),
            dev_server: DevServerOptions::default(),
            context,
            root,
        }
    }

    /// Source maps are emitted in development only.
    pub fn source_maps(&self) -> bool {
        !self.mode.is_production()
    }

    /// HTML comments are stripped and whitespace collapsed in production only.
    pub fn minify_html(&self) -> bool {
        self.mode.is_production()
    }

    pub fn template_path(&self) -> PathBuf {
        self.context.join(&self.html.template)
    }

    /// Stable id of a module: its root-relative path with a `./` prefix.
    pub fn module_id(&self, path: &Path) -> String {
        match path.strip_prefix(&self.root) {
            Ok(relative) => format!("./{}", relative.to_string_lossy().replace('\\', "/")),
            Err(_) => path.to_string_lossy().replace('\\', "/"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn mode_defaults_to_development() {
        assert_eq!(Mode::from_node_env(None), Mode::Development);
        assert_eq!(Mode::from_node_env(Some("")), Mode::Development);
        assert_eq!(Mode::from_node_env(Some("Production")), Mode::Development);
        assert_eq!(Mode::from_node_env(Some("production")), Mode::Production);
    }

    #[test]
    fn development_filenames_are_stable() {
        let output = OutputDescriptor {
            stem: "bundle".to_string(),
            dir: PathBuf::from("dist"),
        };

        assert_eq!(
            output.filename(ArtifactKind::Script, Mode::Development, b"a"),
            "bundle.js"
        );
        assert_eq!(
            output.filename(ArtifactKind::Stylesheet, Mode::Development, b"b"),
            "bundle.css"
        );
    }

    #[test]
    fn production_filenames_follow_content() {
        let output = OutputDescriptor {
            stem: "bundle".to_string(),
            dir: PathBuf::from("dist"),
        };

        let a = output.filename(ArtifactKind::Script, Mode::Production, b"a");
        let again = output.filename(ArtifactKind::Script, Mode::Production, b"a");
        let b = output.filename(ArtifactKind::Script, Mode::Production, b"b");

        assert_eq!(a, again);
        assert_ne!(a, b);
        assert!(a.starts_with("bundle."));
        assert!(a.ends_with(".js"));
        assert_eq!(a.len(), "bundle.".len() + 20 + ".js".len());
    }

    #[test]
    fn defaults_match_project_layout() {
        let config = PipelineConfig::new("/project", Mode::Development);

        assert_eq!(config.context, PathBuf::from("/project/src"));
        assert_eq!(config.output.dir, PathBuf::from("/project/dist"));
        assert_eq!(config.entries, vec!["@babel/polyfill", "./index.js"]);
        assert_eq!(config.dev_server.port, 8080);
        assert_eq!(
            config.aliases.apply("@core/dom"),
            Some(PathBuf::from("/project/src/core/dom"))
        );
        assert!(config.source_maps());
        assert!(!config.minify_html());
    }

    #[test]
    fn module_ids_are_root_relative() {
        let config = PipelineConfig::new("/project", Mode::Production);

        assert_eq!(
            config.module_id(Path::new("/project/src/index.js")),
            "./src/index.js"
        );
        assert_eq!(
            config.module_id(Path::new("/project/node_modules/@babel/polyfill/lib/index.js")),
            "./node_modules/@babel/polyfill/lib/index.js"
        );
    }
}
