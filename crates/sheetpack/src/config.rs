//! Configuration file structure (sheetpack.toml).
//!
//! Every field is optional; the defaults reproduce the spreadsheet project's
//! layout, so most projects need no config file at all.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use sheetpack_bundle::{CopyPattern, Mode, PipelineConfig};
use sheetpack_loaders::Severity;
use sheetpack_resolve::AliasTable;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    #[serde(default)]
    project: ProjectConfig,
    #[serde(default = "default_aliases")]
    aliases: BTreeMap<String, String>,
    #[serde(default)]
    html: HtmlConfig,
    #[serde(default = "default_copy")]
    copy: Vec<CopyConfig>,
    #[serde(default)]
    lint: BTreeMap<String, Severity>,
    #[serde(default)]
    transpile: TranspileConfig,
    #[serde(default)]
    css: CssConfig,
    #[serde(default)]
    dev_server: DevServerConfig,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ProjectConfig {
    #[serde(default = "default_root")]
    root: String,
    #[serde(default = "default_context")]
    context: String,
    #[serde(default = "default_output")]
    output: String,
    #[serde(default = "default_entries")]
    entries: Vec<String>,
    #[serde(default = "default_extensions")]
    extensions: Vec<String>,
    #[serde(default)]
    public_path: String,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            context: default_context(),
            output: default_output(),
            entries: default_entries(),
            extensions: default_extensions(),
            public_path: String::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct HtmlConfig {
    #[serde(default = "default_title")]
    title: String,
    #[serde(default = "default_template")]
    template: String,
    #[serde(default = "default_template")]
    filename: String,
}

impl Default for HtmlConfig {
    fn default() -> Self {
        Self {
            title: default_title(),
            template: default_template(),
            filename: default_template(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CopyConfig {
    from: String,
    #[serde(default)]
    to: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TranspileConfig {
    #[serde(default = "default_target")]
    target: String,
}

impl Default for TranspileConfig {
    fn default() -> Self {
        Self {
            target: default_target(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CssConfig {
    #[serde(default)]
    minify: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct DevServerConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_true")]
    open: bool,
    #[serde(default = "default_true")]
    compress: bool,
    #[serde(default = "default_true")]
    hot: bool,
}

impl Default for DevServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            open: true,
            compress: true,
            hot: true,
        }
    }
}

fn default_root() -> String {
    ".".to_string()
}
fn default_context() -> String {
    "src".to_string()
}
fn default_output() -> String {
    "dist".to_string()
}
fn default_entries() -> Vec<String> {
    vec!["@babel/polyfill".to_string(), "./index.js".to_string()]
}
fn default_extensions() -> Vec<String> {
    vec![".js".to_string()]
}
fn default_aliases() -> BTreeMap<String, String> {
    BTreeMap::from([
        ("@".to_string(), "src".to_string()),
        ("@core".to_string(), "src/core".to_string()),
    ])
}
fn default_title() -> String {
    "Pure JavaScript Excel".to_string()
}
fn default_template() -> String {
    "index.html".to_string()
}
fn default_copy() -> Vec<CopyConfig> {
    vec![CopyConfig {
        from: "src/favicon.ico".to_string(),
        to: String::new(),
    }]
}
fn default_target() -> String {
    "es2015".to_string()
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_true() -> bool {
    true
}

impl ConfigFile {
    /// Load configuration from `path` if it exists.
    /// Returns an error if the config file exists but is malformed.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("{} not found, using defaults", path.display());
            return Ok(Self::parse("")?);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Resolve paths against `base` (the config file's directory) and build
    /// the pipeline configuration for `mode`.
    pub fn into_pipeline(self, base: &Path, mode: Mode) -> PipelineConfig {
        let root = normalize(base.join(&self.project.root));
        let mut config = PipelineConfig::new(&root, mode);

        config.context = root.join(&self.project.context);
        config.output.dir = root.join(&self.project.output);
        config.entries = self.project.entries;
        config.extensions = self.project.extensions;

        let mut aliases = AliasTable::new();
        for (alias, target) in self.aliases {
            aliases.insert(alias, root.join(target));
        }
        config.aliases = aliases;

        config.html.title = self.html.title;
        config.html.template = PathBuf::from(self.html.template);
        config.html.filename = self.html.filename;

        config.copy = self
            .copy
            .into_iter()
            .map(|c| CopyPattern {
                from: root.join(c.from),
                to: PathBuf::from(c.to),
            })
            .collect();

        config.loaders.lint = config.loaders.lint.merge(self.lint);
        config.loaders.target = self.transpile.target;
        config.loaders.minify_css = self.css.minify;
        config.loaders.public_path = self.project.public_path;

        config.dev_server.host = self.dev_server.host;
        config.dev_server.port = self.dev_server.port;
        config.dev_server.open = self.dev_server.open;
        config.dev_server.compress = self.dev_server.compress;
        config.dev_server.hot = self.dev_server.hot;

        config
    }
}

/// Load `path` and build the pipeline configuration.
pub fn load_pipeline(path: &Path, mode: Mode) -> Result<PipelineConfig> {
    let file = ConfigFile::load(path)?;
    let base = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("Failed to read current directory")?,
    };
    let base = if base.is_absolute() {
        base
    } else {
        std::env::current_dir()
            .context("Failed to read current directory")?
            .join(base)
    };
    Ok(file.into_pipeline(&base, mode))
}

fn normalize(path: PathBuf) -> PathBuf {
    sheetpack_resolve::normalize_path(&path)
}
