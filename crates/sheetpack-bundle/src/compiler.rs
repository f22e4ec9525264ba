//! In-memory compilation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use walkdir::WalkDir;

use sheetpack_resolve::Resolver;

use crate::builder::BuildError;
use crate::config::{ArtifactKind, Mode, PipelineConfig};
use crate::graph::ModuleGraph;
use crate::html::HtmlRenderer;
use crate::runtime::{render_script, BundleModule, ModuleBodies};

/// A file of the build output, held in memory.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Path relative to the output directory, `/`-separated
    pub name: String,

    pub bytes: Vec<u8>,
}

impl Artifact {
    fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

/// The complete output of one build.
#[derive(Debug, Clone)]
pub struct Compilation {
    pub mode: Mode,

    pub html: Artifact,

    pub script: Artifact,

    /// `<script>.map`, development only
    pub source_map: Option<Artifact>,

    /// Present when at least one module contributed CSS
    pub stylesheet: Option<Artifact>,

    /// Loader-emitted and copied files
    pub assets: Vec<Artifact>,

    /// Linked module bodies by id
    pub modules: ModuleBodies,

    pub duration_ms: u64,
}

impl Compilation {
    /// Every artifact, HTML first.
    pub fn artifacts(&self) -> impl Iterator<Item = &Artifact> {
        std::iter::once(&self.html)
            .chain(std::iter::once(&self.script))
            .chain(self.source_map.iter())
            .chain(self.stylesheet.iter())
            .chain(self.assets.iter())
    }

    /// Look up an artifact by its output name.
    pub fn get(&self, name: &str) -> Option<&Artifact> {
        self.artifacts().find(|a| a.name == name)
    }
}

/// Compiles the project described by a [`PipelineConfig`].
#[derive(Debug, Clone)]
pub struct Compiler {
    config: Arc<PipelineConfig>,
    resolver: Resolver,
    hot: bool,
}

impl Compiler {
    pub fn new(config: Arc<PipelineConfig>) -> Self {
        let resolver = Resolver::new(config.aliases.clone(), config.extensions.clone());
        Self {
            config,
            resolver,
            hot: false,
        }
    }

    /// Include the hot update runtime and client.
    pub fn with_hot(mut self, hot: bool) -> Self {
        self.hot = hot;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn is_hot(&self) -> bool {
        self.hot
    }

    /// Startup checks: alias targets exist and every source file is covered
    /// by exactly one rule. Returns the number of covered files.
    pub fn validate(&self) -> Result<usize, BuildError> {
        self.config.aliases.validate()?;
        Ok(self.config.rules.check_coverage(&self.config.context)?)
    }

    /// Run the whole pipeline without touching the output directory.
    pub fn compile(&self) -> Result<Compilation, BuildError> {
        let start = Instant::now();
        let config = &*self.config;

        self.validate()?;

        let graph = ModuleGraph::build(config, &self.resolver, self.hot)?;

        let modules: Vec<BundleModule<'_>> = graph
            .modules()
            .map(|m| BundleModule {
                id: &m.id,
                body: &m.body,
                map: m.map.as_deref(),
            })
            .collect();

        // Development names are fixed, so the map name is known up front.
        let map_name = config.source_maps().then(|| {
            format!(
                "{}.map",
                config.output.filename(ArtifactKind::Script, config.mode, &[])
            )
        });

        let rendered = render_script(&modules, graph.entries(), self.hot, map_name.as_deref());
        let script_name =
            config
                .output
                .filename(ArtifactKind::Script, config.mode, rendered.code.as_bytes());
        let script = Artifact::new(script_name, rendered.code);
        let source_map = map_name.zip(rendered.map).map(|(n, m)| Artifact::new(n, m));

        let css_modules: Vec<&str> = graph
            .evaluation_order()
            .into_iter()
            .filter_map(|m| m.css.as_deref())
            .collect();
        let stylesheet = if css_modules.is_empty() {
            None
        } else {
            let css = css_modules.join("\n");
            let name = config
                .output
                .filename(ArtifactKind::Stylesheet, config.mode, css.as_bytes());
            Some(Artifact::new(name, css))
        };

        let template_path = config.template_path();
        let template = fs::read_to_string(&template_path).map_err(|e| BuildError::ReadError {
            path: template_path.clone(),
            message: e.to_string(),
        })?;
        let public = &config.loaders.public_path;
        let html = HtmlRenderer::new(template)?.render(
            &config.html.title,
            &format!("{}{}", public, script.name),
            stylesheet
                .as_ref()
                .map(|s| format!("{}{}", public, s.name))
                .as_deref(),
            config.minify_html(),
        )?;
        let html = Artifact::new(config.html.filename.clone(), html);

        let mut assets: BTreeMap<String, Artifact> = graph
            .assets()
            .into_values()
            .map(|a| (a.name.clone(), Artifact::new(a.name.clone(), a.bytes.clone())))
            .collect();
        for artifact in self.copy_patterns()? {
            assets.insert(artifact.name.clone(), artifact);
        }

        let modules = graph
            .modules()
            .map(|m| (m.id.clone(), m.body.clone()))
            .collect();

        let duration = start.elapsed();
        tracing::debug!(
            "compiled {} modules in {}ms",
            graph.len(),
            duration.as_millis()
        );

        Ok(Compilation {
            mode: config.mode,
            html,
            script,
            source_map,
            stylesheet,
            assets: assets.into_values().collect(),
            modules,
            duration_ms: duration.as_millis() as u64,
        })
    }

    fn copy_patterns(&self) -> Result<Vec<Artifact>, BuildError> {
        let mut copied = Vec::new();

        for pattern in &self.config.copy {
            if !pattern.from.exists() {
                return Err(BuildError::CopySourceMissing(pattern.from.clone()));
            }

            if pattern.from.is_file() {
                let name = pattern.from.file_name().map(PathBuf::from).unwrap_or_default();
                copied.push(read_artifact(&pattern.from, &pattern.to.join(name))?);
                continue;
            }

            for entry in WalkDir::new(&pattern.from)
                .follow_links(true)
                .into_iter()
                .filter_map(|e| e.ok())
                .filter(|e| e.file_type().is_file())
            {
                let relative = entry
                    .path()
                    .strip_prefix(&pattern.from)
                    .unwrap_or(entry.path());
                copied.push(read_artifact(entry.path(), &pattern.to.join(relative))?);
            }
        }

        Ok(copied)
    }
}

fn read_artifact(source: &Path, name: &Path) -> Result<Artifact, BuildError> {
    let bytes = fs::read(source).map_err(|e| BuildError::ReadError {
        path: source.to_path_buf(),
        message: e.to_string(),
    })?;
    Ok(Artifact::new(
        name.to_string_lossy().replace('\\', "/"),
        bytes,
    ))
}
