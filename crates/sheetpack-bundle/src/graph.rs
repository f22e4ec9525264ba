//! Module graph construction.

use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;

use sheetpack_loaders::{
    CoverageError, EmittedAsset, LoadedModule, LoaderContext, LoaderError, Source,
};
use sheetpack_resolve::Resolver;

use crate::builder::BuildError;
use crate::config::PipelineConfig;
use crate::linker::link;

/// A fully loaded and linked module.
#[derive(Debug, Clone)]
pub struct Module {
    /// Root-relative id, e.g. `./src/index.js`
    pub id: String,

    pub path: PathBuf,

    /// Linked function body
    pub body: String,

    /// Source map of the body below its header line
    pub map: Option<String>,

    /// Extracted CSS
    pub css: Option<String>,

    pub assets: Vec<EmittedAsset>,

    /// Ids of the modules this one references, in source order
    pub dependencies: Vec<String>,
}

/// Every module reachable from the entries.
#[derive(Debug, Default)]
pub struct ModuleGraph {
    modules: BTreeMap<String, Module>,
    entries: Vec<String>,
}

impl ModuleGraph {
    /// Load the graph breadth-first. Modules of one frontier go through their
    /// loader chains in parallel; the first failing module, in frontier
    /// order, aborts the build.
    pub fn build(
        config: &PipelineConfig,
        resolver: &Resolver,
        hot: bool,
    ) -> Result<Self, BuildError> {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut entries = Vec::new();
        let mut frontier = Vec::new();

        for specifier in &config.entries {
            let path = resolver.resolve(specifier, &config.context)?;
            entries.push(config.module_id(&path));
            if seen.insert(path.clone()) {
                frontier.push(path);
            }
        }

        let mut modules = BTreeMap::new();

        while !frontier.is_empty() {
            let results: Vec<Result<(Module, Vec<PathBuf>), BuildError>> = frontier
                .par_iter()
                .map(|path| load_module(config, resolver, path, hot))
                .collect();

            let mut next = Vec::new();
            for result in results {
                let (module, dependencies) = result?;
                for dependency in dependencies {
                    if seen.insert(dependency.clone()) {
                        next.push(dependency);
                    }
                }
                modules.insert(module.id.clone(), module);
            }

            tracing::debug!("loaded {} modules, {} queued", modules.len(), next.len());
            frontier = next;
        }

        Ok(Self { modules, entries })
    }

    /// Modules in id order.
    pub fn modules(&self) -> impl Iterator<Item = &Module> {
        self.modules.values()
    }

    pub fn get(&self, id: &str) -> Option<&Module> {
        self.modules.get(id)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Modules in evaluation order: depth-first from the entries, each
    /// module after its dependencies. This is the order stylesheets apply in.
    pub fn evaluation_order(&self) -> Vec<&Module> {
        let mut visited = HashSet::new();
        let mut order = Vec::new();
        for entry in &self.entries {
            self.visit(entry, &mut visited, &mut order);
        }
        order
    }

    fn visit<'g>(&'g self, id: &str, visited: &mut HashSet<String>, order: &mut Vec<&'g Module>) {
        if !visited.insert(id.to_string()) {
            return;
        }
        let Some(module) = self.modules.get(id) else {
            return;
        };
        for dependency in &module.dependencies {
            self.visit(dependency, visited, order);
        }
        order.push(module);
    }

    /// Assets emitted by loaders, one per name.
    pub fn assets(&self) -> BTreeMap<&str, &EmittedAsset> {
        self.modules
            .values()
            .flat_map(|m| m.assets.iter())
            .map(|asset| (asset.name.as_str(), asset))
            .collect()
    }
}

fn load_module(
    config: &PipelineConfig,
    resolver: &Resolver,
    path: &Path,
    hot: bool,
) -> Result<(Module, Vec<PathBuf>), BuildError> {
    let id = config.module_id(path);
    let bytes = fs::read(path).map_err(|e| BuildError::ReadError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let ctx = LoaderContext {
        resource: path,
        context_dir: &config.context,
        source_map: config.source_maps(),
        hot,
        options: &config.loaders,
    };

    let loaded = match config.rules.find(path) {
        Some(rule) => {
            tracing::trace!("{} -> {}", id, rule.name);
            rule.apply(LoadedModule::from_bytes(bytes), &ctx)?
        }
        None => builtin(path, bytes)?,
    };

    let code = match &loaded.source {
        Source::Text(text) => text,
        Source::Binary(_) => return Err(LoaderError::Encoding(path.to_path_buf()).into()),
    };

    let dir = path.parent().unwrap_or(&config.context);
    let mut dependencies = Vec::new();
    let mut dependency_ids = Vec::new();

    let linked = link(code, path, |specifier| {
        let resolved = resolver.resolve(specifier, dir)?;
        let dependency_id = config.module_id(&resolved);
        dependency_ids.push(dependency_id.clone());
        dependencies.push(resolved);
        Ok(dependency_id)
    })?;

    let module = Module {
        id,
        path: path.to_path_buf(),
        body: linked.body,
        map: loaded.map,
        css: loaded.css,
        assets: loaded.assets,
        dependencies: dependency_ids,
    };

    Ok((module, dependencies))
}

/// Modules no rule claims: plain scripts and JSON from dependencies.
fn builtin(path: &Path, bytes: Vec<u8>) -> Result<LoadedModule, BuildError> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match extension.as_deref() {
        Some("js" | "mjs" | "cjs") => Ok(LoadedModule::from_bytes(bytes)),
        Some("json") => {
            serde_json::from_slice::<serde_json::Value>(&bytes).map_err(|e| {
                LoaderError::Transform {
                    loader: "json",
                    path: path.to_path_buf(),
                    message: e.to_string(),
                }
            })?;
            let mut module = LoadedModule::from_bytes(bytes);
            let text = module.take_text(path)?;
            module.source = Source::Text(format!("module.exports = {};\n", text.trim_end()));
            Ok(module)
        }
        _ => Err(CoverageError::Unhandled(path.to_path_buf()).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Mode;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn project(root: &Path) -> PipelineConfig {
        write(root, "src/index.html", "<html><head></head><body></body></html>");
        write(root, "src/favicon.ico", "icon");
        write(root, "src/core/dom.js", "export const $ = (s) => s;\n");
        write(root, "src/scss/index.scss", ".excel { color: red; }\n");
        write(
            root,
            "src/index.js",
            "import {$} from '@core/dom';\nimport './scss/index.scss';\nimport data from './data.json';\nconsole.log($, data);\n",
        );
        write(root, "src/data.json", "{\"rows\": 20}\n");
        write(root, "node_modules/@babel/polyfill/package.json", "{\"main\": \"lib/index.js\"}");
        write(
            root,
            "node_modules/@babel/polyfill/lib/index.js",
            "require('./noConflict');\n",
        );
        write(root, "node_modules/@babel/polyfill/lib/noConflict.js", "module.exports = {};\n");

        PipelineConfig::new(root, Mode::Development)
    }

    fn resolver(config: &PipelineConfig) -> Resolver {
        Resolver::new(config.aliases.clone(), config.extensions.clone())
    }

    #[test]
    fn loads_every_reachable_module() {
        let temp = tempdir().unwrap();
        let config = project(temp.path());
        let graph = ModuleGraph::build(&config, &resolver(&config), false).unwrap();

        let ids: Vec<&str> = graph.modules().map(|m| m.id.as_str()).collect();
        assert_eq!(
            ids,
            vec![
                "./node_modules/@babel/polyfill/lib/index.js",
                "./node_modules/@babel/polyfill/lib/noConflict.js",
                "./src/core/dom.js",
                "./src/data.json",
                "./src/index.js",
                "./src/scss/index.scss",
            ]
        );
        assert_eq!(
            graph.entries(),
            &["./node_modules/@babel/polyfill/lib/index.js", "./src/index.js"]
        );
        assert_eq!(
            graph.get("./src/index.js").unwrap().dependencies,
            vec!["./src/core/dom.js", "./src/scss/index.scss", "./src/data.json"]
        );
    }

    #[test]
    fn json_modules_export_their_value() {
        let temp = tempdir().unwrap();
        let config = project(temp.path());
        let graph = ModuleGraph::build(&config, &resolver(&config), false).unwrap();

        assert!(graph
            .get("./src/data.json")
            .unwrap()
            .body
            .contains("module.exports = {\"rows\": 20};"));
    }

    #[test]
    fn evaluation_order_puts_dependencies_first() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let config = project(root);
        write(root, "src/scss/base.scss", "body { margin: 0; }\n");
        write(
            root,
            "src/index.js",
            "import './scss/base.scss';\nimport './scss/index.scss';\n",
        );

        let graph = ModuleGraph::build(&config, &resolver(&config), false).unwrap();
        let css: Vec<&str> = graph
            .evaluation_order()
            .into_iter()
            .filter(|m| m.css.is_some())
            .map(|m| m.id.as_str())
            .collect();

        assert_eq!(css, vec!["./src/scss/base.scss", "./src/scss/index.scss"]);
    }

    #[test]
    fn unresolved_import_fails() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let config = project(root);
        write(root, "src/index.js", "import {Table} from '@/components/table/Table';\nnew Table();\n");

        let err = ModuleGraph::build(&config, &resolver(&config), false).unwrap_err();
        assert!(matches!(err, BuildError::Resolve(_)));
    }

    #[test]
    fn lint_errors_fail_the_module() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let config = project(root);
        write(root, "src/index.js", "debugger;\n");

        let err = ModuleGraph::build(&config, &resolver(&config), false).unwrap_err();
        assert!(matches!(err, BuildError::Load(LoaderError::Lint { .. })));
    }

    #[test]
    fn unknown_dependency_types_are_rejected() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        let config = project(root);
        write(root, "node_modules/widget/index.js", "require('./widget.ts');\n");
        write(root, "node_modules/widget/widget.ts", "export {};\n");
        write(root, "src/index.js", "import 'widget';\n");

        let err = ModuleGraph::build(&config, &resolver(&config), false).unwrap_err();
        assert!(matches!(err, BuildError::Coverage(CoverageError::Unhandled(_))));
    }
}
