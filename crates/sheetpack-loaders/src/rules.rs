//! Rule table mapping file types to loader chains.
//!
//! Rules are evaluated in declaration order and the first match wins. The
//! coverage check walks the whole source tree once, up front, so a file type
//! without a rule is caught before any module is compiled.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::{Regex, RegexBuilder};
use walkdir::WalkDir;

use crate::asset::AssetLoader;
use crate::html::HtmlLoader;
use crate::lint::LintLoader;
use crate::script::TranspileLoader;
use crate::style::{CssLoader, ExtractCssLoader, SassLoader};
use crate::traits::{LoadedModule, Loader, LoaderContext, LoaderError};

/// One entry of the rule table.
#[derive(Clone)]
pub struct Rule {
    /// Rule identifier used in logs and errors
    pub name: String,

    test: Regex,
    exclude: Option<Regex>,
    chain: Vec<Arc<dyn Loader>>,
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Rule")
            .field("name", &self.name)
            .field("test", &self.test.as_str())
            .field("exclude", &self.exclude.as_ref().map(|r| r.as_str()))
            .field("chain", &self.chain_names())
            .finish()
    }
}

impl Rule {
    /// Create a rule matching paths against `test`.
    pub fn new(name: impl Into<String>, test: Regex) -> Self {
        Self {
            name: name.into(),
            test,
            exclude: None,
            chain: Vec::new(),
        }
    }

    /// Skip paths matching `exclude`.
    pub fn exclude(mut self, exclude: Regex) -> Self {
        self.exclude = Some(exclude);
        self
    }

    /// Append a loader to the chain.
    pub fn with_loader(mut self, loader: impl Loader + 'static) -> Self {
        self.chain.push(Arc::new(loader));
        self
    }

    /// Whether this rule applies to `path`.
    pub fn matches(&self, path: &Path) -> bool {
        let path = path_string(path);
        self.test.is_match(&path) && !self.exclude.as_ref().is_some_and(|e| e.is_match(&path))
    }

    pub fn chain_names(&self) -> Vec<&'static str> {
        self.chain.iter().map(|l| l.name()).collect()
    }

    /// Run the chain in order, each loader receiving the previous output.
    pub fn apply(
        &self,
        input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        self.chain.iter().try_fold(input, |module, loader| {
            tracing::trace!("{} <- {}", ctx.resource.display(), loader.name());
            loader.run(module, ctx)
        })
    }
}

/// Errors found while checking that every source file has exactly one rule.
#[derive(Debug, thiserror::Error)]
pub enum CoverageError {
    #[error("No rule matches {}; add a rule for this file type", .0.display())]
    Unhandled(PathBuf),

    #[error("{} matches more than one rule: {}", .path.display(), .rules.join(", "))]
    Ambiguous { path: PathBuf, rules: Vec<String> },

    #[error("Failed to read source tree {}: {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

/// Ordered list of rules.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
    rules: Vec<Rule>,
}

impl RuleTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, rule: Rule) {
        self.rules.push(rule);
    }

    /// The rule table of the spreadsheet application:
    ///
    /// | test | chain |
    /// |---|---|
    /// | images and icons | asset |
    /// | `.scss` / `.sass` | sass, css, extract-css |
    /// | `.js` outside `node_modules` | lint, transpile |
    /// | `.html` | html |
    pub fn standard() -> Self {
        let mut table = Self::new();

        table.push(
            Rule::new("images", case_insensitive(r"\.(?:ico|gif|png|jpg|jpeg)$"))
                .with_loader(AssetLoader::new()),
        );
        table.push(
            Rule::new("styles", case_insensitive(r"\.s[ac]ss$"))
                .with_loader(SassLoader::new())
                .with_loader(CssLoader::new())
                .with_loader(ExtractCssLoader::new()),
        );
        table.push(
            Rule::new("scripts", pattern(r"\.js$"))
                .exclude(pattern(r"node_modules"))
                .with_loader(LintLoader::new())
                .with_loader(TranspileLoader::new()),
        );
        table.push(
            Rule::new("html", case_insensitive(r"\.html$")).with_loader(HtmlLoader::new()),
        );

        table
    }

    /// First rule matching `path`.
    pub fn find(&self, path: &Path) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches(path))
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Check that every file below `root` matches exactly one rule.
    ///
    /// Hidden files and directories are skipped. Returns the number of
    /// files checked.
    pub fn check_coverage(&self, root: &Path) -> Result<usize, CoverageError> {
        let mut checked = 0;

        let walker = WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.file_name()));

        for entry in walker {
            let entry = entry.map_err(|e| CoverageError::Io {
                path: root.to_path_buf(),
                message: e.to_string(),
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let matching: Vec<String> = self
                .rules
                .iter()
                .filter(|rule| rule.matches(path))
                .map(|rule| rule.name.clone())
                .collect();

            match matching.len() {
                0 => return Err(CoverageError::Unhandled(path.to_path_buf())),
                1 => checked += 1,
                _ => {
                    return Err(CoverageError::Ambiguous {
                        path: path.to_path_buf(),
                        rules: matching,
                    })
                }
            }
        }

        tracing::debug!("rule coverage ok for {} files", checked);
        Ok(checked)
    }
}

fn pattern(re: &str) -> Regex {
    Regex::new(re).expect("Invalid rule pattern")
}

fn case_insensitive(re: &str) -> Regex {
    RegexBuilder::new(re)
        .case_insensitive(true)
        .build()
        .expect("Invalid rule pattern")
}

fn is_hidden(name: &std::ffi::OsStr) -> bool {
    name.to_str().is_some_and(|n| n.starts_with('.'))
}

fn path_string(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
