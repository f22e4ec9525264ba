//! Stylesheet loaders: Sass compilation, CSS processing and extraction.

use std::fs;
use std::path::{Path, PathBuf};

use lightningcss::dependencies::{Dependency, DependencyOptions};
use lightningcss::stylesheet::{ParserOptions, PrinterOptions, StyleSheet};
use sheetpack_resolve::normalize_path;

use crate::asset::emit_asset;
use crate::traits::{LoadedModule, Loader, LoaderContext, LoaderError, Source};

/// JavaScript left in the bundle for a module whose CSS was extracted.
pub const EXTRACTED_STUB: &str = "// extracted by sheetpack\n";

const HOT_STUB: &str = "// extracted by sheetpack\nif (module.hot) {\n  module.hot.accept();\n}\n";

/// Compiles `.scss`/`.sass` to CSS with grass.
#[derive(Debug, Default)]
pub struct SassLoader;

impl SassLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for SassLoader {
    fn name(&self) -> &'static str {
        "sass"
    }

    fn run(
        &self,
        mut input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let source = input.take_text(ctx.resource)?;

        let syntax = match ctx.resource.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("sass") => grass::InputSyntax::Sass,
            _ => grass::InputSyntax::Scss,
        };

        let mut options = grass::Options::default()
            .style(grass::OutputStyle::Expanded)
            .input_syntax(syntax);
        if let Some(dir) = ctx.resource.parent() {
            options = options.load_path(dir);
        }
        options = options.load_path(ctx.context_dir);

        let css = grass::from_string(source, &options)
            .map_err(|e| LoaderError::transform("sass", ctx.resource, e))?;

        input.source = Source::Text(css);
        Ok(input)
    }
}

/// Validates and prints CSS with lightningcss, emitting `url()` assets.
#[derive(Debug, Default)]
pub struct CssLoader;

impl CssLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for CssLoader {
    fn name(&self) -> &'static str {
        "css"
    }

    fn run(
        &self,
        mut input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let source = input.take_text(ctx.resource)?;

        let stylesheet = StyleSheet::parse(
            &source,
            ParserOptions {
                filename: ctx.resource.display().to_string(),
                ..ParserOptions::default()
            },
        )
        .map_err(|e| LoaderError::transform("css", ctx.resource, e))?;

        let printed = stylesheet
            .to_css(PrinterOptions {
                minify: ctx.options.minify_css,
                analyze_dependencies: Some(DependencyOptions {
                    remove_imports: false,
                }),
                ..PrinterOptions::default()
            })
            .map_err(|e| LoaderError::transform("css", ctx.resource, e))?;

        let mut css = printed.code;

        for dependency in printed.dependencies.unwrap_or_default() {
            let Dependency::Url(url) = dependency else {
                continue;
            };

            let replacement = match local_reference(&url.url) {
                Some(reference) => {
                    let file = resolve_reference(ctx.resource, reference);
                    let bytes = fs::read(&file).map_err(|_| LoaderError::Resolve {
                        path: ctx.resource.to_path_buf(),
                        specifier: url.url.clone(),
                    })?;
                    let asset = emit_asset(&file, bytes);
                    let public = format!("{}{}", ctx.options.public_path, asset.name);
                    input.assets.push(asset);
                    public
                }
                None => url.url.clone(),
            };

            css = css.replace(&url.placeholder, &replacement.replace('"', "\\\""));
        }

        input.source = Source::Text(css);
        Ok(input)
    }
}

/// Moves CSS out of the script bundle into the stylesheet bundle.
#[derive(Debug, Default)]
pub struct ExtractCssLoader;

impl ExtractCssLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for ExtractCssLoader {
    fn name(&self) -> &'static str {
        "extract-css"
    }

    fn run(
        &self,
        mut input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let css = input.take_text(ctx.resource)?;
        let stub = if ctx.hot { HOT_STUB } else { EXTRACTED_STUB };

        input.css = Some(css);
        input.source = Source::Text(stub.to_string());
        input.map = None;
        Ok(input)
    }
}

/// Strip query and fragment from a relative `url()` target, skipping
/// anything that is not a local file reference.
fn local_reference(url: &str) -> Option<&str> {
    let is_external = url.is_empty()
        || url.starts_with('#')
        || url.starts_with('/')
        || url.starts_with("data:")
        || url.contains("://");
    if is_external {
        return None;
    }

    let end = url.find(['?', '#']).unwrap_or(url.len());
    Some(&url[..end])
}

fn resolve_reference(resource: &Path, reference: &str) -> PathBuf {
    let base = resource.parent().unwrap_or(Path::new("."));
    normalize_path(&base.join(reference))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LoaderOptions;
    use tempfile::tempdir;

    fn ctx<'a>(resource: &'a Path, root: &'a Path, options: &'a LoaderOptions) -> LoaderContext<'a> {
        LoaderContext {
            resource,
            context_dir: root,
            source_map: false,
            hot: false,
            options,
        }
    }

    #[test]
    fn compiles_scss_with_partials() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("scss")).unwrap();
        fs::write(root.join("scss/_variables.scss"), "$header-height: 34px;").unwrap();

        let resource = root.join("scss/index.scss");
        let source = "@import 'variables';\n.excel__header { height: $header-height; }\n";
        let options = LoaderOptions::default();

        let out = SassLoader::new()
            .run(
                LoadedModule::from_bytes(source.as_bytes().to_vec()),
                &ctx(&resource, root, &options),
            )
            .unwrap();

        let css = out.text().unwrap();
        assert!(css.contains(".excel__header"));
        assert!(css.contains("34px"));
    }

    #[test]
    fn reports_sass_errors() {
        let options = LoaderOptions::default();
        let resource = PathBuf::from("/project/src/scss/index.scss");

        let err = SassLoader::new()
            .run(
                LoadedModule::from_bytes(b".a { color: $missing; }".to_vec()),
                &ctx(&resource, Path::new("/project/src"), &options),
            )
            .unwrap_err();

        assert!(matches!(err, LoaderError::Transform { loader: "sass", .. }));
    }

    #[test]
    fn css_loader_emits_url_assets() {
        let temp = tempdir().unwrap();
        let root = temp.path();
        fs::create_dir_all(root.join("img")).unwrap();
        fs::write(root.join("img/grid.png"), [137, 80, 78, 71]).unwrap();

        let resource = root.join("scss/index.scss");
        let options = LoaderOptions::default();
        let source = ".cell { background: url(../img/grid.png); }\n.logo { background: url(data:image/png;base64,AAAA); }";

        let out = CssLoader::new()
            .run(
                LoadedModule::from_bytes(source.as_bytes().to_vec()),
                &ctx(&resource, root, &options),
            )
            .unwrap();

        assert_eq!(out.assets.len(), 1);
        let name = &out.assets[0].name;
        assert!(name.ends_with(".png"));

        let css = out.text().unwrap();
        assert!(css.contains(name.as_str()));
        assert!(css.contains("data:image/png"));
    }

    #[test]
    fn css_loader_fails_on_missing_url_target() {
        let temp = tempdir().unwrap();
        let resource = temp.path().join("index.css");
        let options = LoaderOptions::default();

        let err = CssLoader::new()
            .run(
                LoadedModule::from_bytes(b".a { background: url(missing.png); }".to_vec()),
                &ctx(&resource, temp.path(), &options),
            )
            .unwrap_err();

        assert!(matches!(err, LoaderError::Resolve { ref specifier, .. } if specifier == "missing.png"));
    }

    #[test]
    fn extract_leaves_stable_stub() {
        let options = LoaderOptions::default();
        let resource = PathBuf::from("/project/src/scss/index.scss");
        let root = PathBuf::from("/project/src");

        let a = ExtractCssLoader::new()
            .run(
                LoadedModule::from_bytes(b".a{color:red}".to_vec()),
                &ctx(&resource, &root, &options),
            )
            .unwrap();
        let b = ExtractCssLoader::new()
            .run(
                LoadedModule::from_bytes(b".a{color:blue}".to_vec()),
                &ctx(&resource, &root, &options),
            )
            .unwrap();

        assert_eq!(a.text(), Some(EXTRACTED_STUB));
        assert_eq!(a.text(), b.text());
        assert_eq!(a.css.as_deref(), Some(".a{color:red}"));
    }

    #[test]
    fn extract_stub_accepts_hot_updates() {
        let options = LoaderOptions::default();
        let resource = PathBuf::from("/project/src/scss/index.scss");
        let root = PathBuf::from("/project/src");
        let mut context = ctx(&resource, &root, &options);
        context.hot = true;

        let out = ExtractCssLoader::new()
            .run(LoadedModule::from_bytes(b".a{}".to_vec()), &context)
            .unwrap();

        assert!(out.text().unwrap().contains("module.hot.accept()"));
    }

    #[test]
    fn classifies_url_references() {
        assert_eq!(local_reference("../img/a.png?v=1#x"), Some("../img/a.png"));
        assert_eq!(local_reference("https://cdn/x.png"), None);
        assert_eq!(local_reference("/static/a.png"), None);
        assert_eq!(local_reference("#filter"), None);
    }
}
