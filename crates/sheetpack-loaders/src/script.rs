//! Syntax lowering for application scripts.

use std::path::Path;

use oxc_allocator::Allocator;
use oxc_codegen::{Codegen, CodegenOptions};
use oxc_parser::Parser;
use oxc_semantic::SemanticBuilder;
use oxc_span::SourceType;
use oxc_transformer::{HelperLoaderMode, TransformOptions, Transformer};

use crate::traits::{LoadedModule, Loader, LoaderContext, LoaderError, Source};

/// Global object the lowered code calls helpers on, e.g.
/// `babelHelpers.objectSpread2(...)`. The bundle runtime defines it.
pub const HELPERS_GLOBAL: &str = "babelHelpers";

/// Output of [`transpile`].
#[derive(Debug, Clone)]
pub struct Transpiled {
    pub code: String,
    pub map: Option<String>,
}

/// Loader that lowers modern syntax to the configured target.
#[derive(Debug, Default)]
pub struct TranspileLoader;

impl TranspileLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for TranspileLoader {
    fn name(&self) -> &'static str {
        "transpile"
    }

    fn run(
        &self,
        mut input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let source = input.take_text(ctx.resource)?;
        let output = transpile(&source, ctx.resource, &ctx.options.target, ctx.source_map)?;

        input.source = Source::Text(output.code);
        input.map = output.map;
        Ok(input)
    }
}

/// Parse `source`, lower it to `target` and print it back.
pub fn transpile(
    source: &str,
    path: &Path,
    target: &str,
    source_map: bool,
) -> Result<Transpiled, LoaderError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();

    if !parsed.errors.is_empty() {
        return Err(LoaderError::transform(
            "transpile",
            path,
            join_errors(parsed.errors.iter().map(|e| e.to_string())),
        ));
    }

    let mut program = parsed.program;
    let scoping = SemanticBuilder::new().build(&program).semantic.into_scoping();

    let mut options = TransformOptions::from_target(target)
        .map_err(|e| LoaderError::transform("transpile", path, format!("invalid target: {}", e)))?;
    // Helpers come from the bundle runtime, never from an npm package.
    options.helper_loader.mode = HelperLoaderMode::External;

    let transformed = Transformer::new(&allocator, path, &options)
        .build_with_scoping(scoping, &mut program);

    if !transformed.errors.is_empty() {
        return Err(LoaderError::transform(
            "transpile",
            path,
            join_errors(transformed.errors.iter().map(|e| e.to_string())),
        ));
    }

    let codegen_options = CodegenOptions {
        source_map_path: source_map.then(|| path.to_path_buf()),
        ..CodegenOptions::default()
    };

    let printed = Codegen::new().with_options(codegen_options).build(&program);

    Ok(Transpiled {
        code: printed.code,
        map: printed.map.map(|m| m.to_json_string()),
    })
}

fn join_errors(errors: impl Iterator<Item = String>) -> String {
    errors.collect::<Vec<_>>().join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::LoaderOptions;

    #[test]
    fn lowers_exponent_operator() {
        let out = transpile(
            "export const square = (x) => x ** 2;\n",
            Path::new("src/math.js"),
            "es2015",
            false,
        )
        .unwrap();

        assert!(!out.code.contains("**"));
        assert!(out.code.contains("Math.pow"));
        assert!(out.map.is_none());
    }

    #[test]
    fn helpers_are_called_on_the_runtime_global() {
        let out = transpile(
            "export const next = (state) => ({...state, rows: 20});\nexport async function load() { await 1; }\n",
            Path::new("src/store.js"),
            "es2015",
            false,
        )
        .unwrap();

        assert!(out.code.contains("babelHelpers.objectSpread2("));
        assert!(out.code.contains("babelHelpers.asyncToGenerator("));
        assert!(!out.code.contains("@oxc-project/runtime"));
        assert!(!out.code.contains("import _"));
    }

    #[test]
    fn keeps_module_syntax() {
        let out = transpile(
            "import {Excel} from './Excel';\nexport default new Excel();\n",
            Path::new("src/index.js"),
            "es2015",
            false,
        )
        .unwrap();

        assert!(out.code.contains("import"));
        assert!(out.code.contains("./Excel"));
        assert!(out.code.contains("export default"));
    }

    #[test]
    fn emits_source_map_when_requested() {
        let out = transpile("const a = 1;\n", Path::new("src/a.js"), "es2015", true).unwrap();
        let map = out.map.expect("source map");

        assert!(map.contains("\"version\""));
        assert!(map.contains("mappings"));
    }

    #[test]
    fn reports_syntax_errors() {
        let err = transpile("class {", Path::new("src/bad.js"), "es2015", false).unwrap_err();

        match err {
            LoaderError::Transform { loader, path, .. } => {
                assert_eq!(loader, "transpile");
                assert_eq!(path, Path::new("src/bad.js"));
            }
            other => panic!("expected transform error, got {:?}", other),
        }
    }

    #[test]
    fn rejects_unknown_target() {
        let err = transpile("1;", Path::new("a.js"), "not-a-target", false).unwrap_err();
        assert!(err.to_string().contains("invalid target"));
    }

    #[test]
    fn loader_replaces_source() {
        let options = LoaderOptions::default();
        let ctx = LoaderContext {
            resource: Path::new("/project/src/index.js"),
            context_dir: Path::new("/project/src"),
            source_map: true,
            hot: true,
            options: &options,
        };

        let out = TranspileLoader::new()
            .run(LoadedModule::from_bytes(b"let total = 2 ** 10;".to_vec()), &ctx)
            .unwrap();

        assert!(out.text().unwrap().contains("Math.pow"));
        assert!(out.map.is_some());
    }
}
