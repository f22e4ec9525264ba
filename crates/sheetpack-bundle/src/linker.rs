//! Rewrites module syntax into calls on the bundle runtime.
//!
//! ES module declarations become `__sheetpack_require__` calls, imported
//! bindings are replaced by property reads on the imported module (so they
//! stay live), and exports become getters installed before the body runs.
//! Literal `require("x")` calls are rewritten the same way. Every edit keeps
//! the line count of the text it replaces, so per-module source maps still
//! line up with the linked body.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    Argument, BindingPattern, BindingPatternKind, Declaration, ExportDefaultDeclarationKind,
    Expression, ImportDeclarationSpecifier, Program, Statement,
};
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::{SemanticBuilder, SymbolId};
use oxc_span::{GetSpan, SourceType, Span};

use crate::builder::BuildError;

/// Name of the module loader function inside the bundle.
pub const REQUIRE: &str = "__sheetpack_require__";

const DEFAULT_EXPORT: &str = "__sheetpack_default__";

/// A module ready to be placed in the bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkedModule {
    /// Function body taking `(module, exports, __sheetpack_require__)`.
    /// The first line is the runtime header; the module's own code starts on
    /// the second line.
    pub body: String,

    /// Whether the module used ES module syntax
    pub esm: bool,
}

/// Link a JavaScript module. `resolve` maps each specifier to a module id
/// and is called in source order.
pub fn link<F>(source: &str, path: &Path, mut resolve: F) -> Result<LinkedModule, BuildError>
where
    F: FnMut(&str) -> Result<String, BuildError>,
{
    let allocator = Allocator::default();
    let program = parse(&allocator, source, path)?;
    let semantic = SemanticBuilder::new().build(&program).semantic;
    let scoping = semantic.scoping();

    let mut linker = Linker::default();

    for stmt in &program.body {
        linker.statement(stmt, &mut resolve)?;
    }

    let mut shorthand: HashSet<Span> = HashSet::new();
    for node in semantic.nodes().iter() {
        if let AstKind::ObjectProperty(prop) = node.kind() {
            if prop.shorthand {
                shorthand.insert(prop.value.span());
            }
        }
    }

    for node in semantic.nodes().iter() {
        match node.kind() {
            AstKind::IdentifierReference(ident) => {
                let symbol = ident
                    .reference_id
                    .get()
                    .and_then(|id| scoping.get_reference(id).symbol_id());
                let Some(access) = symbol.and_then(|s| linker.imported.get(&s)) else {
                    continue;
                };
                let text = if shorthand.contains(&ident.span) {
                    format!("{}: {}", ident.name, access)
                } else {
                    access.clone()
                };
                linker.references.push(Edit::replace(ident.span, text));
            }
            AstKind::CallExpression(call) => {
                let Expression::Identifier(callee) = &call.callee else {
                    continue;
                };
                let unbound = callee
                    .reference_id
                    .get()
                    .map_or(true, |id| scoping.get_reference(id).symbol_id().is_none());
                if callee.name.as_str() != "require" || !unbound || call.arguments.len() != 1 {
                    continue;
                }
                if let Argument::StringLiteral(lit) = &call.arguments[0] {
                    let id = resolve(lit.value.as_str())?;
                    linker
                        .statements
                        .push(Edit::replace(call.span, format!("{}({})", REQUIRE, quote(&id))));
                }
            }
            AstKind::ImportExpression(expr) => {
                if let Expression::StringLiteral(lit) = &expr.source {
                    let id = resolve(lit.value.as_str())?;
                    linker.statements.push(Edit::replace(
                        expr.span,
                        format!(
                            "Promise.resolve().then(function () {{ return {req}.i({req}({id})); }})",
                            req = REQUIRE,
                            id = quote(&id)
                        ),
                    ));
                }
            }
            _ => {}
        }
    }

    Ok(linker.finish(source))
}

fn parse<'a>(
    allocator: &'a Allocator,
    source: &'a str,
    path: &Path,
) -> Result<Program<'a>, BuildError> {
    let parsed = Parser::new(allocator, source, SourceType::mjs()).parse();
    if parsed.errors.is_empty() {
        return Ok(parsed.program);
    }

    // Sloppy-mode scripts from dependencies are not valid modules.
    let retry = Parser::new(allocator, source, SourceType::cjs()).parse();
    if retry.errors.is_empty() {
        return Ok(retry.program);
    }

    Err(BuildError::LinkError {
        path: path.to_path_buf(),
        message: parsed
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; "),
    })
}

#[derive(Debug)]
struct Edit {
    start: u32,
    end: u32,
    text: String,
}

impl Edit {
    fn replace(span: Span, text: String) -> Self {
        Self {
            start: span.start,
            end: span.end,
            text,
        }
    }

    fn insert(at: u32, text: &str) -> Self {
        Self {
            start: at,
            end: at,
            text: text.to_string(),
        }
    }

    fn contains(&self, other: &Edit) -> bool {
        self.start < self.end && self.start <= other.start && other.end <= self.end
    }
}

#[derive(Default)]
struct Linker {
    /// Import locals and the expression reading them
    imported: HashMap<SymbolId, String>,
    imported_names: HashMap<String, String>,
    /// Exported name and the expression producing it
    exports: Vec<(String, String)>,
    statements: Vec<Edit>,
    references: Vec<Edit>,
    imports: usize,
    esm: bool,
}

impl Linker {
    fn import_var(&mut self) -> String {
        let var = format!("__sheetpack_import_{}__", self.imports);
        self.imports += 1;
        var
    }

    fn require_into(&mut self, id: &str) -> (String, String) {
        let var = self.import_var();
        let text = format!("var {var} = {req}.i({req}({id}));", req = REQUIRE, id = quote(id));
        (var, text)
    }

    fn statement<F>(&mut self, stmt: &Statement<'_>, resolve: &mut F) -> Result<(), BuildError>
    where
        F: FnMut(&str) -> Result<String, BuildError>,
    {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                self.esm = true;
                let id = resolve(decl.source.value.as_str())?;
                let specifiers: &[ImportDeclarationSpecifier<'_>] = match &decl.specifiers {
                    Some(specifiers) => specifiers,
                    None => &[],
                };

                if specifiers.is_empty() {
                    self.statements.push(Edit::replace(
                        decl.span,
                        format!("{}({});", REQUIRE, quote(&id)),
                    ));
                    return Ok(());
                }

                let (var, text) = self.require_into(&id);
                for specifier in specifiers {
                    let (local, access) = match specifier {
                        ImportDeclarationSpecifier::ImportSpecifier(s) => {
                            (&s.local, member(&var, &s.imported.name()))
                        }
                        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => {
                            (&s.local, member(&var, "default"))
                        }
                        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => {
                            (&s.local, var.clone())
                        }
                    };
                    if let Some(symbol) = local.symbol_id.get() {
                        self.imported.insert(symbol, access.clone());
                    }
                    self.imported_names.insert(local.name.to_string(), access);
                }
                self.statements.push(Edit::replace(decl.span, text));
            }
            Statement::ExportNamedDeclaration(decl) => {
                self.esm = true;

                if let Some(declaration) = &decl.declaration {
                    for name in declared_names(declaration) {
                        self.exports.push((name.clone(), name));
                    }
                    self.statements.push(Edit::replace(
                        Span::new(decl.span.start, declaration.span().start),
                        String::new(),
                    ));
                } else if let Some(source) = &decl.source {
                    let id = resolve(source.value.as_str())?;
                    let (var, text) = self.require_into(&id);
                    for spec in &decl.specifiers {
                        self.exports
                            .push((spec.exported.name().to_string(), member(&var, &spec.local.name())));
                    }
                    self.statements.push(Edit::replace(decl.span, text));
                } else {
                    for spec in &decl.specifiers {
                        let local = spec.local.name().to_string();
                        let access = self.imported_names.get(&local).cloned().unwrap_or(local);
                        self.exports.push((spec.exported.name().to_string(), access));
                    }
                    self.statements.push(Edit::replace(decl.span, String::new()));
                }
            }
            Statement::ExportDefaultDeclaration(decl) => {
                self.esm = true;
                let inner = decl.declaration.span();
                let prefix = Span::new(decl.span.start, inner.start);

                let named = match &decl.declaration {
                    ExportDefaultDeclarationKind::FunctionDeclaration(f) => {
                        f.id.as_ref().map(|id| id.name.to_string())
                    }
                    ExportDefaultDeclarationKind::ClassDeclaration(c) => {
                        c.id.as_ref().map(|id| id.name.to_string())
                    }
                    _ => None,
                };

                match named {
                    Some(name) => {
                        self.exports.push(("default".to_string(), name));
                        self.statements.push(Edit::replace(prefix, String::new()));
                    }
                    None => {
                        self.exports
                            .push(("default".to_string(), DEFAULT_EXPORT.to_string()));
                        self.statements
                            .push(Edit::replace(prefix, format!("var {} = ", DEFAULT_EXPORT)));
                        if matches!(
                            decl.declaration,
                            ExportDefaultDeclarationKind::FunctionDeclaration(_)
                                | ExportDefaultDeclarationKind::ClassDeclaration(_)
                        ) {
                            self.statements.push(Edit::insert(decl.span.end, ";"));
                        }
                    }
                }
            }
            Statement::ExportAllDeclaration(decl) => {
                self.esm = true;
                let id = resolve(decl.source.value.as_str())?;

                match &decl.exported {
                    Some(exported) => {
                        let (var, text) = self.require_into(&id);
                        self.exports.push((exported.name().to_string(), var));
                        self.statements.push(Edit::replace(decl.span, text));
                    }
                    None => {
                        self.statements.push(Edit::replace(
                            decl.span,
                            format!(
                                "{req}.s(exports, {req}.i({req}({id})));",
                                req = REQUIRE,
                                id = quote(&id)
                            ),
                        ));
                    }
                }
            }
            _ => {}
        }

        Ok(())
    }

    fn header(&self) -> String {
        if !self.esm {
            return String::new();
        }

        let mut header = format!("\"use strict\"; {}.r(exports);", REQUIRE);
        if !self.exports.is_empty() {
            let getters = self
                .exports
                .iter()
                .map(|(name, expr)| format!("{}: function () {{ return {}; }}", quote(name), expr))
                .collect::<Vec<_>>()
                .join(", ");
            header.push_str(&format!(" {}.d(exports, {{ {} }});", REQUIRE, getters));
        }
        header
    }

    fn finish(self, source: &str) -> LinkedModule {
        let header = self.header();

        let mut edits = self.statements;
        let references: Vec<Edit> = self
            .references
            .into_iter()
            .filter(|r| !edits.iter().any(|e| e.contains(r)))
            .collect();
        edits.extend(references);
        edits.sort_by_key(|e| (e.start, e.end));

        let mut code = String::with_capacity(source.len() + header.len() + 1);
        code.push_str(&header);
        code.push('\n');

        let mut pos = 0usize;
        for edit in edits {
            let (start, end) = (edit.start as usize, edit.end as usize);
            if start < pos {
                continue;
            }
            code.push_str(&source[pos..start]);
            code.push_str(&edit.text);
            let lines = source[start..end].matches('\n').count();
            code.extend(std::iter::repeat('\n').take(lines));
            pos = end;
        }
        code.push_str(&source[pos..]);

        LinkedModule {
            body: code,
            esm: self.esm,
        }
    }
}

fn declared_names(declaration: &Declaration<'_>) -> Vec<String> {
    let mut names = Vec::new();
    match declaration {
        Declaration::VariableDeclaration(var) => {
            for declarator in &var.declarations {
                binding_names(&declarator.id, &mut names);
            }
        }
        Declaration::FunctionDeclaration(f) => {
            names.extend(f.id.as_ref().map(|id| id.name.to_string()));
        }
        Declaration::ClassDeclaration(c) => {
            names.extend(c.id.as_ref().map(|id| id.name.to_string()));
        }
        _ => {}
    }
    names
}

fn binding_names(pattern: &BindingPattern<'_>, out: &mut Vec<String>) {
    match &pattern.kind {
        BindingPatternKind::BindingIdentifier(id) => out.push(id.name.to_string()),
        BindingPatternKind::ObjectPattern(object) => {
            for property in &object.properties {
                binding_names(&property.value, out);
            }
            if let Some(rest) = &object.rest {
                binding_names(&rest.argument, out);
            }
        }
        BindingPatternKind::ArrayPattern(array) => {
            for element in array.elements.iter().flatten() {
                binding_names(element, out);
            }
            if let Some(rest) = &array.rest {
                binding_names(&rest.argument, out);
            }
        }
        BindingPatternKind::AssignmentPattern(assign) => binding_names(&assign.left, out),
    }
}

/// JSON string literal, which is also a valid JavaScript string literal.
pub(crate) fn quote(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| format!("\"{}\"", value))
}

fn member(object: &str, property: &str) -> String {
    if is_identifier(property) {
        format!("{}.{}", object, property)
    } else {
        format!("{}[{}]", object, quote(property))
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == '$')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn link_str(source: &str) -> LinkedModule {
        link(source, Path::new("/p/src/index.js"), |spec| {
            Ok(format!("./src/{}.js", spec.trim_start_matches("./")))
        })
        .unwrap()
    }

    #[test]
    fn rewrites_named_and_default_imports() {
        let linked = link_str(
            "import {Excel} from './Excel';\nimport dom from './dom';\nnew Excel(dom.root);\n",
        );

        assert!(linked.esm);
        assert!(linked.body.contains(
            "var __sheetpack_import_0__ = __sheetpack_require__.i(__sheetpack_require__(\"./src/Excel.js\"));"
        ));
        assert!(linked
            .body
            .contains("new __sheetpack_import_0__.Excel(__sheetpack_import_1__.default.root);"));
    }

    #[test]
    fn shorthand_properties_keep_their_key() {
        let linked = link_str("import {$} from './dom';\nconst api = {$};\nexport default api;\n");

        assert!(linked.body.contains("const api = {$: __sheetpack_import_0__.$};"));
    }

    #[test]
    fn shadowed_names_are_left_alone() {
        let linked = link_str(
            "import {row} from './table';\nfunction f(row) { return row; }\nexport default f(row);\n",
        );

        assert!(linked.body.contains("function f(row) { return row; }"));
        assert!(linked
            .body
            .contains("var __sheetpack_default__ = f(__sheetpack_import_0__.row);"));
    }

    #[test]
    fn exports_become_getters() {
        let linked = link_str(
            "export const a = 1, {b} = {b: 2};\nexport function f() {}\nexport class C {}\nconst d = 4;\nexport {d as e};\n",
        );

        let header = linked.body.lines().next().unwrap();
        assert!(header.starts_with("\"use strict\"; __sheetpack_require__.r(exports);"));
        for getter in [
            "\"a\": function () { return a; }",
            "\"b\": function () { return b; }",
            "\"f\": function () { return f; }",
            "\"C\": function () { return C; }",
            "\"e\": function () { return d; }",
        ] {
            assert!(header.contains(getter), "missing {getter}");
        }
        assert!(linked.body.contains("\nconst a = 1, {b} = {b: 2};\nfunction f() {}\nclass C {}\n"));
        assert!(!linked.body.contains("export "));
    }

    #[test]
    fn named_default_declaration_keeps_its_name() {
        let linked = link_str("export default class Excel {}\n");

        assert!(linked.body.contains("\"default\": function () { return Excel; }"));
        assert!(linked.body.contains("\nclass Excel {}"));
    }

    #[test]
    fn anonymous_default_function_is_assigned() {
        let linked = link_str("export default function () {}\n");

        assert!(linked
            .body
            .contains("var __sheetpack_default__ = function () {};"));
    }

    #[test]
    fn reexports_read_through_source_module() {
        let linked = link_str("export {Table as default} from './Table';\nexport * from './dom';\n");

        assert!(linked
            .body
            .contains("\"default\": function () { return __sheetpack_import_0__.Table; }"));
        assert!(linked.body.contains(
            "__sheetpack_require__.s(exports, __sheetpack_require__.i(__sheetpack_require__(\"./src/dom.js\")));"
        ));
    }

    #[test]
    fn rewrites_commonjs_require() {
        let linked = link_str("var core = require('./core');\nmodule.exports = core;\n");

        assert!(!linked.esm);
        assert_eq!(
            linked.body,
            "\nvar core = __sheetpack_require__(\"./src/core.js\");\nmodule.exports = core;\n"
        );
    }

    #[test]
    fn local_require_function_is_not_rewritten() {
        let linked = link_str("function require(x) { return x; }\nrequire('./a');\n");

        assert!(linked.body.contains("require('./a');"));
    }

    #[test]
    fn preserves_line_numbers() {
        let source = "import {\n  a,\n  b\n} from './ab';\nconsole.log(a, b);\n";
        let linked = link_str(source);

        let body_lines: Vec<&str> = linked.body.lines().skip(1).collect();
        assert_eq!(body_lines.len(), source.lines().count());
        assert!(body_lines[4].contains("console.log(__sheetpack_import_0__.a, __sheetpack_import_0__.b)"));
    }

    #[test]
    fn resolves_in_source_order() {
        let mut seen = Vec::new();
        link(
            "import './a';\nimport {b} from './b';\nconst c = require('./c');\nconsole.log(b, c);\n",
            Path::new("/p/src/index.js"),
            |spec| {
                seen.push(spec.to_string());
                Ok(spec.to_string())
            },
        )
        .unwrap();

        assert_eq!(seen, vec!["./a", "./b", "./c"]);
    }

    #[test]
    fn reports_syntax_errors() {
        let err = link("import {", Path::new("/p/src/broken.js"), |s| Ok(s.to_string()))
            .unwrap_err();

        assert!(matches!(err, BuildError::LinkError { .. }));
    }
}
