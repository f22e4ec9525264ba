//! Lint step for application scripts.
//!
//! Parses each module with oxc and runs a small set of AST rules. Warnings
//! are logged; any error-level finding fails the module.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::path::Path;

use oxc_allocator::Allocator;
use oxc_ast::ast::{
    BinaryOperator, BindingIdentifier, BindingPatternKind, ImportDeclarationSpecifier, Statement,
    VariableDeclarationKind,
};
use oxc_ast::AstKind;
use oxc_parser::Parser;
use oxc_semantic::{SemanticBuilder, SymbolId};
use oxc_span::{SourceType, Span};
use serde::Deserialize;

use crate::traits::{LoadedModule, Loader, LoaderContext, LoaderError};

pub const NO_DEBUGGER: &str = "no-debugger";
pub const NO_VAR: &str = "no-var";
pub const EQEQEQ: &str = "eqeqeq";
pub const NO_UNUSED_VARS: &str = "no-unused-vars";
pub const NO_DUPLICATE_IMPORTS: &str = "no-duplicate-imports";

/// How a rule violation is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Off,
    Warn,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Off => f.write_str("off"),
            Severity::Warn => f.write_str("warning"),
            Severity::Error => f.write_str("error"),
        }
    }
}

/// Rule severities keyed by rule name.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct LintConfig {
    rules: BTreeMap<String, Severity>,
}

impl Default for LintConfig {
    fn default() -> Self {
        let rules = [
            (NO_DEBUGGER, Severity::Error),
            (NO_VAR, Severity::Error),
            (EQEQEQ, Severity::Warn),
            (NO_UNUSED_VARS, Severity::Warn),
            (NO_DUPLICATE_IMPORTS, Severity::Error),
        ]
        .into_iter()
        .map(|(name, severity)| (name.to_string(), severity))
        .collect();

        Self { rules }
    }
}

impl LintConfig {
    pub fn severity(&self, rule: &str) -> Severity {
        self.rules.get(rule).copied().unwrap_or(Severity::Off)
    }

    /// Override the defaults with user-provided severities.
    pub fn merge(mut self, overrides: BTreeMap<String, Severity>) -> Self {
        self.rules.extend(overrides);
        self
    }

    pub fn set(&mut self, rule: &str, severity: Severity) {
        self.rules.insert(rule.to_string(), severity);
    }
}

/// A single lint finding.
#[derive(Debug, Clone, PartialEq)]
pub struct LintDiagnostic {
    pub rule: &'static str,
    pub severity: Severity,
    pub line: usize,
    pub column: usize,
    pub message: String,
}

impl fmt::Display for LintDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} {} {}",
            self.line, self.column, self.rule, self.message
        )
    }
}

/// Loader that lints scripts and passes them through unchanged.
#[derive(Debug, Default)]
pub struct LintLoader;

impl LintLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for LintLoader {
    fn name(&self) -> &'static str {
        "lint"
    }

    fn run(
        &self,
        input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let source = input
            .text()
            .ok_or_else(|| LoaderError::Encoding(ctx.resource.to_path_buf()))?;

        let diagnostics = lint_source(source, ctx.resource, &ctx.options.lint)?;

        let (errors, warnings): (Vec<_>, Vec<_>) = diagnostics
            .into_iter()
            .partition(|d| d.severity == Severity::Error);

        for warning in &warnings {
            tracing::warn!("{}:{}", ctx.resource.display(), warning);
        }

        if !errors.is_empty() {
            return Err(LoaderError::Lint {
                path: ctx.resource.to_path_buf(),
                diagnostics: errors,
            });
        }

        Ok(input)
    }
}

/// Lint a script, returning every finding of an enabled rule.
pub fn lint_source(
    source: &str,
    path: &Path,
    config: &LintConfig,
) -> Result<Vec<LintDiagnostic>, LoaderError> {
    let allocator = Allocator::default();
    let parsed = Parser::new(&allocator, source, SourceType::mjs()).parse();

    if !parsed.errors.is_empty() {
        let message = parsed
            .errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        return Err(LoaderError::transform("lint", path, message));
    }

    let program = &parsed.program;
    let semantic = SemanticBuilder::new().build(program).semantic;
    let scoping = semantic.scoping();
    let lines = LineIndex::new(source);
    let mut report = Reporter {
        config,
        lines: &lines,
        diagnostics: Vec::new(),
    };

    let mut referenced: HashSet<SymbolId> = HashSet::new();

    for node in semantic.nodes().iter() {
        match node.kind() {
            AstKind::DebuggerStatement(stmt) => {
                report.push(NO_DEBUGGER, stmt.span, "Unexpected 'debugger' statement".into());
            }
            AstKind::VariableDeclaration(decl) if decl.kind == VariableDeclarationKind::Var => {
                report.push(
                    NO_VAR,
                    decl.span,
                    "Unexpected var, use let or const instead".into(),
                );
            }
            AstKind::BinaryExpression(expr) => {
                let suggestion = match expr.operator {
                    BinaryOperator::Equality => Some(("===", "==")),
                    BinaryOperator::Inequality => Some(("!==", "!=")),
                    _ => None,
                };
                if let Some((expected, found)) = suggestion {
                    report.push(
                        EQEQEQ,
                        expr.span,
                        format!("Expected '{}' and instead saw '{}'", expected, found),
                    );
                }
            }
            AstKind::IdentifierReference(ident) => {
                let symbol = ident
                    .reference_id
                    .get()
                    .and_then(|id| scoping.get_reference(id).symbol_id());
                if let Some(symbol) = symbol {
                    referenced.insert(symbol);
                }
            }
            _ => {}
        }
    }

    // Bindings without a symbol are never reported.
    let unused = |id: &BindingIdentifier<'_>| {
        id.symbol_id
            .get()
            .is_some_and(|symbol| !referenced.contains(&symbol))
    };

    let mut import_sources: HashMap<&str, usize> = HashMap::new();

    for stmt in &program.body {
        match stmt {
            Statement::ImportDeclaration(decl) => {
                let seen = import_sources.entry(decl.source.value.as_str()).or_default();
                *seen += 1;
                if *seen > 1 {
                    report.push(
                        NO_DUPLICATE_IMPORTS,
                        decl.span,
                        format!("'{}' import is duplicated", decl.source.value),
                    );
                }

                for specifier in decl.specifiers.iter().flatten() {
                    let local = import_local(specifier);
                    if unused(local) {
                        report.push(
                            NO_UNUSED_VARS,
                            local.span,
                            format!("'{}' is defined but never used", local.name),
                        );
                    }
                }
            }
            _ => {
                for id in declared_bindings(stmt) {
                    if unused(id) {
                        report.push(
                            NO_UNUSED_VARS,
                            id.span,
                            format!("'{}' is assigned a value but never used", id.name),
                        );
                    }
                }
            }
        }
    }

    let mut diagnostics = report.diagnostics;
    diagnostics.sort_by_key(|d| (d.line, d.column));
    Ok(diagnostics)
}

/// Local binding introduced by an import specifier.
pub(crate) fn import_local<'s, 'a>(
    specifier: &'s ImportDeclarationSpecifier<'a>,
) -> &'s BindingIdentifier<'a> {
    match specifier {
        ImportDeclarationSpecifier::ImportSpecifier(s) => &s.local,
        ImportDeclarationSpecifier::ImportDefaultSpecifier(s) => &s.local,
        ImportDeclarationSpecifier::ImportNamespaceSpecifier(s) => &s.local,
    }
}

/// Top-level bindings of a non-exported declaration statement.
fn declared_bindings<'s, 'a>(stmt: &'s Statement<'a>) -> Vec<&'s BindingIdentifier<'a>> {
    match stmt {
        Statement::VariableDeclaration(var) => var
            .declarations
            .iter()
            .filter_map(|d| match &d.id.kind {
                BindingPatternKind::BindingIdentifier(id) => Some(&**id),
                _ => None,
            })
            .collect(),
        Statement::FunctionDeclaration(func) => func.id.iter().collect(),
        Statement::ClassDeclaration(class) => class.id.iter().collect(),
        _ => Vec::new(),
    }
}

struct Reporter<'c> {
    config: &'c LintConfig,
    lines: &'c LineIndex,
    diagnostics: Vec<LintDiagnostic>,
}

impl Reporter<'_> {
    fn push(&mut self, rule: &'static str, span: Span, message: String) {
        let severity = self.config.severity(rule);
        if severity == Severity::Off {
            return;
        }

        let (line, column) = self.lines.position(span.start);
        self.diagnostics.push(LintDiagnostic {
            rule,
            severity,
            line,
            column,
            message,
        });
    }
}

/// Byte offset to 1-based line/column lookup.
struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .match_indices('\n')
                .map(|(offset, _)| offset as u32 + 1),
        );
        Self { starts }
    }

    fn position(&self, offset: u32) -> (usize, usize) {
        let line = match self.starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(next) => next - 1,
        };
        let column = (offset - self.starts[line]) as usize + 1;
        (line + 1, column)
    }
}
