//! Rule table and module loaders for sheetpack.
//!
//! Every source file reaching the pipeline is matched against an ordered
//! [`RuleTable`]; the first matching rule's loader chain turns the file into a
//! JavaScript module, optionally extracting CSS and emitting assets on the way.

pub mod asset;
pub mod hash;
pub mod html;
pub mod lint;
pub mod rules;
pub mod script;
pub mod style;
pub mod traits;

pub use asset::AssetLoader;
pub use hash::{content_hash, HASH_LENGTH};
pub use html::HtmlLoader;
pub use lint::{LintConfig, LintDiagnostic, LintLoader, Severity};
pub use rules::{CoverageError, Rule, RuleTable};
pub use script::{TranspileLoader, HELPERS_GLOBAL};
pub use style::{CssLoader, ExtractCssLoader, SassLoader, EXTRACTED_STUB};
pub use traits::{
    EmittedAsset, LoadedModule, Loader, LoaderContext, LoaderError, LoaderOptions, Source,
};
