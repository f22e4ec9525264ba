//! Module specifier resolution for sheetpack.
//!
//! Resolves the specifiers found in `import`/`require` statements to files on
//! disk, applying the project's path aliases and Node-style `node_modules`
//! lookup.

pub mod alias;
pub mod resolver;

pub use alias::AliasTable;
pub use resolver::{normalize_path, ResolveError, Resolver};
