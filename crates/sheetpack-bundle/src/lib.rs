//! Module graph, linker and bundle emitter for sheetpack.
//!
//! A [`Compiler`] turns a [`PipelineConfig`] into an in-memory
//! [`Compilation`]: the HTML entry, the script bundle (with its source map in
//! development), the extracted stylesheet and every emitted asset. The
//! [`Builder`] writes a compilation to disk; the development server serves it
//! from memory.

pub mod builder;
pub mod compiler;
pub mod config;
pub mod graph;
pub mod html;
pub mod linker;
pub mod runtime;
pub mod sourcemap;

#[cfg(test)]
mod testing;

pub use builder::{clean, BuildError, BuildResult, Builder, ErrorKind};
pub use compiler::{Artifact, Compilation, Compiler};
pub use config::{
    ArtifactKind, CopyPattern, DevServerOptions, HtmlOptions, Mode, OutputDescriptor,
    PipelineConfig, MODE_ENV,
};
pub use graph::{Module, ModuleGraph};
pub use runtime::{error_page, ModuleBodies};
