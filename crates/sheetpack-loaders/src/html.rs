//! HTML fragments imported from scripts.

use crate::traits::{LoadedModule, Loader, LoaderContext, LoaderError, Source};

/// Exports the file contents as a string.
#[derive(Debug, Default)]
pub struct HtmlLoader;

impl HtmlLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for HtmlLoader {
    fn name(&self) -> &'static str {
        "html"
    }

    fn run(
        &self,
        mut input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let html = input.take_text(ctx.resource)?;
        let literal = serde_json::to_string(&html)
            .map_err(|e| LoaderError::transform("html", ctx.resource, e))?;

        input.source = Source::Text(format!("export default {};\n", literal));
        Ok(input)
    }
}
