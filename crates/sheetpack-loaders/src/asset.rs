//! Resource assets (images, icons) emitted with hashed filenames.

use std::path::Path;

use crate::hash::content_hash;
use crate::traits::{EmittedAsset, LoadedModule, Loader, LoaderContext, LoaderError, Source};

/// Emits the file verbatim and exports its public URL.
#[derive(Debug, Default)]
pub struct AssetLoader;

impl AssetLoader {
    pub fn new() -> Self {
        Self
    }
}

impl Loader for AssetLoader {
    fn name(&self) -> &'static str {
        "asset"
    }

    fn run(
        &self,
        mut input: LoadedModule,
        ctx: &LoaderContext<'_>,
    ) -> Result<LoadedModule, LoaderError> {
        let bytes = match std::mem::replace(&mut input.source, Source::Binary(Vec::new())) {
            Source::Text(text) => text.into_bytes(),
            Source::Binary(bytes) => bytes,
        };

        let asset = emit_asset(ctx.resource, bytes);
        let url = format!("{}{}", ctx.options.public_path, asset.name);
        let literal = serde_json::to_string(&url)
            .map_err(|e| LoaderError::transform("asset", ctx.resource, e))?;

        input.assets.push(asset);
        input.source = Source::Text(format!("module.exports = {};\n", literal));
        Ok(input)
    }
}

/// Name an asset `<hash><ext>` after its contents.
pub fn emit_asset(path: &Path, bytes: Vec<u8>) -> EmittedAsset {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| format!(".{}", e))
        .unwrap_or_default();

    EmittedAsset {
        name: format!("{}{}", content_hash(&bytes), ext),
        bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::HASH_LENGTH;
    use crate::traits::LoaderOptions;

    #[test]
    fn names_assets_by_content() {
        let a = emit_asset(Path::new("/src/favicon.ico"), vec![1, 2, 3]);
        let b = emit_asset(Path::new("/src/other.ico"), vec![1, 2, 3]);

        assert_eq!(a.name, b.name);
        assert!(a.name.ends_with(".ico"));
        assert_eq!(a.name.len(), HASH_LENGTH + ".ico".len());
    }

    #[test]
    fn exports_public_url() {
        let options = LoaderOptions {
            public_path: "/static/".to_string(),
            ..LoaderOptions::default()
        };
        let ctx = LoaderContext {
            resource: Path::new("/project/src/img/logo.png"),
            context_dir: Path::new("/project/src"),
            source_map: false,
            hot: false,
            options: &options,
        };

        let out = AssetLoader::new()
            .run(LoadedModule::from_bytes(vec![137, 80, 78, 71]), &ctx)
            .unwrap();

        let name = out.assets[0].name.clone();
        assert_eq!(
            out.text(),
            Some(format!("module.exports = \"/static/{}\";\n", name).as_str())
        );
        assert_eq!(out.assets[0].bytes, vec![137, 80, 78, 71]);
    }
}
