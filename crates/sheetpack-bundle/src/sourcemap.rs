//! Index source maps.
//!
//! Each module keeps the map produced when it was transpiled; the bundle map
//! places those maps at the line where the module's code starts.

use serde_json::{json, Value};

const SOURCE_ROOT: &str = "sheetpack:///";

#[derive(Debug, Clone, Default)]
pub struct IndexMap {
    sections: Vec<Value>,
}

impl IndexMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a module map starting at `line` (0-based). Maps that are not
    /// valid JSON are skipped.
    pub fn push_section(&mut self, line: u32, id: &str, map: &str) {
        let Ok(mut map) = serde_json::from_str::<Value>(map) else {
            tracing::debug!("skipping unreadable source map for {}", id);
            return;
        };

        if let Some(object) = map.as_object_mut() {
            object.insert(
                "sources".to_string(),
                json!([format!("{}{}", SOURCE_ROOT, id.trim_start_matches("./"))]),
            );
            object.remove("file");
        }

        self.sections.push(json!({
            "offset": { "line": line, "column": 0 },
            "map": map,
        }));
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn to_json(&self, file: &str) -> String {
        json!({
            "version": 3,
            "file": file,
            "sections": self.sections,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn sections_name_module_sources() {
        let mut index = IndexMap::new();
        index.push_section(
            12,
            "./src/index.js",
            r#"{"version":3,"file":"index.js","sources":["/abs/src/index.js"],"names":[],"mappings":"AAAA"}"#,
        );
        index.push_section(40, "./src/broken.js", "not json");

        let map: Value = serde_json::from_str(&index.to_json("bundle.js")).unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(map["file"], "bundle.js");
        assert_eq!(map["sections"][0]["offset"]["line"], 12);
        assert_eq!(
            map["sections"][0]["map"]["sources"][0],
            "sheetpack:///src/index.js"
        );
        assert!(map["sections"][0]["map"].get("file").is_none());
    }
}
