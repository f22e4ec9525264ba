//! Scratch project used by the tests of this crate.

use std::fs;
use std::path::Path;

pub(crate) fn write(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

/// A minimal copy of the spreadsheet project layout.
pub(crate) fn write_project(root: &Path) {
    write(
        root,
        "src/index.html",
        r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <!-- spreadsheet shell -->
  <title>{{ title }}</title>
</head>
<body>
  <div id="app"></div>
</body>
</html>
"#,
    );
    write(root, "src/favicon.ico", "\u{0}\u{0}\u{1}\u{0}");
    write(root, "src/core/dom.js", "export const $ = (selector) => selector;\n");
    write(root, "src/scss/index.scss", "$border: #e2e3e3;\n.excel { border: 1px solid $border; }\n");
    write(
        root,
        "src/index.js",
        "import {$} from '@core/dom';\nimport './scss/index.scss';\n\nconsole.log($('#app'));\n",
    );
    write(
        root,
        "node_modules/@babel/polyfill/package.json",
        r#"{"name": "@babel/polyfill", "main": "lib/index.js"}"#,
    );
    write(
        root,
        "node_modules/@babel/polyfill/lib/index.js",
        "\"use strict\";\n\nrequire(\"./noConflict\");\n",
    );
    write(
        root,
        "node_modules/@babel/polyfill/lib/noConflict.js",
        "\"use strict\";\n\nmodule.exports = {};\n",
    );
}
