//! HTML entry file generation.

use std::sync::LazyLock;

use minijinja::{context, Environment};
use regex::Regex;

use crate::builder::BuildError;

const TEMPLATE_NAME: &str = "index.html";

/// Elements laid out inline. Whitespace next to any other tag is dropped
/// by the minifier; between inline elements it renders, so one space stays.
const INLINE_TAGS: &[&str] = &[
    "a", "abbr", "acronym", "b", "bdi", "bdo", "big", "br", "button", "cite", "code", "del",
    "dfn", "em", "font", "i", "img", "input", "ins", "kbd", "label", "mark", "math", "nobr",
    "object", "output", "picture", "q", "rp", "rt", "rtc", "ruby", "s", "samp", "select",
    "small", "span", "strike", "strong", "sub", "sup", "svg", "textarea", "time", "tt", "u",
    "var", "video", "wbr",
];

static VERBATIM_BLOCK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<pre\b.*?</pre>|<textarea\b.*?</textarea>|<script\b.*?</script>|<style\b.*?</style>")
        .expect("Invalid verbatim block regex")
});

static COMMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("Invalid comment regex"));

static TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[!/?A-Za-z][^>]*>").expect("Invalid tag regex"));

static TAG_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^</?([A-Za-z][A-Za-z0-9-]*)").expect("Invalid tag name regex"));

static WHITESPACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("Invalid whitespace regex"));

static HEAD_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</head\s*>").expect("Invalid head regex"));

static BODY_CLOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)</body\s*>").expect("Invalid body regex"));

/// Renders the application template with the bundle references injected.
pub struct HtmlRenderer {
    env: Environment<'static>,
}

impl HtmlRenderer {
    pub fn new(template: String) -> Result<Self, BuildError> {
        let mut env = Environment::new();
        env.add_template_owned(TEMPLATE_NAME.to_string(), template)
            .map_err(|e| BuildError::TemplateError(e.to_string()))?;

        Ok(Self { env })
    }

    /// Render the page. `script` and `stylesheet` are URLs relative to the
    /// page.
    pub fn render(
        &self,
        title: &str,
        script: &str,
        stylesheet: Option<&str>,
        minify: bool,
    ) -> Result<String, BuildError> {
        let template = self
            .env
            .get_template(TEMPLATE_NAME)
            .map_err(|e| BuildError::TemplateError(e.to_string()))?;

        let html = template
            .render(context! { title => title })
            .map_err(|e| BuildError::TemplateError(e.to_string()))?;

        let html = inject(&html, script, stylesheet);
        Ok(if minify { minify_html(&html) } else { html })
    }
}

/// Insert the script and stylesheet tags before `</head>`, falling back to
/// `</body>` and then to the end of the document.
pub fn inject(html: &str, script: &str, stylesheet: Option<&str>) -> String {
    let mut tags = format!(r#"<script defer="defer" src="{}"></script>"#, script);
    if let Some(href) = stylesheet {
        tags.push_str(&format!(r#"<link href="{}" rel="stylesheet">"#, href));
    }

    let position = HEAD_CLOSE
        .find(html)
        .or_else(|| BODY_CLOSE.find(html))
        .map(|m| m.start());

    match position {
        Some(at) => format!("{}{}{}", &html[..at], tags, &html[at..]),
        None => format!("{}{}", html, tags),
    }
}

/// Strip comments and collapse whitespace, leaving `pre`, `textarea`,
/// `script` and `style` contents untouched.
pub fn minify_html(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    let mut prev_inline = false;

    for block in VERBATIM_BLOCK.find_iter(html) {
        let inline = is_inline(block.as_str());
        out.push_str(&collapse(&html[last..block.start()], prev_inline, inline));
        out.push_str(block.as_str());
        last = block.end();
        prev_inline = inline;
    }
    out.push_str(&collapse(&html[last..], prev_inline, false));

    out.trim().to_string()
}

/// Collapse one fragment between verbatim blocks. `prev_inline` and
/// `next_inline` describe the elements bordering the fragment.
fn collapse(fragment: &str, prev_inline: bool, next_inline: bool) -> String {
    let html = COMMENT.replace_all(fragment, "");
    let mut out = String::with_capacity(html.len());
    let mut last = 0;
    let mut before = prev_inline;

    for tag in TAG.find_iter(&html) {
        let inline = is_inline(tag.as_str());
        push_text(&mut out, &html[last..tag.start()], before, inline);
        out.push_str(tag.as_str());
        last = tag.end();
        before = inline;
    }
    push_text(&mut out, &html[last..], before, next_inline);

    out
}

fn push_text(out: &mut String, text: &str, after_inline: bool, before_inline: bool) {
    let collapsed = WHITESPACE.replace_all(text, " ");
    let mut text: &str = &collapsed;
    if !after_inline {
        text = text.trim_start();
    }
    if !before_inline {
        text = text.trim_end();
    }
    out.push_str(text);
}

fn is_inline(tag: &str) -> bool {
    TAG_NAME.captures(tag).is_some_and(|c| {
        let name = c[1].to_ascii_lowercase();
        INLINE_TAGS.contains(&name.as_str())
    })
}
