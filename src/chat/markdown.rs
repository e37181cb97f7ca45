//! Conversion between fenced Markdown code and HTML `<pre><code>` blocks.
//!
//! Chat front-ends display code as HTML and newlines as `<br>`; prompts want
//! plain Markdown. All functions here are pure and never fail: text that does
//! not match a pattern is passed through unchanged.

use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Line-break marker used for display.
pub const LINE_BREAK: &str = "<br>";

static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(\w+)?\s*([^`]+?)```").expect("valid fence pattern"));

static FENCE_SPAN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```.*?```").expect("valid span pattern"));

static HTML_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<pre><code(?: class="(\w+)")?>(.*?)</code></pre>"#).expect("valid html pattern")
});

/// A fenced code block: optional language tag and its body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeFence {
    pub language: Option<String>,
    pub body: String,
}

impl CodeFence {
    fn from_captures(caps: &Captures<'_>) -> Self {
        Self {
            language: caps.get(1).map(|m| m.as_str().to_string()),
            body: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
        }
    }

    pub fn to_html(&self) -> String {
        match &self.language {
            Some(lang) => format!("<pre><code class=\"{lang}\">{}</code></pre>", self.body),
            None => format!("<pre><code>{}</code></pre>", self.body),
        }
    }

    pub fn to_markdown(&self) -> String {
        match &self.language {
            Some(lang) => format!("```{lang}\n{}\n```", self.body),
            None => format!("```\n{}\n```", self.body),
        }
    }
}

/// Fenced code blocks of `text`, leftmost first.
pub fn extract_code_fences(text: &str) -> Vec<CodeFence> {
    CODE_FENCE
        .captures_iter(text)
        .map(|caps| CodeFence::from_captures(&caps))
        .collect()
}

/// Rewrites every fenced block as `<pre><code>`, trimming its body.
pub fn markdown_to_html(text: &str) -> String {
    CODE_FENCE
        .replace_all(text, |caps: &Captures<'_>| CodeFence::from_captures(caps).to_html())
        .into_owned()
}

/// Rewrites every `<pre><code>` block as a fenced block.
pub fn html_to_markdown(html: &str) -> String {
    HTML_CODE
        .replace_all(html, |caps: &Captures<'_>| CodeFence::from_captures(caps).to_markdown())
        .into_owned()
}

/// Replaces newlines with [`LINE_BREAK`] outside fenced blocks; fenced
/// blocks are emitted in their HTML form instead.
pub fn normalize_linebreaks(md_text: &str) -> String {
    let fences: Vec<&str> = FENCE_SPAN.find_iter(md_text).map(|m| m.as_str()).collect();
    let mut out = String::with_capacity(md_text.len());
    for (i, plain) in FENCE_SPAN.split(md_text).enumerate() {
        if i > 0 {
            if let Some(fence) = fences.get(i - 1) {
                out.push_str(&markdown_to_html(fence));
            }
        }
        out.push_str(&plain.replace('\n', LINE_BREAK));
    }
    out
}

/// Undoes display formatting: `<br>` back to newlines, HTML code back to fences.
pub fn restore_markdown(text: &str) -> String {
    html_to_markdown(&text.replace(LINE_BREAK, "\n"))
}
