//! Content extraction: noisy HTML → clean paragraph text.
//!
//! Walks the parsed DOM, dropping script/style/nav chrome and any container
//! whose class or id matches a configured boilerplate token. Block-level
//! elements become text blocks separated by blank lines; entities are decoded
//! by the HTML parser. Structural markup the chunker classifies on is kept as
//! plain-text markers: `<pre>` bodies are fenced, blockquote lines get a `> `
//! prefix, list items a bullet prefix. Output never contains markup tags.
use chrono::{DateTime, Utc};
use ego_tree::NodeRef;
use scraper::{Html, Node, Selector};

/// Result of extracting one HTML document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Extracted {
    pub title: String,
    /// Clean text: blocks joined by blank lines.
    pub text: String,
    /// Publication time from page metadata, when present.
    pub published_at: Option<DateTime<Utc>>,
}

/// Elements never rendered as readable content.
const SKIP_TAGS: &[&str] = &[
    "script", "style", "noscript", "template", "head", "nav", "header",
    "footer", "aside", "iframe", "form", "button", "svg", "select",
];

/// Elements that open a new text block.
const BLOCK_TAGS: &[&str] = &[
    "p", "div", "section", "article", "main", "h1", "h2", "h3", "h4", "h5",
    "h6", "table", "tr", "figure", "figcaption", "dd", "dt", "hr", "body",
];

/// Extract clean text, title, and publication date from raw HTML.
pub fn extract(raw_html: &str, deny_tokens: &[String]) -> Extracted {
    let doc = Html::parse_document(raw_html);

    let mut walker = Walker {
        deny_tokens,
        blocks: Vec::new(),
        current: String::new(),
    };
    walker.walk(doc.tree.root());
    walker.flush();

    Extracted {
        title: extract_title(&doc),
        text: walker.blocks.join("\n\n"),
        published_at: extract_published_at(&doc),
    }
}

struct Walker<'a> {
    deny_tokens: &'a [String],
    blocks: Vec<String>,
    current: String,
}

impl Walker<'_> {
    fn walk(&mut self, node: NodeRef<'_, Node>) {
        match node.value() {
            Node::Text(t) => self.current.push_str(&t),
            Node::Element(el) => {
                let name = el.name();
                if SKIP_TAGS.contains(&name) || self.is_boilerplate(&el) {
                    return;
                }

                match name {
                    "pre" => {
                        self.flush();
                        let code = collect_raw_text(node);
                        // Blank lines inside the fence would read as
                        // paragraph boundaries downstream; squeeze them.
                        let code = squeeze_blank_lines(code.trim_matches('\n'));
                        if !code.is_empty() {
                            self.blocks.push(format!("```\n{code}\n```"));
                        }
                    }
                    "blockquote" => {
                        self.flush();
                        let inner = self.nested_text(node);
                        if !inner.is_empty() {
                            let quoted: Vec<String> = inner
                                .lines()
                                .map(|line| format!("> {line}"))
                                .collect();
                            self.blocks.push(quoted.join("\n"));
                        }
                    }
                    "ul" | "ol" => {
                        self.flush();
                        let block = self.list_block(node, name == "ol");
                        if !block.is_empty() {
                            self.blocks.push(block);
                        }
                    }
                    "br" => self.current.push(' '),
                    _ if BLOCK_TAGS.contains(&name) => {
                        self.flush();
                        for child in node.children() {
                            self.walk(child);
                        }
                        self.flush();
                    }
                    // Inline element: text flows into the current block
                    _ => {
                        for child in node.children() {
                            self.walk(child);
                        }
                    }
                }
            }
            // Document / fragment roots
            _ => {
                for child in node.children() {
                    self.walk(child);
                }
            }
        }
    }

    fn is_boilerplate(&self, el: &scraper::node::Element) -> bool {
        for attr in ["class", "id"] {
            if let Some(value) = el.attr(attr) {
                let value = value.to_lowercase();
                if self.deny_tokens.iter().any(|t| value.contains(t.as_str())) {
                    return true;
                }
            }
        }
        false
    }

    /// Close the current block, collapsing whitespace runs to single spaces.
    fn flush(&mut self) {
        let collapsed = collapse_whitespace(&self.current);
        self.current.clear();
        if !collapsed.is_empty() {
            self.blocks.push(collapsed);
        }
    }

    /// Extract a sub-tree as text blocks joined by single newlines.
    fn nested_text(&self, node: NodeRef<'_, Node>) -> String {
        let mut sub = Walker {
            deny_tokens: self.deny_tokens,
            blocks: Vec::new(),
            current: String::new(),
        };
        for child in node.children() {
            sub.walk(child);
        }
        sub.flush();
        sub.blocks.join("\n")
    }

    /// Turn a ul/ol element into one block of prefixed item lines.
    fn list_block(&self, node: NodeRef<'_, Node>, ordered: bool) -> String {
        let mut lines = Vec::new();
        for child in node.children() {
            let Node::Element(el) = child.value() else {
                continue;
            };
            if el.name() != "li" || self.is_boilerplate(&el) {
                continue;
            }
            let item = collapse_whitespace(&self.nested_text(child).replace('\n', " "));
            if item.is_empty() {
                continue;
            }
            if ordered {
                lines.push(format!("{}. {item}", lines.len() + 1));
            } else {
                lines.push(format!("- {item}"));
            }
        }
        lines.join("\n")
    }
}

/// Concatenate all descendant text verbatim (used inside `<pre>`).
fn collect_raw_text(node: NodeRef<'_, Node>) -> String {
    let mut out = String::new();
    for child in node.children() {
        match child.value() {
            Node::Text(t) => out.push_str(&t),
            Node::Element(_) => out.push_str(&collect_raw_text(child)),
            _ => {}
        }
    }
    out
}

fn collapse_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn squeeze_blank_lines(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for line in s.lines().filter(|l| !l.trim().is_empty()) {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(line);
    }
    out
}

fn extract_title(doc: &Html) -> String {
    let title_sel = Selector::parse("title").expect("static selector");
    if let Some(el) = doc.select(&title_sel).next() {
        let title = collapse_whitespace(&el.text().collect::<String>());
        if !title.is_empty() {
            return title;
        }
    }
    let h1_sel = Selector::parse("h1").expect("static selector");
    doc.select(&h1_sel)
        .next()
        .map(|el| collapse_whitespace(&el.text().collect::<String>()))
        .unwrap_or_default()
}

fn extract_published_at(doc: &Html) -> Option<DateTime<Utc>> {
    let meta_sel =
        Selector::parse(r#"meta[property="article:published_time"]"#).expect("static selector");
    if let Some(el) = doc.select(&meta_sel).next() {
        if let Some(parsed) = el.value().attr("content").and_then(parse_datetime) {
            return Some(parsed);
        }
    }

    let time_sel = Selector::parse("time[datetime]").expect("static selector");
    doc.select(&time_sel)
        .next()
        .and_then(|el| el.value().attr("datetime"))
        .and_then(parse_datetime)
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Date-only values are common in <time datetime="...">
    chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn extract_default(html: &str) -> Extracted {
        let deny = crate::config::ExtractConfig::default().deny_tokens;
        extract(html, &deny)
    }

    #[test]
    fn test_strips_chrome_and_scripts() {
        let html = r#"
            <html><head><title>My Page</title><script>var x = 1;</script></head>
            <body>
              <nav><a href="/">Home</a></nav>
              <header>Site header</header>
              <p>Actual content.</p>
              <footer>Copyright</footer>
            </body></html>
        "#;
        let out = extract_default(html);
        assert_eq!(out.title, "My Page");
        assert_eq!(out.text, "Actual content.");
    }

    #[test]
    fn test_no_residual_markup() {
        let html = "<body><p>Hello <b>bold</b> &amp; <i>italic</i></p><div>More</div></body>";
        let out = extract_default(html);
        assert!(!out.text.contains('<'));
        assert!(!out.text.contains('>'));
        assert_eq!(out.text, "Hello bold & italic\n\nMore");
    }

    #[test]
    fn test_decodes_entities() {
        let out = extract_default("<p>caf&eacute; &mdash; 50&nbsp;%</p>");
        assert!(out.text.contains("café"));
        assert!(out.text.contains('—'));
    }

    #[test]
    fn test_paragraph_boundaries() {
        let html = "<article><p>First para.</p><p>Second para.</p><h2>Section</h2></article>";
        let out = extract_default(html);
        assert_eq!(out.text, "First para.\n\nSecond para.\n\nSection");
    }

    #[test]
    fn test_boilerplate_tokens_removed() {
        let html = r#"
            <body>
              <div class="related-posts"><p>You may also like</p></div>
              <div id="comments"><p>Great post!</p></div>
              <div class="share-buttons">Share on X</div>
              <p>Real text.</p>
            </body>
        "#;
        let out = extract_default(html);
        assert_eq!(out.text, "Real text.");
    }

    #[test]
    fn test_pre_blocks_fenced_verbatim() {
        let html = "<p>Intro</p><pre>fn main() {\n    println!(\"hi\");\n}</pre>";
        let out = extract_default(html);
        let blocks: Vec<&str> = out.text.split("\n\n").collect();
        assert_eq!(blocks[0], "Intro");
        assert!(blocks[1].starts_with("```\nfn main()"));
        assert!(blocks[1].contains("    println!"));
        assert!(blocks[1].ends_with("```"));
    }

    #[test]
    fn test_blockquote_prefixed() {
        let html = "<blockquote><p>Line one</p><p>Line two</p></blockquote>";
        let out = extract_default(html);
        assert_eq!(out.text, "> Line one\n> Line two");
    }

    #[test]
    fn test_lists_become_bullet_lines() {
        let html = "<ul><li>Alpha</li><li>Beta</li></ul><ol><li>One</li><li>Two</li></ol>";
        let out = extract_default(html);
        assert_eq!(out.text, "- Alpha\n- Beta\n\n1. One\n2. Two");
    }

    #[test]
    fn test_whitespace_collapsed_within_blocks() {
        let html = "<p>Too   many\n\t spaces</p>";
        let out = extract_default(html);
        assert_eq!(out.text, "Too many spaces");
    }

    #[test]
    fn test_empty_page_extracts_to_empty_text() {
        let out = extract_default("<html><head><title>Empty</title></head><body></body></html>");
        assert_eq!(out.title, "Empty");
        assert!(out.text.is_empty());
    }

    #[test]
    fn test_title_falls_back_to_h1() {
        let out = extract_default("<body><h1>Heading Title</h1><p>Body</p></body>");
        assert_eq!(out.title, "Heading Title");
    }

    #[test]
    fn test_published_at_from_meta() {
        let html = r#"<head><meta property="article:published_time" content="2024-05-01T09:30:00Z"></head><body><p>x</p></body>"#;
        let out = extract_default(html);
        assert_eq!(
            out.published_at.unwrap().to_rfc3339(),
            "2024-05-01T09:30:00+00:00"
        );
    }

    #[test]
    fn test_published_at_from_time_element() {
        let html = r#"<body><time datetime="2023-11-15">Nov 15</time><p>x</p></body>"#;
        let out = extract_default(html);
        assert_eq!(
            out.published_at.unwrap().date_naive().to_string(),
            "2023-11-15"
        );
    }
}
