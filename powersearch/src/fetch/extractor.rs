//! HTML to markdown extraction.

use regex::Regex;
use std::sync::LazyLock;

use crate::config::ExtractionOptions;
use crate::errors::ExtractError;

/// Metadata gathered during extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageMetadata {
    /// Document title, if any.
    pub title: Option<String>,
    /// Whitespace-separated word count of the markdown.
    pub word_count: usize,
    /// Blocks dropped as repetitions.
    pub dropped_repetitions: usize,
}

/// Extracted page content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extracted {
    /// Cleaned markdown.
    pub markdown: String,
    /// Extraction metadata.
    pub metadata: PageMetadata,
}

/// Turns raw HTML into cleaned markdown.
///
/// Extraction is CPU-bound; callers run it on a blocking thread.
pub trait ContentExtractor: Send + Sync {
    /// Extracts markdown from `html`.
    fn extract(&self, html: &str, options: &ExtractionOptions) -> Result<Extracted, ExtractError>;
}

static HTML_TAG: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"<[^>]+>").ok());
static EXCESS_NEWLINES: LazyLock<Option<Regex>> = LazyLock::new(|| Regex::new(r"\n{3,}").ok());

/// Final cleanup applied to all extracted markdown: strips residual HTML
/// tags, collapses runs of blank lines, removes empty code fences and trims.
#[must_use]
pub fn clean_markdown(markdown: &str) -> String {
    let mut text = markdown.to_string();
    if let Some(re) = HTML_TAG.as_ref() {
        text = re.replace_all(&text, "").into_owned();
    }
    text = strip_empty_fences(&text);
    if let Some(re) = EXCESS_NEWLINES.as_ref() {
        text = re.replace_all(&text, "\n\n").into_owned();
    }
    text.trim().to_string()
}

/// Removes code fences with nothing between the opening and closing markers.
fn strip_empty_fences(text: &str) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let mut out = Vec::with_capacity(lines.len());
    let mut in_fence = false;
    let mut i = 0;

    while i < lines.len() {
        let line = lines[i];
        let trimmed = line.trim();
        if !in_fence && trimmed.len() >= 6 && trimmed.starts_with("```") && trimmed.ends_with("```")
            && trimmed[3..trimmed.len() - 3].trim().is_empty()
        {
            i += 1;
            continue;
        }
        if trimmed.starts_with("```") {
            if !in_fence {
                let mut next = i + 1;
                while next < lines.len() && lines[next].trim().is_empty() {
                    next += 1;
                }
                if next < lines.len() && lines[next].trim() == "```" {
                    i = next + 1;
                    continue;
                }
            }
            in_fence = !in_fence;
        }
        out.push(line);
        i += 1;
    }
    out.join("\n")
}

#[cfg(feature = "http")]
pub use html::HtmlExtractor;

#[cfg(feature = "http")]
mod html {
    use scraper::{ElementRef, Html, Node, Selector};
    use std::collections::HashMap;

    use super::{clean_markdown, ContentExtractor, Extracted, PageMetadata};
    use crate::config::ExtractionOptions;
    use crate::errors::ExtractError;

    /// Elements never rendered.
    const SKIPPED: &[&str] = &[
        "script", "style", "noscript", "nav", "footer", "header", "aside", "svg", "iframe",
        "form", "button", "template", "head", "select", "canvas",
    ];

    /// Elements that start and end a block.
    const BLOCKS: &[&str] = &[
        "div", "section", "article", "main", "p", "li", "dd", "dt", "figure", "figcaption",
        "details", "summary", "address", "tr",
    ];

    /// Content roots tried in order when favoring precision.
    const CONTENT_ROOTS: &[&str] = &["article", "main", "[role=\"main\"]", "body"];

    /// scraper-based extractor rendering a markdown subset.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct HtmlExtractor;

    impl HtmlExtractor {
        /// Creates an extractor.
        #[must_use]
        pub fn new() -> Self {
            Self
        }
    }

    impl ContentExtractor for HtmlExtractor {
        fn extract(
            &self,
            html: &str,
            options: &ExtractionOptions,
        ) -> Result<Extracted, ExtractError> {
            let document = Html::parse_document(html);
            let title = first_text(&document, "title");

            let root = content_root(&document, options.favor_precision);

            let mut renderer = Renderer::new(options);
            renderer.walk(root);
            renderer.flush();

            let (blocks, dropped) = if options.deduplicate {
                dedupe_blocks(renderer.blocks, options)
            } else {
                (renderer.blocks, 0)
            };

            let markdown = clean_markdown(&blocks.join("\n\n"));
            if markdown.is_empty() {
                return Err(ExtractError::ExtractionFailed(
                    "no extractable content found".to_string(),
                ));
            }
            let length = markdown.chars().count();
            if length < options.min_extracted_size {
                return Err(ExtractError::TooShort {
                    length,
                    minimum: options.min_extracted_size,
                });
            }

            let word_count = markdown.split_whitespace().count();
            Ok(Extracted {
                markdown,
                metadata: PageMetadata {
                    title,
                    word_count,
                    dropped_repetitions: dropped,
                },
            })
        }
    }

    fn first_text(document: &Html, selector: &str) -> Option<String> {
        let selector = Selector::parse(selector).ok()?;
        let text = collapse(&document.select(&selector).next()?.text().collect::<String>());
        (!text.is_empty()).then_some(text)
    }

    fn content_root(document: &Html, favor_precision: bool) -> ElementRef<'_> {
        let candidates: &[&str] = if favor_precision { CONTENT_ROOTS } else { &["body"] };
        for candidate in candidates {
            let Ok(selector) = Selector::parse(candidate) else {
                continue;
            };
            if let Some(element) = document.select(&selector).next() {
                if !element.text().collect::<String>().trim().is_empty() {
                    return element;
                }
            }
        }
        document.root_element()
    }

    /// Collapses runs of whitespace into single spaces and trims.
    fn collapse(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn inline_text(element: ElementRef<'_>) -> String {
        collapse(&element.text().collect::<String>())
    }

    /// Drops blocks repeated more than `max_repetitions` times. Blocks
    /// shorter than `min_duplcheck_size` are exempt.
    fn dedupe_blocks(blocks: Vec<String>, options: &ExtractionOptions) -> (Vec<String>, usize) {
        let mut seen: HashMap<String, usize> = HashMap::new();
        let mut kept = Vec::with_capacity(blocks.len());
        let mut dropped = 0;
        for block in blocks {
            if block.chars().count() < options.min_duplcheck_size {
                kept.push(block);
                continue;
            }
            let count = seen.entry(block.clone()).or_insert(0);
            *count += 1;
            if *count > options.max_repetitions {
                dropped += 1;
            } else {
                kept.push(block);
            }
        }
        (kept, dropped)
    }

    struct Renderer<'o> {
        options: &'o ExtractionOptions,
        blocks: Vec<String>,
        inline: String,
    }

    impl<'o> Renderer<'o> {
        fn new(options: &'o ExtractionOptions) -> Self {
            Self {
                options,
                blocks: Vec::new(),
                inline: String::new(),
            }
        }

        fn flush(&mut self) {
            let text = collapse(&self.inline);
            if !text.is_empty() {
                self.blocks.push(text);
            }
            self.inline.clear();
        }

        fn push_block(&mut self, block: String) {
            self.flush();
            if !block.trim().is_empty() {
                self.blocks.push(block);
            }
        }

        fn walk(&mut self, element: ElementRef<'_>) {
            for child in element.children() {
                match child.value() {
                    Node::Text(text) => self.inline.push_str(text),
                    Node::Comment(comment) if self.options.include_comments => {
                        let text = collapse(comment);
                        self.push_block(text);
                    }
                    Node::Element(_) => {
                        if let Some(el) = ElementRef::wrap(child) {
                            self.element(el);
                        }
                    }
                    _ => {}
                }
            }
        }

        fn element(&mut self, el: ElementRef<'_>) {
            let name = el.value().name();
            if SKIPPED.contains(&name) {
                return;
            }
            match name {
                "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
                    let level = usize::from(name.as_bytes()[1] - b'0');
                    let text = inline_text(el);
                    if !text.is_empty() {
                        self.push_block(format!("{} {text}", "#".repeat(level)));
                    }
                }
                "ul" | "ol" => self.list(el, name == "ol"),
                "pre" => {
                    let code = el.text().collect::<String>();
                    let code = code.trim_matches('\n').trim_end();
                    if !code.trim().is_empty() {
                        self.push_block(format!("```\n{code}\n```"));
                    }
                }
                "blockquote" => {
                    let mut inner = Renderer::new(self.options);
                    inner.walk(el);
                    inner.flush();
                    let quoted = inner
                        .blocks
                        .join("\n\n")
                        .lines()
                        .map(|line| {
                            if line.is_empty() {
                                ">".to_string()
                            } else {
                                format!("> {line}")
                            }
                        })
                        .collect::<Vec<_>>()
                        .join("\n");
                    self.push_block(quoted);
                }
                "table" => {
                    if self.options.include_tables {
                        let table = render_table(el);
                        self.push_block(table);
                    }
                }
                "br" => self.inline.push(' '),
                "hr" => self.flush(),
                "a" => {
                    let text = inline_text(el);
                    match el.value().attr("href") {
                        Some(href) if self.options.include_links && !text.is_empty() => {
                            self.inline.push_str(&format!(" [{text}]({href}) "));
                        }
                        _ => self.walk(el),
                    }
                }
                "img" => {
                    if self.options.include_images {
                        if let Some(src) = el.value().attr("src") {
                            let alt = el.value().attr("alt").unwrap_or_default();
                            self.inline.push_str(&format!(" ![{alt}]({src}) "));
                        }
                    }
                }
                "strong" | "b" => self.formatted(el, "**"),
                "em" | "i" => self.formatted(el, "*"),
                "code" => self.formatted(el, "`"),
                _ if BLOCKS.contains(&name) => {
                    self.flush();
                    self.walk(el);
                    self.flush();
                }
                _ => self.walk(el),
            }
        }

        fn formatted(&mut self, el: ElementRef<'_>, marker: &str) {
            if self.options.include_formatting {
                let text = inline_text(el);
                if !text.is_empty() {
                    self.inline.push_str(&format!(" {marker}{text}{marker} "));
                }
            } else {
                self.walk(el);
            }
        }

        fn list(&mut self, el: ElementRef<'_>, ordered: bool) {
            let items: Vec<String> = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|child| child.value().name() == "li")
                .map(inline_text)
                .filter(|text| !text.is_empty())
                .collect();
            if items.is_empty() {
                return;
            }
            let rendered = items
                .iter()
                .enumerate()
                .map(|(i, item)| {
                    if ordered {
                        format!("{}. {item}", i + 1)
                    } else {
                        format!("- {item}")
                    }
                })
                .collect::<Vec<_>>()
                .join("\n");
            self.push_block(rendered);
        }
    }

    fn render_table(table: ElementRef<'_>) -> String {
        let (Ok(row_sel), Ok(cell_sel)) = (Selector::parse("tr"), Selector::parse("th, td")) else {
            return String::new();
        };
        let rows: Vec<Vec<String>> = table
            .select(&row_sel)
            .map(|row| {
                row.select(&cell_sel)
                    .map(|cell| inline_text(cell).replace('|', "\\|"))
                    .collect::<Vec<_>>()
            })
            .filter(|cells| !cells.is_empty())
            .collect();
        let Some(width) = rows.iter().map(Vec::len).max() else {
            return String::new();
        };

        let line = |cells: &[String]| {
            let mut padded = cells.to_vec();
            padded.resize(width, String::new());
            format!("| {} |", padded.join(" | "))
        };
        let mut out = vec![line(&rows[0]), format!("|{}", " --- |".repeat(width))];
        out.extend(rows[1..].iter().map(|r| line(r)));
        out.join("\n")
    }
}
