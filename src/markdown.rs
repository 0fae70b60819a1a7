use std::{borrow::Cow, sync::Arc};

use pulldown_cmark::{html, CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd};

use crate::config::MarkdownConfig;
use crate::highlight::Highlighter;

/// Markdown to HTML with the plugins enabled in `[markdown]`.
#[derive(Debug, Clone)]
pub struct MarkdownRenderer {
    math: bool,
    highlighter: Arc<Highlighter>,
}

impl MarkdownRenderer {
    pub fn new(config: &MarkdownConfig, highlighter: Arc<Highlighter>) -> Self {
        Self {
            math: config.math_enabled(),
            highlighter,
        }
    }

    fn options(&self) -> Options {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TABLES);
        if self.math {
            options.insert(Options::ENABLE_MATH);
        }
        options
    }

    pub fn render(&self, markdown: &str) -> String {
        let source = if self.math {
            Cow::Owned(normalize_latex_delimiters(markdown))
        } else {
            Cow::Borrowed(markdown)
        };

        let mut events = Vec::new();
        // (language, collected text) while inside a code block
        let mut code: Option<(Option<String>, String)> = None;

        for event in Parser::new_ext(&source, self.options()) {
            match event {
                Event::Start(Tag::CodeBlock(kind)) => {
                    let lang = match kind {
                        CodeBlockKind::Fenced(info) => {
                            info.split_whitespace().next().map(str::to_string)
                        }
                        CodeBlockKind::Indented => None,
                    };
                    code = Some((lang, String::new()));
                }
                Event::End(TagEnd::CodeBlock) => {
                    if let Some((lang, text)) = code.take() {
                        let highlighted = self.highlighter.highlight(&text, lang.as_deref());
                        events.push(Event::Html(CowStr::from(highlighted)));
                    }
                }
                Event::Text(text) => match code.as_mut() {
                    Some((_, buffer)) => buffer.push_str(&text),
                    None => events.push(Event::Text(text)),
                },
                Event::InlineMath(math) => {
                    events.push(Event::Html(CowStr::from(render_math_html(&math, false))))
                }
                Event::DisplayMath(math) => {
                    events.push(Event::Html(CowStr::from(render_math_html(&math, true))))
                }
                other => events.push(other),
            }
        }

        let mut html_out = String::new();
        html::push_html(&mut html_out, events.into_iter());
        html_out
    }
}

/// Rewrites `\(..\)` and `\[..\]` to dollar math. Fenced blocks and code spans
/// are copied through untouched.
fn normalize_latex_delimiters(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        let at_line_start = i == 0 || input.as_bytes()[i - 1] == b'\n';
        let fence_end = if at_line_start { fenced_block_end(input, i) } else { None };
        let code_end = fence_end
            .or_else(|| (input.as_bytes()[i] == b'`').then(|| code_span_end(input, i)));
        if let Some(end) = code_end {
            out.push_str(&input[i..end]);
            i = end;
            continue;
        }

        if let Some((open, close, display_mode)) = delimiter_at(input, i) {
            let content_start = i + open.len();
            if let Some(close_at) = input[content_start..].find(close) {
                let content_end = content_start + close_at;
                let content = &input[content_start..content_end];
                let fence = if display_mode || content.contains('\n') { "$$" } else { "$" };
                out.push_str(fence);
                out.push_str(content);
                out.push_str(fence);
                i = content_end + close.len();
                continue;
            }
        }

        if let Some(ch) = input[i..].chars().next() {
            out.push(ch);
            i += ch.len_utf8();
        } else {
            break;
        }
    }

    out
}

fn line_end(input: &str, start: usize) -> usize {
    input[start..].find('\n').map_or(input.len(), |n| start + n + 1)
}

/// End of the fenced code block opening on the line at `start`, if that line is a fence.
/// An unclosed fence runs to the end of the input.
fn fenced_block_end(input: &str, start: usize) -> Option<usize> {
    let first_end = line_end(input, start);
    let line = &input[start..first_end];
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let marker = trimmed.chars().next().filter(|c| *c == '`' || *c == '~')?;
    let fence_len = trimmed.chars().take_while(|c| *c == marker).count();
    if fence_len < 3 {
        return None;
    }

    let mut pos = first_end;
    while pos < input.len() {
        let next = line_end(input, pos);
        let candidate = input[pos..next].trim();
        if candidate.len() >= fence_len && candidate.chars().all(|c| c == marker) {
            return Some(next);
        }
        pos = next;
    }
    Some(input.len())
}

/// End of the code span opened by the backtick run at `start`. An unmatched run
/// covers only itself.
fn code_span_end(input: &str, start: usize) -> usize {
    let bytes = input.as_bytes();
    let run_at = |pos: usize| bytes[pos..].iter().take_while(|&&b| b == b'`').count();
    let opening = run_at(start);

    let mut pos = start + opening;
    while pos < bytes.len() {
        if bytes[pos] == b'`' {
            let run = run_at(pos);
            if run == opening {
                return pos + run;
            }
            pos += run;
        } else {
            pos += 1;
        }
    }
    start + opening
}

fn delimiter_at(input: &str, index: usize) -> Option<(&'static str, &'static str, bool)> {
    let tail = &input[index..];
    if tail.starts_with("\\(") {
        Some(("\\(", "\\)", false))
    } else if tail.starts_with("\\[") {
        Some(("\\[", "\\]", true))
    } else {
        None
    }
}

fn render_math_html(source: &str, display_mode: bool) -> String {
    let mut opts = katex::Opts::builder();
    opts.display_mode(display_mode);

    let rendered = match opts.build() {
        Ok(opts) => katex::render_with_opts(source, opts),
        Err(_) => return fallback_math_html(source, display_mode),
    };

    rendered.unwrap_or_else(|_| fallback_math_html(source, display_mode))
}

fn fallback_math_html(source: &str, display_mode: bool) -> String {
    let class_name = if display_mode { "math math-display" } else { "math math-inline" };
    format!(
        "<span class=\"{class_name}\">{}</span>",
        htmlescape::encode_minimal(source)
    )
}

#[cfg(test)]
mod tests {
    use scraper::{Html, Selector};

    use super::*;
    use crate::config::{RemarkPlugin, ThemesConfig};

    fn renderer(config: &MarkdownConfig) -> MarkdownRenderer {
        let highlighter = Highlighter::new(&ThemesConfig::default()).unwrap();
        MarkdownRenderer::new(config, Arc::new(highlighter))
    }

    fn render_markdown_to_html(markdown: &str) -> String {
        renderer(&MarkdownConfig::default()).render(markdown)
    }

    #[test]
    fn renders_math_with_latex_paren_and_bracket_delimiters() {
        let input = "\\(x^2\\) and \\[y^2\\]";
        let output = render_markdown_to_html(input);
        assert!(output.contains("katex"));
    }

    #[test]
    fn renders_multiline_paren_delimited_math() {
        let input = "Start \\( \\frac{2.24T}{2.08T}\n\\approx 1.077 \\) end";
        let output = render_markdown_to_html(input);
        assert!(output.contains("katex"));
    }

    #[test]
    fn renders_math_from_vectors_article() {
        let article = include_str!("articles/vectors.md");
        let output = render_markdown_to_html(article);
        assert!(output.contains("katex"));
    }

    #[test]
    fn latex_delimiters_inside_code_are_kept_verbatim() {
        let input = "Use `sed 's/\\(a\\)/b/'` here, and \\(x\\) there.\n\n```\ngrep \\(foo\\)\n```\n";
        let output = render_markdown_to_html(input);

        assert!(output.contains("\\(a\\)"), "{output}");
        assert!(output.contains("\\(foo\\)"), "{output}");
        assert!(!output.contains("$a$"));
        assert!(!output.contains("$foo$"));
        assert!(output.contains("katex"));
    }

    #[test]
    fn normalizer_skips_fences_and_code_spans() {
        let input = "\\(a\\)\n~~~~\n\\(b\\)\n~~~~\n``x \\(c\\) ` y`` \\[d\\]";
        assert_eq!(
            normalize_latex_delimiters(input),
            "$a$\n~~~~\n\\(b\\)\n~~~~\n``x \\(c\\) ` y`` $$d$$"
        );
    }

    #[test]
    fn unclosed_backticks_do_not_hide_math() {
        assert_eq!(normalize_latex_delimiters("a ` \\(b\\)"), "a ` $b$");
    }

    #[test]
    fn math_is_left_alone_without_the_math_plugin() {
        let config = MarkdownConfig {
            remark_plugins: Vec::<RemarkPlugin>::new(),
            ..MarkdownConfig::default()
        };
        let output = renderer(&config).render("Costs $5 and $6");
        assert!(!output.contains("katex"));
        assert!(output.contains("$5"));
    }

    #[test]
    fn fenced_code_is_highlighted_with_both_themes() {
        let output = render_markdown_to_html("```rust\nfn main() {}\n```\n");
        let document = Html::parse_fragment(&output);
        let pre = Selector::parse("pre.highlight").unwrap();
        let found = document.select(&pre).next().expect("highlighted block");

        assert_eq!(found.value().attr("data-theme-light"), Some("github-light"));
        assert_eq!(found.value().attr("data-theme-dark"), Some("github-dark"));
        assert!(found.text().collect::<String>().contains("fn main"));
    }

    #[test]
    fn inline_code_and_tables_render() {
        let output = render_markdown_to_html("`x`\n\n| a | b |\n|---|---|\n| 1 | 2 |\n");
        assert!(output.contains("<code>x</code>"));
        assert!(output.contains("<table>"));
    }

    #[test]
    fn fallback_math_escapes_source() {
        let html = fallback_math_html("<x>", false);
        assert_eq!(html, "<span class=\"math math-inline\">&lt;x&gt;</span>");
    }
}
