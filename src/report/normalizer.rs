//! Plain-text normalization of agent answers.
//!
//! Model output arrives with escaped newlines, Markdown, console style tags
//! and inconsistent list markers. [`TextNormalizer`] runs a fixed sequence
//! of passes over it and produces terminal-friendly report text:
//! paragraphs separated by exactly one blank line, `• ` bullets, `N. `
//! ordinals and `key: value` pairs.

use regex::Regex;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::{debug, error, warn};

/// Returned when the input is empty or whitespace.
pub const NO_RESULT: &str = "No analysis result was returned.";

/// Returned when normalization leaves nothing behind.
pub const NO_CONTENT: &str = "Analysis finished, but no specific content was produced.";

/// Prefix of the fallback output when the pipeline itself fails.
pub const FALLBACK_NOTICE: &str = "Failed to format the result; original output:";

/// Failures inside a single normalization pass.
#[derive(Debug, Clone, Error)]
pub enum FormatError {
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
}

/// Markup rules applied in order by the stripping pass.
const MARKUP_RULES: &[(&str, &str)] = &[
    // console style tags: [bold red], [grey50], [b], [link=...], [/red], [/]
    (
        r"\[/?(?:(?:(?:not\s+)?(?:bold|b|dim|italic|i|underline2?|u|strike|reverse|blink2?|conceal|overline|frame|encircle|default|(?:bright_)?(?:red|green|yellow|blue|magenta|cyan|white|black)\d{0,2}|gr[ae]y\d{0,3}|on)\b|#[0-9a-fA-F]{6}|color\(\d{1,3}\)|rgb\(\d{1,3},\d{1,3},\d{1,3}\)|link=[^\]\n]*|link\b)\s*)+\]|\[/\]",
        "",
    ),
    (r"\*\*([^*\n]+)\*\*", "${1}"),
    (r"(?m)(^|[^A-Za-z0-9*])\*([^\s*](?:[^*\n]*[^\s*])?)\*", "${1}${2}"),
    (r"(?m)(^|[^A-Za-z0-9_])__([^\s_](?:[^_\n]*[^\s_])?)__([^A-Za-z0-9_]|$)", "${1}${2}${3}"),
    (r"(?m)(^|[^A-Za-z0-9_])_([^\s_](?:[^_\n]*[^\s_])?)_([^A-Za-z0-9_]|$)", "${1}${2}${3}"),
    (r"(?m)^[ \t]*#+[ \t]*", ""),
    (r"```[a-zA-Z0-9_+-]*\n?", ""),
    (r"```", ""),
    (r"`([^`\n]+)`", "${1}"),
    (r"\*\*", ""),
];

/// Section titles that get promoted to `Title:` headings.
const HEADING_KEYWORDS: &[&str] = &[
    "分析摘要",
    "详细数据",
    "详细统计",
    "关键发现",
    "统计结果",
    "趋势分析",
    "异常检测",
    "建议措施",
    "建议",
    "总结",
    "结论",
    "summary",
    "analysis summary",
    "statistics",
    "detailed statistics",
    "key findings",
    "trend analysis",
    "trends",
    "anomaly detection",
    "anomalies",
    "recommendations",
    "recommendation",
    "conclusion",
    "conclusions",
];

/// Lines longer than this only count as headings on an exact keyword match.
const SHORT_HEADING_CHARS: usize = 16;

struct Rule {
    pattern: Regex,
    replacement: String,
}

struct LinePatterns {
    quote: Regex,
    dot_bullet: Regex,
    mark_bullet: Regex,
    paren_ordinal: Regex,
    dot_ordinal: Regex,
}

struct FinishPatterns {
    blank_runs: Regex,
    percent: Regex,
    unit: Regex,
    timestamp: Regex,
}

impl LinePatterns {
    fn build() -> Result<Self, FormatError> {
        Ok(Self {
            quote: compile(r"^[>|]+\s*")?,
            dot_bullet: compile(r"^•\s*")?,
            mark_bullet: compile(r"^[-*+]\s+")?,
            paren_ordinal: compile(r"^(\d{1,3})\)\s*")?,
            dot_ordinal: compile(r"^(\d{1,3})\.\s*([^\d\s]|$)")?,
        })
    }
}

impl FinishPatterns {
    fn build() -> Result<Self, FormatError> {
        Ok(Self {
            blank_runs: compile(r"\n{3,}")?,
            percent: compile(r"(\d)[ \t]+%")?,
            unit: compile(r"(\d)[ \t]+(KB|MB|GB|TB|ms|s)\b")?,
            timestamp: compile(r"(\d{4}-\d{2}-\d{2})[ \t]+(\d{2}:\d{2}:\d{2})")?,
        })
    }
}

fn compile(pattern: &str) -> Result<Regex, FormatError> {
    Regex::new(pattern).map_err(|source| FormatError::InvalidPattern {
        pattern: pattern.to_string(),
        source,
    })
}

/// Multi-pass normalizer for agent answers. Built once; passes run in a fixed order.
pub struct TextNormalizer {
    markup: Result<Vec<Rule>, FormatError>,
    lines: Result<LinePatterns, FormatError>,
    finish: Result<FinishPatterns, FormatError>,
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextNormalizer {
    pub fn new() -> Self {
        Self::with_markup_rules(MARKUP_RULES)
    }

    /// Build a normalizer with a custom markup rule table.
    ///
    /// A rule that fails to compile disables the markup pass only; the
    /// failure is reported each time that pass is skipped.
    pub fn with_markup_rules(rules: &[(&str, &str)]) -> Self {
        let markup = rules
            .iter()
            .map(|(pattern, replacement)| -> Result<Rule, FormatError> {
                Ok(Rule {
                    pattern: compile(pattern)?,
                    replacement: replacement.to_string(),
                })
            })
            .collect::<Result<Vec<_>, FormatError>>();

        Self {
            markup,
            lines: LinePatterns::build(),
            finish: FinishPatterns::build(),
        }
    }

    /// Normalize an agent answer into report text.
    ///
    /// Never returns an empty string and never fails: a pass that cannot run
    /// is skipped, and if the pipeline breaks down entirely the original
    /// text is returned behind [`FALLBACK_NOTICE`].
    pub fn format_result(&self, text: &str) -> String {
        if text.trim().is_empty() {
            return NO_RESULT.to_string();
        }

        match panic::catch_unwind(AssertUnwindSafe(|| self.run_pipeline(text))) {
            Ok(formatted) if formatted.is_empty() => NO_CONTENT.to_string(),
            Ok(formatted) => formatted,
            Err(_) => {
                error!("Text normalization aborted, returning the original output");
                format!("{}\n{}", FALLBACK_NOTICE, text)
            }
        }
    }

    fn run_pipeline(&self, text: &str) -> String {
        let text = unescape(text);
        let text = self.apply("markup", text, Self::strip_markup);
        let text = self.detect_structure(&text);
        let text = self.apply("lines", text, Self::format_lines);
        let text = self.apply("finish", text, Self::finish);
        text.trim().to_string()
    }

    fn apply(
        &self,
        stage: &str,
        text: String,
        pass: fn(&Self, &str) -> Result<String, FormatError>,
    ) -> String {
        match pass(self, &text) {
            Ok(next) => next,
            Err(e) => {
                warn!("Skipping {} pass: {}", stage, e);
                text
            }
        }
    }

    /// Escape handling and markup removal only, for error details.
    pub(crate) fn clean_basic(&self, text: &str) -> String {
        let text = unescape(text);
        self.apply("markup", text, Self::strip_markup)
            .trim()
            .to_string()
    }

    fn strip_markup(&self, text: &str) -> Result<String, FormatError> {
        let rules = self.markup.as_ref().map_err(Clone::clone)?;
        let mut text = text.to_string();
        for rule in rules {
            text = rule
                .pattern
                .replace_all(&text, rule.replacement.as_str())
                .into_owned();
        }
        Ok(text)
    }

    /// Tables collapse to `  a | b` rows; section titles become headings.
    fn detect_structure(&self, text: &str) -> String {
        let mut out: Vec<String> = Vec::new();

        for raw in text.split('\n') {
            let line = raw.trim();
            if line.is_empty() {
                out.push(String::new());
                continue;
            }

            if line.matches('|').count() >= 2 {
                let cells: Vec<&str> = line
                    .split('|')
                    .map(str::trim)
                    .filter(|cell| !cell.is_empty() && !is_separator_cell(cell))
                    .collect();
                if !cells.is_empty() {
                    out.push(format!("  {}", cells.join(" | ")));
                }
                continue;
            }

            if let Some(title) = heading_title(line) {
                if out.last().is_some_and(|prev| !prev.is_empty()) {
                    out.push(String::new());
                }
                out.push(format!("{}:", title));
                continue;
            }

            out.push(line.to_string());
        }

        out.join("\n")
    }

    fn format_lines(&self, text: &str) -> Result<String, FormatError> {
        let patterns = self.lines.as_ref().map_err(Clone::clone)?;
        let mut out: Vec<String> = Vec::new();
        let mut in_list = false;

        for raw in text.split('\n') {
            if is_table_row(raw) {
                out.push(raw.trim_end().to_string());
                in_list = false;
                continue;
            }

            let line = raw.trim();
            if line.is_empty() {
                if out.last().is_some_and(|prev| !prev.is_empty()) {
                    out.push(String::new());
                }
                in_list = false;
                continue;
            }

            let formatted = format_line(patterns, line);
            let list_item = is_list_item(&formatted);
            if list_item && !in_list && out.last().is_some_and(|prev| !prev.is_empty()) {
                out.push(String::new());
            }
            out.push(formatted);
            in_list = list_item;
        }

        Ok(out.join("\n"))
    }

    fn finish(&self, text: &str) -> Result<String, FormatError> {
        let patterns = self.finish.as_ref().map_err(Clone::clone)?;

        let text = patterns.blank_runs.replace_all(text, "\n\n");
        let text = paragraph_spacing(text.trim());
        let text = patterns.percent.replace_all(&text, "${1}%");
        let text = patterns.unit.replace_all(&text, "${1}${2}");
        let text = patterns.timestamp.replace_all(&text, "${1} ${2}");
        let text = space_after_colons(&text);

        debug!("Normalized report: {} chars", text.len());
        Ok(text.trim().to_string())
    }
}

fn unescape(text: &str) -> String {
    text.replace("\\\\", "\\")
        .replace("\\n", "\n")
        .replace("\\t", "    ")
        .replace("\\r", "\r")
        .replace("\\\"", "\"")
        .replace("\\'", "'")
}

fn is_separator_cell(cell: &str) -> bool {
    cell.contains('-') && cell.chars().all(|c| matches!(c, '-' | ':' | ' '))
}

fn is_table_row(line: &str) -> bool {
    line.starts_with("  ") && line.contains(" | ")
}

fn is_list_item(line: &str) -> bool {
    if line.starts_with("• ") {
        return true;
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    (1..=3).contains(&digits) && line[digits..].starts_with(". ")
}

fn looks_like_list_marker(line: &str) -> bool {
    if line.starts_with('•') || line.starts_with("- ") || line.starts_with("* ") || line.starts_with("+ ")
    {
        return true;
    }
    let digits = line.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && (line[digits..].starts_with('.') || line[digits..].starts_with(')'))
}

/// The heading title for `line`, without its trailing colon, if it is one.
fn heading_title(line: &str) -> Option<&str> {
    let title = line.trim_end_matches([':', '：']).trim_end();
    if title.is_empty()
        || title.contains([':', '：'])
        || title.ends_with(['.', '。', '!', '！', '?', '？'])
        || looks_like_list_marker(title)
    {
        return None;
    }

    let lower = title.to_lowercase();
    let exact = HEADING_KEYWORDS.iter().any(|k| lower == *k);
    let short = title.chars().count() <= SHORT_HEADING_CHARS
        && HEADING_KEYWORDS.iter().any(|k| lower.contains(k));
    (exact || short).then_some(title)
}

fn format_line(patterns: &LinePatterns, line: &str) -> String {
    let line = patterns.quote.replace(line, "");
    let line = patterns.dot_bullet.replace(&line, "• ");
    let line = patterns.mark_bullet.replace(&line, "• ");
    let line = patterns.paren_ordinal.replace(&line, "${1}. ");
    let line = patterns.dot_ordinal.replace(&line, "${1}. ${2}");
    let line = line.trim_end();

    if line.ends_with(':') {
        return line.to_string();
    }
    match separator_colon(line) {
        Some(i) => {
            let key = line[..i].trim_end();
            let value = line[i + 1..].trim();
            if value.is_empty() {
                line.to_string()
            } else {
                format!("{}: {}", key, value)
            }
        }
        None => line.to_string(),
    }
}

/// Byte offsets of colons that separate text, skipping clock times and URL schemes.
fn separator_colons(text: &str) -> impl Iterator<Item = usize> + '_ {
    text.char_indices().filter_map(move |(i, c)| {
        if c != ':' {
            return None;
        }
        let rest = &text[i + 1..];
        let before = text[..i].chars().next_back();
        let after = rest.chars().next();
        let clock = before.is_some_and(|b| b.is_ascii_digit()) && after.is_some_and(|a| a.is_ascii_digit());
        if clock || rest.starts_with("//") {
            None
        } else {
            Some(i)
        }
    })
}

fn separator_colon(line: &str) -> Option<usize> {
    separator_colons(line).next()
}

/// Blank line after a heading or colon-terminated line when a paragraph follows.
fn paragraph_spacing(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());

    for (i, line) in lines.iter().copied().enumerate() {
        out.push(line);
        let Some(next) = lines.get(i + 1) else {
            continue;
        };
        if line.is_empty() || next.is_empty() || is_list_item(line) || is_list_item(next) {
            continue;
        }
        if line.ends_with(':') || heading_title(line).is_some() {
            out.push("");
        }
    }

    out.join("\n")
}

/// Exactly one space after each separating colon that is followed by text.
fn space_after_colons(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 16);
    let mut last = 0;

    for i in separator_colons(text) {
        out.push_str(&text[last..=i]);
        let rest = &text[i + 1..];
        let gap = rest.len() - rest.trim_start_matches([' ', '\t']).len();
        let following = &rest[gap..];
        if following.is_empty() || following.starts_with(['\n', '\r']) {
            last = i + 1;
        } else {
            out.push(' ');
            last = i + 1 + gap;
        }
    }

    out.push_str(&text[last..]);
    out
}
