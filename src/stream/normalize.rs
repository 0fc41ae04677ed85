// src/stream/normalize.rs
// Cleanup pass turning a space-joined token stream into renderable markdown

use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Longest run of single characters that is rejoined into one token
const MAX_REJOIN_LEN: usize = 10;

/// Upper bound on passes when normalizing to a fixpoint
const MAX_PASSES: usize = 8;

static RE_SINGLE_CHAR_RUN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Za-z0-9](?: [A-Za-z0-9]\b){2,}").expect("valid regex"));
static RE_SPACE_BEFORE_PUNCT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s+([,.:;!?])").expect("valid regex"));
static RE_EMPHASIS_PADDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\*\*|__)\s*(.*?)\s*(\*\*|__)").expect("valid regex"));
static RE_INLINE_CODE_PADDING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"` +([^`]+?) +`").expect("valid regex"));
static RE_FENCE_LANGUAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```[ \t]+([A-Za-z][\w+#-]*)").expect("valid regex"));
static RE_LINE_CONTINUATION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\\\n\s*").expect("valid regex"));
static RE_EXCESS_NEWLINES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("valid regex"));
static RE_HORIZONTAL_SPACE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[ \t]{2,}").expect("valid regex"));

fn is_markdown_marker(c: char) -> bool {
    matches!(c, '*' | '_' | '`')
}

/// "A G R A" -> "AGRA", unless the run touches emphasis or code markers.
fn rejoin_single_chars(text: &str) -> String {
    RE_SINGLE_CHAR_RUN
        .replace_all(text, |caps: &Captures| {
            let run = caps.get(0).map_or("", |m| m.as_str());
            let (start, end) = caps.get(0).map_or((0, 0), |m| (m.start(), m.end()));

            let before = text[..start].chars().next_back();
            let after = text[end..].chars().next();
            let touches_marker = before.is_some_and(is_markdown_marker)
                || after.is_some_and(is_markdown_marker)
                || run.chars().any(is_markdown_marker);

            let despaced: String = run.chars().filter(|c| *c != ' ').collect();
            if touches_marker || despaced.len() > MAX_REJOIN_LEN {
                run.to_string()
            } else {
                despaced
            }
        })
        .into_owned()
}

/// Merge lines into paragraphs. A line joins the current paragraph unless
/// the paragraph already ends a sentence; blank lines always break.
fn reparagraph(text: &str) -> String {
    let mut paragraphs: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for line in text.split('\n') {
        if line.is_empty() {
            if !buffer.is_empty() {
                paragraphs.push(buffer.trim().to_string());
                buffer.clear();
            }
        } else if buffer.is_empty() {
            buffer.push_str(line);
        } else if buffer.ends_with(['.', '!', '?']) {
            paragraphs.push(buffer.trim().to_string());
            buffer = line.to_string();
        } else {
            buffer.push(' ');
            buffer.push_str(line);
        }
    }

    if !buffer.is_empty() {
        paragraphs.push(buffer.trim().to_string());
    }

    paragraphs.join("\n\n")
}

fn normalize_pass(raw: &str) -> String {
    let text = rejoin_single_chars(raw);
    let text = RE_SPACE_BEFORE_PUNCT.replace_all(&text, "$1");
    let text = RE_EMPHASIS_PADDING.replace_all(&text, "$1$2$3");
    let text = RE_INLINE_CODE_PADDING.replace_all(&text, "`$1`");
    let text = RE_FENCE_LANGUAGE.replace_all(&text, "```$1");
    let text = RE_LINE_CONTINUATION.replace_all(&text, "");
    let text = RE_EXCESS_NEWLINES.replace_all(&text, "\n\n");
    let text = RE_HORIZONTAL_SPACE.replace_all(&text, " ");

    let trimmed: Vec<&str> = text.split('\n').map(str::trim).collect();
    reparagraph(&trimmed.join("\n"))
}

/// Normalize an accumulated buffer into markdown.
///
/// The pass is repeated until it stops changing the text, so feeding the
/// output back in returns it unchanged.
pub fn normalize(raw: &str) -> String {
    let mut current = normalize_pass(raw);
    for _ in 1..MAX_PASSES {
        let next = normalize_pass(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}
