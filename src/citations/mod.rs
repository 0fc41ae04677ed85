// src/citations/mod.rs
// Citation Resolver: retrieval references and marker substitution in rendered output

pub mod popover;

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

pub use popover::{Placement, PopoverLayer, Rect, Size, Viewport, place_popover};

const UNKNOWN_SOURCE: &str = "Unknown Source";
const UNKNOWN_PAGE: &str = "n/a";
const UNTITLED: &str = "Untitled Document";

/// Default excerpt length shown in the popover
pub const DEFAULT_EXCERPT_CHARS: usize = 200;

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("valid regex"));
static RE_CITATION_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\[\s*citation:\s*(\d+)\s*\]").expect("valid regex"));

/// Source metadata attached to a context entry. Every field is optional.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CitationMetadata {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub page: Option<Value>,
    #[serde(default)]
    pub page_label: Option<Value>,
    #[serde(default)]
    pub title: Option<String>,
}

/// A retrieval reference collected during a turn
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    /// 1-based ordinal in arrival order
    pub id: usize,
    pub text: String,
    pub metadata: CitationMetadata,
}

/// Citation metadata with fallbacks applied, ready for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CitationRef {
    pub id: usize,
    pub excerpt: String,
    pub source: String,
    pub page: String,
    pub title: String,
}

impl Citation {
    /// Resolve display fields. `page_label` wins over `page`, title falls
    /// back to source.
    pub fn resolve(&self, excerpt_chars: usize) -> CitationRef {
        let source = non_empty(self.metadata.source.as_deref())
            .unwrap_or(UNKNOWN_SOURCE)
            .to_string();
        let page = self
            .metadata
            .page_label
            .as_ref()
            .and_then(display_value)
            .or_else(|| self.metadata.page.as_ref().and_then(display_value))
            .unwrap_or_else(|| UNKNOWN_PAGE.to_string());
        let title = non_empty(self.metadata.title.as_deref())
            .or_else(|| non_empty(self.metadata.source.as_deref()))
            .unwrap_or(UNTITLED)
            .to_string();

        CitationRef {
            id: self.id,
            excerpt: excerpt(&self.text, excerpt_chars),
            source,
            page,
            title,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}

fn display_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Collapse whitespace and cut to `max_chars`, always suffixed with "...".
pub fn excerpt(text: &str, max_chars: usize) -> String {
    let collapsed = RE_WHITESPACE.replace_all(text, " ");
    let mut short: String = collapsed.trim().chars().take(max_chars).collect();
    short.push_str("...");
    short
}

/// Keep the first citation for each id, preserving arrival order.
pub fn dedup_by_id(citations: &[Citation]) -> Vec<Citation> {
    let mut seen = HashSet::new();
    citations
        .iter()
        .filter(|c| seen.insert(c.id))
        .cloned()
        .collect()
}

fn reference_html(citation: &CitationRef) -> String {
    use html_escape::{encode_double_quoted_attribute as attr, encode_text};

    format!(
        r#"<sup class="citation" data-id="{id}" data-text="{text}" data-source="{source}" data-page="{page}" data-title="{title}">[{label}]</sup>"#,
        id = citation.id,
        text = attr(&citation.excerpt),
        source = attr(&citation.source),
        page = attr(&citation.page),
        title = attr(&citation.title),
        label = encode_text(&citation.id.to_string()),
    )
}

/// Replace every `[ citation: k ]` marker in `html` with an interactive
/// reference for citation `k`.
///
/// Runs once per turn on the final rendered output, in a single pass, so
/// markers inside inserted attributes are never rewritten. Markers whose id
/// has no citation are left as they are. With duplicate ids the first
/// citation wins.
pub fn substitute(html: &str, citations: &[Citation], excerpt_chars: usize) -> (String, Vec<CitationRef>) {
    let mut by_id: HashMap<usize, &Citation> = HashMap::new();
    for citation in citations {
        by_id.entry(citation.id).or_insert(citation);
    }

    let mut resolved: HashMap<usize, CitationRef> = HashMap::new();
    let output = RE_CITATION_MARKER
        .replace_all(html, |caps: &Captures| {
            let marker = caps[0].to_string();
            let Some(citation) = caps[1].parse::<usize>().ok().and_then(|id| by_id.get(&id)) else {
                return marker;
            };
            let reference = resolved
                .entry(citation.id)
                .or_insert_with(|| citation.resolve(excerpt_chars));
            reference_html(reference)
        })
        .into_owned();

    let attached: Vec<CitationRef> = dedup_by_id(citations)
        .iter()
        .filter_map(|c| resolved.remove(&c.id))
        .collect();

    debug!("Attached {} of {} citations", attached.len(), citations.len());
    (output, attached)
}
