// src/ingest/scrape.rs
//! Fallback extraction from public search pages.
//!
//! Pages are walked tag by tag: every opening tag is matched once, card boundaries
//! come from the card selector, and fields are read from the first matching element
//! inside each card. Markup drifts, so every field is optional here; adapters decide
//! which ones are mandatory.

use once_cell::sync::OnceCell;
use regex::Regex;

use crate::ingest::{normalize_opt, normalize_text};

/// An element selector: tag name plus one class token it must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selector {
    pub tag: &'static str,
    pub class: &'static str,
}

impl Selector {
    pub const fn new(tag: &'static str, class: &'static str) -> Self {
        Self { tag, class }
    }
}

/// Per-provider description of a search-result card.
#[derive(Debug, Clone)]
pub struct CardLayout {
    pub card: Selector,
    /// Attribute on the card element holding the provider id, if any.
    pub id_attr: Option<&'static str>,
    pub title: Selector,
    pub company: Selector,
    pub location: Selector,
    /// Anchor whose `href` is the apply/detail link.
    pub link: Selector,
    pub stipend: Option<Selector>,
    pub duration: Option<Selector>,
    pub posted: Option<Selector>,
    /// Prefix for relative links.
    pub base_url: &'static str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScrapedCard {
    pub id: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub apply_url: Option<String>,
    pub stipend: Option<String>,
    pub duration: Option<String>,
    pub posted: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct OpenTag<'a> {
    name: &'a str,
    attrs: &'a str,
    start: usize,
    end: usize,
}

fn open_tag_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| Regex::new(r"(?s)<([A-Za-z][A-Za-z0-9]*)\b([^>]*)>").unwrap())
}

fn attr_re() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?s)([A-Za-z_:][-A-Za-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap()
    })
}

fn open_tags(html: &str) -> Vec<OpenTag<'_>> {
    open_tag_re()
        .captures_iter(html)
        .filter_map(|c| {
            let whole = c.get(0)?;
            Some(OpenTag {
                name: c.get(1)?.as_str(),
                attrs: c.get(2).map(|m| m.as_str()).unwrap_or(""),
                start: whole.start(),
                end: whole.end(),
            })
        })
        .collect()
}

/// Value of attribute `name` within an opening tag's attribute text.
fn attr(attrs: &str, name: &str) -> Option<String> {
    attr_re().captures_iter(attrs).find_map(|c| {
        if !c[1].eq_ignore_ascii_case(name) {
            return None;
        }
        c.get(2)
            .or_else(|| c.get(3))
            .map(|m| html_escape::decode_html_entities(m.as_str()).to_string())
    })
}

fn selects(tag: &OpenTag<'_>, sel: Selector) -> bool {
    tag.name.eq_ignore_ascii_case(sel.tag)
        && attr(tag.attrs, "class")
            .map(|cls| cls.split_whitespace().any(|c| c == sel.class))
            .unwrap_or(false)
}

/// Inner HTML of an element starting right after its opening tag, up to the first
/// closing tag of the same name.
fn inner_html<'a>(html: &'a str, tag: &OpenTag<'_>) -> &'a str {
    let rest = &html[tag.end..];
    let closing = format!("</{}", tag.name.to_ascii_lowercase());
    match rest.to_ascii_lowercase().find(&closing) {
        Some(idx) => &rest[..idx],
        None => rest,
    }
}

fn field(segment: &str, tags: &[OpenTag<'_>], sel: Selector) -> Option<String> {
    tags.iter()
        .find(|t| selects(t, sel))
        .and_then(|t| normalize_opt(Some(inner_html(segment, t))))
}

/// Resolve a possibly relative link against `base`.
pub fn absolute_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("https://{rest}"));
    }
    let base = base.trim_end_matches('/');
    if href.starts_with('/') {
        Some(format!("{base}{href}"))
    } else {
        Some(format!("{base}/{href}"))
    }
}

/// Extract every card on the page. Cards missing fields are still returned.
pub fn extract_cards(html: &str, layout: &CardLayout) -> Vec<ScrapedCard> {
    let all = open_tags(html);
    let starts: Vec<&OpenTag<'_>> = all.iter().filter(|t| selects(t, layout.card)).collect();

    let mut out = Vec::with_capacity(starts.len());
    for (i, card) in starts.iter().enumerate() {
        let end = starts.get(i + 1).map(|n| n.start).unwrap_or(html.len());
        let segment = &html[card.start..end];
        // Re-scan inside the segment so offsets are segment-relative.
        let tags = open_tags(segment);

        let apply_url = tags
            .iter()
            .find(|t| selects(t, layout.link))
            .and_then(|t| attr(t.attrs, "href"))
            .and_then(|href| absolute_url(layout.base_url, &href));

        out.push(ScrapedCard {
            id: layout
                .id_attr
                .and_then(|a| attr(card.attrs, a))
                .map(|v| normalize_text(&v))
                .filter(|v| !v.is_empty()),
            title: field(segment, &tags, layout.title),
            company: field(segment, &tags, layout.company),
            location: field(segment, &tags, layout.location),
            apply_url,
            stipend: layout.stipend.and_then(|s| field(segment, &tags, s)),
            duration: layout.duration.and_then(|s| field(segment, &tags, s)),
            posted: layout.posted.and_then(|s| field(segment, &tags, s)),
        });
    }
    out
}
