//! Currency-tagged price extraction from rendered pages
//!
//! Portal markup changes without notice, so prices are not located through
//! CSS selectors. The rendered HTML is flattened into visible text and scanned
//! for amount tokens that carry an explicit currency tag, either as a prefix
//! (`€ 1.250`, `EUR 99,50`) or as a suffix (`450 €`, `1 250,00 EUR`).
//!
//! A false positive here turns into a false alert, so anything that is not
//! unambiguously monetary is dropped: untagged numbers, amounts glued to
//! letters or other digits, percentages and zero amounts.

use std::str::FromStr;

use regex::Regex;
use rust_decimal::Decimal;
use scraper::{ElementRef, Html, Selector};

use crate::models::{Currency, PortalId, PriceSample};

/// Amount body: digit groups with thousands separators, or plain digits, each
/// with an optional 1-2 digit decimal tail. A plain space also groups
/// thousands (`2 450 €`).
const AMOUNT: &str = "[0-9]{1,3}(?:[.,\u{a0}\u{202f} ][0-9]{3})+(?:[.,][0-9]{1,2})?|[0-9]+(?:[.,][0-9]{1,2})?";

/// At most one space between tag and amount, never a line break.
const GAP: &str = "[ \u{a0}\u{202f}]?";

const SKIPPED_ELEMENTS: &[&str] = &["script", "style", "noscript", "template", "head", "svg"];

const INLINE_ELEMENTS: &[&str] = &[
    "a", "abbr", "b", "bdi", "bdo", "cite", "code", "data", "del", "dfn", "em", "font", "i",
    "ins", "kbd", "label", "mark", "q", "s", "samp", "small", "span", "strong", "sub", "sup",
    "time", "u", "var",
];

pub struct PriceExtractor {
    currency: Currency,
    pattern: Regex,
    leading_tag: Regex,
}

impl PriceExtractor {
    pub fn new(currency: Currency) -> Self {
        let symbol = regex::escape(currency.symbol());
        let code = currency.code();
        let pattern = format!(
            r"(?:{symbol}|\b{code}){GAP}(?P<prefixed>{AMOUNT})|(?P<suffixed>{AMOUNT}){GAP}(?P<tag>{symbol}|{code}\b)"
        );
        let leading_tag = format!(r"^{GAP}(?:{symbol}|{code}\b)");

        Self {
            currency,
            // Both patterns are built from constants.
            pattern: Regex::new(&pattern).expect("price pattern is valid"),
            leading_tag: Regex::new(&leading_tag).expect("tag pattern is valid"),
        }
    }

    /// Extract every tagged price from already flattened text, in document
    /// order. Identical amounts are kept: a page may list several tickets at
    /// the same price.
    pub fn extract(&self, text: &str, portal: &PortalId) -> Vec<PriceSample> {
        let mut samples = Vec::new();
        let mut pos = 0;

        while let Some(caps) = self.pattern.captures_at(text, pos) {
            let Some(whole) = caps.get(0) else { break };

            let amount = if let Some(amount) = caps.name("prefixed") {
                pos = whole.end();
                closes_cleanly(&text[whole.end()..]).then_some(amount)
            } else if let (Some(amount), Some(tag)) = (caps.name("suffixed"), caps.name("tag")) {
                // "Row 1 €450": the symbol belongs to the amount after it.
                if self.introduces_untagged_amount(text, tag.start()) {
                    pos = tag.start();
                    continue;
                }
                pos = whole.end();
                opens_cleanly(&text[..amount.start()]).then_some(amount)
            } else {
                pos = whole.end();
                None
            };

            if let Some(value) = amount.and_then(|m| parse_amount(m.as_str()))
                && value > Decimal::ZERO
            {
                samples.push(PriceSample {
                    amount: value,
                    currency: self.currency,
                    source_portal: portal.clone(),
                });
            }
        }

        samples
    }

    /// Whether the tag at `at` starts a prefixed amount that has no suffix
    /// tag of its own.
    fn introduces_untagged_amount(&self, text: &str, at: usize) -> bool {
        self.pattern
            .captures_at(text, at)
            .filter(|caps| caps.get(0).is_some_and(|m| m.start() == at))
            .and_then(|caps| caps.name("prefixed").map(|m| m.end()))
            .is_some_and(|end| !self.leading_tag.is_match(&text[end..]))
    }

    /// Flatten `html` and extract its prices.
    pub fn extract_from_html(&self, html: &str, portal: &PortalId) -> Vec<PriceSample> {
        self.extract(&visible_text(html), portal)
    }
}

/// The amount must not continue a word, a number or a date. A single space
/// after a digit still continues the number: `2 4500 €` is not `€4500`.
fn opens_cleanly(before: &str) -> bool {
    let mut rev = before.chars().rev();
    match rev.next() {
        None => true,
        Some(' ' | '\u{a0}' | '\u{202f}') => !rev.next().is_some_and(|c| c.is_ascii_digit()),
        Some(c) => !(c.is_alphanumeric() || matches!(c, '.' | ',' | '/' | ':')),
    }
}

/// A prefixed amount must not run into letters, more digits or a percent sign.
fn closes_cleanly(after: &str) -> bool {
    match after.chars().next() {
        None => true,
        Some(c) => !(c.is_alphanumeric() || c == '%'),
    }
}

/// Normalise either separator convention into a decimal.
///
/// A final `.` or `,` followed by one or two digits is the decimal point;
/// every other separator is a thousands separator.
fn parse_amount(token: &str) -> Option<Decimal> {
    let compact: String = token
        .chars()
        .filter(|c| !matches!(c, ' ' | '\u{a0}' | '\u{202f}'))
        .collect();

    let decimal_at = compact
        .rfind(['.', ','])
        .filter(|&idx| matches!(compact.len() - idx - 1, 1 | 2));

    let normalized: String = compact
        .char_indices()
        .filter_map(|(idx, c)| match c {
            '.' | ',' if Some(idx) == decimal_at => Some('.'),
            '.' | ',' => None,
            _ => Some(c),
        })
        .collect();

    Decimal::from_str(&normalized).ok()
}

/// Approximate the browser's `innerText` of the document body.
///
/// Text inside inline elements is concatenated, block level elements start a
/// new line, and ASCII whitespace runs collapse into one space.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    let body = Selector::parse("body").ok().and_then(|s| document.select(&s).next());
    match body {
        Some(body) => walk(body, &mut out),
        None => walk(document.root_element(), &mut out),
    }

    out
}

fn walk(element: ElementRef<'_>, out: &mut String) {
    let name = element.value().name();
    if SKIPPED_ELEMENTS.contains(&name) {
        return;
    }

    let block = !INLINE_ELEMENTS.contains(&name);
    if block {
        out.push('\n');
    }

    for child in element.children() {
        if let Some(child_element) = ElementRef::wrap(child) {
            walk(child_element, out);
        } else if let Some(text) = child.value().as_text() {
            push_collapsed(text, out);
        }
    }

    if block {
        out.push('\n');
    }
}

fn push_collapsed(text: &str, out: &mut String) {
    let mut in_space = out.ends_with([' ', '\n']);
    for c in text.chars() {
        if c.is_ascii_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(c);
            in_space = false;
        }
    }
}
