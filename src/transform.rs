//! Rewrites document markup so every Pali word links to a dictionary lookup.
//!
//! The transformer works in three passes over the body of a document. Tags are
//! split out first and copied through untouched, bracketed references such as
//! `[PTS Page 001]` are split out of the remaining text and styled, and what is
//! left is tokenized into words that become lookup links. Each pass is a single
//! left-to-right scan of the span handed down by the previous one.

use once_cell::sync::Lazy;
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::iter::Peekable;
use std::str::CharIndices;
use unicode_general_category::{GeneralCategory, get_general_category};

pub const DEFAULT_DICTIONARY_URL: &str = "https://dpdict.net/";
pub const DEFAULT_LOOKUP_MODE: &str = "dpd";

const BODY_OPEN: &[u8] = b"<body";
const BODY_CLOSE: &[u8] = b"</body>";
const WORD_LINK_CLASS: &str = "pali-word";
const WORD_LINK_TARGET: &str = "other";
const REFERENCE_OPEN: &str = r#"<span class="reference">"#;
const REFERENCE_CLOSE: &str = "</span>";
const QUOTE_CHARS: &[char] = &['\'', '"', '\u{2018}', '\u{2019}', '\u{201C}', '\u{201D}'];

/// Query escaping: unreserved characters stay, everything else is `%XX`.
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

static DEFAULT_TRANSFORMER: Lazy<Transformer> = Lazy::new(Transformer::default);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SpanKind {
    Markup,
    Reference,
    Word,
    Text,
}

/// Half-open byte range over a scanned string. Offsets always sit on UTF-8
/// character boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
    pub kind: SpanKind,
}

impl Span {
    pub const fn new(start: usize, end: usize, kind: SpanKind) -> Self {
        Self { start, end, kind }
    }

    pub fn as_str<'a>(&self, text: &'a str) -> &'a str {
        &text[self.start..self.end]
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Returns the part of `text` between the opening and closing body tags.
///
/// Missing markers widen the region to the start or end of the text. An
/// opening `<body` that is never closed by `>` keeps the region starting at the
/// unclosed tag.
pub fn isolate_body(text: &str) -> &str {
    let bytes = text.as_bytes();
    let start = match find_ascii_ci(bytes, BODY_OPEN) {
        Some(open) => match bytes[open..].iter().position(|&b| b == b'>') {
            Some(offset) => open + offset + 1,
            None => open,
        },
        None => 0,
    };
    let end = match rfind_ascii_ci(bytes, BODY_CLOSE) {
        Some(close) if close >= start => close,
        _ => text.len(),
    };
    &text[start..end]
}

fn find_ascii_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window.eq_ignore_ascii_case(needle))
}

fn rfind_ascii_ci(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .rposition(|window| window.eq_ignore_ascii_case(needle))
}

/// Splits `text` into `Markup` spans (`<...>` with a non-empty interior) and
/// the `Text` spans between them.
pub fn markup_spans(text: &str) -> DelimitedSpans<'_> {
    DelimitedSpans::new(text, b'<', b'>', SpanKind::Markup)
}

/// Splits `text` into `Reference` spans (`[...]` with a non-empty interior)
/// and the `Text` spans between them.
pub fn reference_spans(text: &str) -> DelimitedSpans<'_> {
    DelimitedSpans::new(text, b'[', b']', SpanKind::Reference)
}

/// Iterator over delimiter-bounded spans and the gaps between them.
///
/// Matching is leftmost and non-overlapping: a span opens at the first `open`
/// byte that is followed, after at least one other byte, by a `close` byte, and
/// ends at that first `close`. Delimiters are ASCII, so byte scanning never
/// lands inside a multi-byte character.
pub struct DelimitedSpans<'a> {
    text: &'a str,
    open: u8,
    close: u8,
    kind: SpanKind,
    pos: usize,
    pending: Option<Span>,
    exhausted: bool,
}

impl<'a> DelimitedSpans<'a> {
    fn new(text: &'a str, open: u8, close: u8, kind: SpanKind) -> Self {
        Self {
            text,
            open,
            close,
            kind,
            pos: 0,
            pending: None,
            exhausted: false,
        }
    }

    fn find_delimited(&mut self) -> Option<(usize, usize)> {
        if self.exhausted {
            return None;
        }
        let bytes = self.text.as_bytes();
        let mut cursor = self.pos;
        loop {
            let Some(open) = position_from(bytes, cursor, self.open) else {
                self.exhausted = true;
                return None;
            };
            let Some(close) = position_from(bytes, open + 1, self.close) else {
                // No closing delimiter anywhere after this one, so no later
                // opener can match either.
                self.exhausted = true;
                return None;
            };
            if close > open + 1 {
                return Some((open, close + 1));
            }
            cursor = close + 1;
        }
    }
}

fn position_from(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|&b| b == needle)
        .map(|offset| from + offset)
}

impl Iterator for DelimitedSpans<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(span) = self.pending.take() {
            self.pos = span.end;
            return Some(span);
        }
        if self.pos >= self.text.len() {
            return None;
        }
        let gap_start = self.pos;
        match self.find_delimited() {
            Some((start, end)) if start > gap_start => {
                self.pending = Some(Span::new(start, end, self.kind));
                self.pos = start;
                Some(Span::new(gap_start, start, SpanKind::Text))
            }
            Some((start, end)) => {
                self.pos = end;
                Some(Span::new(start, end, self.kind))
            }
            None => {
                self.pos = self.text.len();
                Some(Span::new(gap_start, self.text.len(), SpanKind::Text))
            }
        }
    }
}

/// Splits plain text into maximal `Word` runs and the `Text` runs between
/// them, one code point at a time.
pub fn word_spans(text: &str) -> WordSpans<'_> {
    WordSpans {
        chars: text.char_indices().peekable(),
    }
}

pub struct WordSpans<'a> {
    chars: Peekable<CharIndices<'a>>,
}

impl Iterator for WordSpans<'_> {
    type Item = Span;

    fn next(&mut self) -> Option<Self::Item> {
        let (start, first) = self.chars.next()?;
        let in_word = is_word_char(first);
        let mut end = start + first.len_utf8();
        while let Some(&(idx, ch)) = self.chars.peek() {
            if is_word_char(ch) != in_word {
                break;
            }
            end = idx + ch.len_utf8();
            self.chars.next();
        }
        let kind = if in_word {
            SpanKind::Word
        } else {
            SpanKind::Text
        };
        Some(Span::new(start, end, kind))
    }
}

pub fn is_letter(ch: char) -> bool {
    matches!(
        get_general_category(ch),
        GeneralCategory::UppercaseLetter
            | GeneralCategory::LowercaseLetter
            | GeneralCategory::TitlecaseLetter
            | GeneralCategory::ModifierLetter
            | GeneralCategory::OtherLetter
    )
}

/// Letters, nonspacing marks (combining diacritics), and the straight and
/// curly apostrophes.
pub fn is_word_char(ch: char) -> bool {
    is_letter(ch)
        || get_general_category(ch) == GeneralCategory::NonspacingMark
        || ch == '\''
        || ch == '\u{2019}'
}

/// Lowercases a word and trims quote characters from both ends.
pub fn normalize_key(word: &str) -> String {
    word.to_lowercase().trim_matches(QUOTE_CHARS).to_string()
}

/// A word as it appears in the text, paired with its dictionary lookup key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    surface: &'a str,
    key: String,
}

impl<'a> Token<'a> {
    pub fn new(surface: &'a str) -> Self {
        Self {
            surface,
            key: normalize_key(surface),
        }
    }

    pub fn surface(&self) -> &'a str {
        self.surface
    }

    pub fn lookup_key(&self) -> &str {
        &self.key
    }

    /// Only keys carrying at least one letter are worth looking up.
    pub fn is_linkable(&self) -> bool {
        !self.key.is_empty() && self.key.chars().any(is_letter)
    }
}

/// External dictionary endpoint that word links point at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dictionary {
    base_url: String,
    mode: String,
}

impl Default for Dictionary {
    fn default() -> Self {
        Self::new(DEFAULT_DICTIONARY_URL, DEFAULT_LOOKUP_MODE)
    }
}

impl Dictionary {
    pub fn new(base_url: impl Into<String>, mode: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            mode: mode.into(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn mode(&self) -> &str {
        &self.mode
    }

    /// `<base>?tab=<mode>&q=<key>` with the key percent-encoded.
    pub fn lookup_url(&self, key: &str) -> String {
        format!(
            "{}?tab={}&q={}",
            self.base_url,
            self.mode,
            utf8_percent_encode(key, QUERY_COMPONENT)
        )
    }
}

/// Turns document markup into a fragment with dictionary-linked words.
///
/// Holds only immutable configuration, so one instance can be shared across
/// request handlers.
#[derive(Debug, Clone, Default)]
pub struct Transformer {
    dictionary: Dictionary,
}

impl Transformer {
    pub fn new(dictionary: Dictionary) -> Self {
        Self { dictionary }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Isolates the body of a full document and links its words.
    pub fn render_document(&self, document: &str) -> String {
        self.render_fragment(isolate_body(document))
    }

    /// Links the words of `fragment` without looking for body markers.
    pub fn render_fragment(&self, fragment: &str) -> String {
        let mut out = String::with_capacity(fragment.len() * 3);
        for span in markup_spans(fragment) {
            let slice = span.as_str(fragment);
            match span.kind {
                SpanKind::Markup => out.push_str(slice),
                _ => self.write_plain(&mut out, slice),
            }
        }
        out
    }

    fn write_plain(&self, out: &mut String, text: &str) {
        for span in reference_spans(text) {
            let slice = span.as_str(text);
            match span.kind {
                SpanKind::Reference => {
                    out.push_str(REFERENCE_OPEN);
                    escape_html_into(out, slice);
                    out.push_str(REFERENCE_CLOSE);
                }
                _ => self.write_words(out, slice),
            }
        }
    }

    fn write_words(&self, out: &mut String, text: &str) {
        for span in word_spans(text) {
            let slice = span.as_str(text);
            match span.kind {
                SpanKind::Word => self.write_token(out, &Token::new(slice)),
                // Inter-word characters go out exactly as they came in.
                _ => out.push_str(slice),
            }
        }
    }

    fn write_token(&self, out: &mut String, token: &Token<'_>) {
        if !token.is_linkable() {
            escape_html_into(out, token.surface());
            return;
        }
        out.push_str(r#"<a href=""#);
        out.push_str(&self.dictionary.lookup_url(token.lookup_key()));
        out.push_str(r#"" class=""#);
        out.push_str(WORD_LINK_CLASS);
        out.push_str(r#"" target=""#);
        out.push_str(WORD_LINK_TARGET);
        out.push_str(r#"">"#);
        escape_html_into(out, token.surface());
        out.push_str("</a>");
    }
}

/// Renders a full document with the default dictionary.
pub fn render_document(document: &str) -> String {
    DEFAULT_TRANSFORMER.render_document(document)
}

pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    escape_html_into(&mut out, input);
    out
}

fn escape_html_into(out: &mut String, input: &str) {
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&#34;"),
            '\'' => out.push_str("&#39;"),
            '\0' => out.push('\u{FFFD}'),
            _ => out.push(ch),
        }
    }
}
