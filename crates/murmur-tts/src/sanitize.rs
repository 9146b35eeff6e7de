//! Text sanitization for narration.
//!
//! Turns raw chat markup into speakable text through a fixed sequence of
//! passes: macro substitution, code-block removal, paired-tag removal,
//! asterisk handling, quoted-span extraction, image-markup stripping, and
//! whitespace normalization. The transformation is pure and stabilizes after
//! one application: `sanitize(sanitize(x)) == sanitize(x)`.
//!
//! An empty result is not an error — the caller drops the job silently.

use murmur_core::settings::NarrationSettings;

/// Default separator used to join extracted quoted spans when the provider
/// does not specify its own.
pub const DEFAULT_SEPARATOR: &str = " . ";

/// Quotation glyphs normalized to a plain double quote before extraction.
const SPECIAL_QUOTES: &[char] = &['“', '”', '«', '»', '「', '」', '『', '』', '＂'];

/// Options controlling the sanitization passes.
///
/// Filter flags mirror the narration settings; `separator` and `speaker`
/// are filled in per job by the generation worker.
#[derive(Debug, Clone)]
pub struct SanitizeOptions {
    /// Remove indented and fenced code blocks.
    pub skip_codeblocks: bool,

    /// Remove paired markup tags and their content.
    pub skip_tags: bool,

    /// Leave asterisks untouched.
    pub pass_asterisks: bool,

    /// With asterisk handling active, remove only `*action*` spans.
    pub dialogues_only: bool,

    /// Keep only double-quoted spans, joined by `separator`.
    pub quoted_only: bool,

    /// Join string for extracted quoted spans (the provider's separator).
    pub separator: String,

    /// Speaker whose `Name:` prefix may be stripped.
    pub speaker: Option<String>,

    /// Keep a leading `Speaker:` prefix instead of stripping it.
    pub show_speaker_name: bool,

    /// Replacement for the `{{user}}` macro.
    pub user_name: Option<String>,

    /// Replacement for the `{{char}}` macro.
    pub char_name: Option<String>,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            skip_codeblocks: false,
            skip_tags: false,
            pass_asterisks: false,
            dialogues_only: false,
            quoted_only: false,
            separator: DEFAULT_SEPARATOR.to_string(),
            speaker: None,
            show_speaker_name: false,
            user_name: None,
            char_name: None,
        }
    }
}

impl SanitizeOptions {
    /// Build options from the persisted filter flags. The per-job fields
    /// (`separator`, `speaker`, macro names) keep their defaults.
    #[must_use]
    pub fn from_settings(settings: &NarrationSettings) -> Self {
        Self {
            skip_codeblocks: settings.skip_codeblocks,
            skip_tags: settings.skip_tags,
            pass_asterisks: settings.pass_asterisks,
            dialogues_only: settings.narrate_dialogues_only,
            quoted_only: settings.narrate_quoted_only,
            show_speaker_name: settings.show_speaker_name,
            ..Self::default()
        }
    }
}

/// Sanitize raw message text into speakable text.
///
/// Passes run in a fixed order; each one is a no-op when its flag is off.
/// The result may be empty, in which case the job should be dropped.
#[must_use]
pub fn sanitize(raw: &str, opts: &SanitizeOptions) -> String {
    let mut text = substitute_macros(raw, opts.user_name.as_deref(), opts.char_name.as_deref());

    if opts.skip_codeblocks {
        text = strip_code_blocks(&text);
    }

    if opts.skip_tags {
        text = strip_tag_blocks(&text);
    }

    if !opts.pass_asterisks {
        text = if opts.dialogues_only {
            strip_action_spans(&text)
        } else {
            text.replace('*', "")
        };
    }

    if opts.quoted_only {
        text = extract_quoted(&text, &opts.separator);
    }

    text = strip_image_markup(&text);
    text = collapse_whitespace(&text);

    if !opts.show_speaker_name {
        if let Some(name) = opts.speaker.as_deref() {
            text = strip_speaker_prefix(&text, name);
        }
    }

    text
}

// ── Macro substitution ─────────────────────────────────────────────

/// Replace `{{user}}` / `{{char}}` macros (case-insensitive keys).
///
/// Unknown macros are left untouched; known macros with no configured value
/// are removed.
fn substitute_macros(text: &str, user: Option<&str>, character: Option<&str>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("{{") {
        let Some(end) = rest[start + 2..].find("}}") else {
            break;
        };
        let key = &rest[start + 2..start + 2 + end];
        let after = start + 2 + end + 2;

        out.push_str(&rest[..start]);
        match key.trim().to_ascii_lowercase().as_str() {
            "user" => out.push_str(user.unwrap_or("")),
            "char" => out.push_str(character.unwrap_or("")),
            _ => out.push_str(&rest[start..after]),
        }
        rest = &rest[after..];
    }

    out.push_str(rest);
    out
}

// ── Code blocks ────────────────────────────────────────────────────

/// Remove fenced (``` or ~~~) blocks and 4-space-indented lines.
fn strip_code_blocks(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    let mut fence: Option<&str> = None;

    for line in text.lines() {
        let trimmed = line.trim_start();
        match fence {
            Some(marker) => {
                if trimmed.starts_with(marker) {
                    fence = None;
                }
            }
            None => {
                if trimmed.starts_with("```") {
                    fence = Some("```");
                } else if trimmed.starts_with("~~~") {
                    fence = Some("~~~");
                } else if !is_indented_code(line) {
                    kept.push(line);
                }
            }
        }
    }

    kept.join("\n")
}

/// A line whose first four characters are all whitespace.
fn is_indented_code(line: &str) -> bool {
    let mut leading = 0;
    for c in line.chars() {
        if !c.is_whitespace() {
            break;
        }
        leading += 1;
        if leading == 4 {
            return true;
        }
    }
    false
}

// ── Paired markup tags ─────────────────────────────────────────────

/// Remove `<tag …>…</tag>` pairs including their content.
///
/// Opening and closing tags must each sit on a single line; the content in
/// between may span lines. An opener without a matching closer is kept.
fn strip_tag_blocks(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut cursor = 0;
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'<' {
            if let Some(open_len) = single_line_tag_len(&text[i..]) {
                let content_start = i + open_len;
                if let Some(close_end) = find_closing_tag(&text[content_start..]) {
                    out.push_str(&text[cursor..i]);
                    i = content_start + close_end;
                    cursor = i;
                    continue;
                }
            }
        }
        i += 1;
    }

    out.push_str(&text[cursor..]);
    out
}

/// Byte length of a `<…>` tag starting at the beginning of `s`, provided it
/// closes before the end of the line.
fn single_line_tag_len(s: &str) -> Option<usize> {
    debug_assert!(s.starts_with('<'));
    for (offset, c) in s.char_indices().skip(1) {
        match c {
            '>' => return Some(offset + 1),
            '\n' => return None,
            _ => {}
        }
    }
    None
}

/// Byte offset just past the first single-line `</…>` tag in `s`.
fn find_closing_tag(s: &str) -> Option<usize> {
    let mut from = 0;
    while let Some(rel) = s[from..].find("</") {
        let start = from + rel;
        if let Some(len) = single_line_tag_len(&s[start..]) {
            return Some(start + len);
        }
        from = start + 2;
    }
    None
}

// ── Asterisks ──────────────────────────────────────────────────────

/// Remove `*…*` action spans. A trailing unterminated span is removed to the
/// end of the text.
fn strip_action_spans(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find('*') {
        out.push_str(&rest[..start]);
        match rest[start + 1..].find('*') {
            Some(end) => rest = &rest[start + 1 + end + 1..],
            None => {
                rest = "";
            }
        }
    }

    out.push_str(rest);
    out
}

// ── Quoted-only extraction ─────────────────────────────────────────

/// Normalize quotation glyphs, then keep only the `"…"` spans (quotes
/// included), joined by `separator`. Spans never cross line breaks. With no
/// quoted span present, the normalized text is returned unchanged.
fn extract_quoted(text: &str, separator: &str) -> String {
    let normalized: String = text
        .chars()
        .map(|c| if SPECIAL_QUOTES.contains(&c) { '"' } else { c })
        .collect();

    let mut spans: Vec<&str> = Vec::new();
    for line in normalized.lines() {
        let mut rest = line;
        while let Some(start) = rest.find('"') {
            let Some(end) = rest[start + 1..].find('"') else {
                break;
            };
            spans.push(&rest[start..start + 1 + end + 1]);
            rest = &rest[start + 1 + end + 1..];
        }
    }

    if spans.is_empty() {
        normalized
    } else {
        spans.join(separator)
    }
}

// ── Image markup ───────────────────────────────────────────────────

/// Remove `![alt](url)` image markup entirely.
fn strip_image_markup(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("![") {
        let tail = &rest[start + 2..];
        let Some(image_len) = image_markup_len(tail) else {
            out.push_str(&rest[..start + 2]);
            rest = tail;
            continue;
        };
        out.push_str(&rest[..start]);
        rest = &tail[image_len..];
    }

    out.push_str(rest);
    out
}

/// Byte length of `alt](url)` at the start of `s`, if well-formed. The alt
/// text must stay on one line; the url may not contain `)`.
fn image_markup_len(s: &str) -> Option<usize> {
    let mut alt_end = None;
    for (offset, c) in s.char_indices() {
        match c {
            ']' => {
                alt_end = Some(offset);
                break;
            }
            '\n' => return None,
            _ => {}
        }
    }
    let alt_end = alt_end?;
    let after_alt = &s[alt_end + 1..];
    if !after_alt.starts_with('(') {
        return None;
    }
    let url_end = after_alt.find(')')?;
    Some(alt_end + 1 + url_end + 1)
}

// ── Whitespace ─────────────────────────────────────────────────────

/// Collapse runs of whitespace into single spaces and trim the ends.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut prev_space = false;

    for c in text.chars() {
        if c.is_whitespace() {
            if !prev_space {
                out.push(' ');
                prev_space = true;
            }
        } else {
            out.push(c);
            prev_space = false;
        }
    }

    out.trim().to_string()
}

// ── Speaker prefix ─────────────────────────────────────────────────

/// Strip a leading `Name:` prefix.
fn strip_speaker_prefix(text: &str, name: &str) -> String {
    if name.is_empty() {
        return text.to_string();
    }
    text.strip_prefix(name)
        .and_then(|after| after.strip_prefix(':'))
        .map_or_else(|| text.to_string(), |rest| rest.trim_start().to_string())
}
