//! Message segmentation for narration jobs.
//!
//! Two concerns live here: splitting a finished message into per-paragraph
//! jobs, and finding paragraph boundaries inside a message that is still
//! streaming in (the periodic slicer narrates each completed paragraph as
//! soon as its terminator appears).

/// Split message text into one narration unit per non-empty line.
///
/// Blank lines separate paragraphs and are dropped; original order is kept.
#[must_use]
pub fn split_paragraphs(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Find the next paragraph boundary at or after byte offset `from`.
///
/// A boundary is the position of a blank-line separator (`\n\n`); when none
/// exists, a plain line break counts. Returns the byte index of the
/// terminator, suitable for truncating the message at `&text[..end]`.
#[must_use]
pub fn next_paragraph_end(text: &str, from: usize) -> Option<usize> {
    if from >= text.len() {
        return None;
    }
    text[from..]
        .find("\n\n")
        .or_else(|| text[from..].find('\n'))
        .map(|rel| from + rel)
}
