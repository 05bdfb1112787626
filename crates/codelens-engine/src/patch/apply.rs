//! Application of unit replacements to file content

use std::path::Path;

use codelens_core::UnitId;

use super::PatchError;

/// Replace the unit occupying `start_byte..end_byte` with `replacement`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitEdit {
    /// Position of the edit in its batch.
    pub index: usize,
    pub unit: UnitId,
    pub start_byte: usize,
    pub end_byte: usize,
    pub replacement: String,
}

/// A byte range of the original content and its new text.
#[derive(Debug)]
struct Splice {
    index: usize,
    start: usize,
    end: usize,
    text: String,
}

/// Re-indent `source` so its least-indented line starts with `indent`.
pub fn reindent(source: &str, indent: &str) -> String {
    let body = codelens_indexer::dedent(source);
    let mut out = String::with_capacity(body.len() + indent.len() * 8);
    for line in body.lines() {
        if !line.trim().is_empty() {
            out.push_str(indent);
            out.push_str(line);
        }
        out.push('\n');
    }
    out
}

/// Replacement text for a unit that shares its lines with other code.
///
/// The first line continues whatever precedes the unit; later lines get the
/// indentation of the line the unit starts on.
fn inline_text(source: &str, indent: &str) -> String {
    let body = codelens_indexer::dedent(source);
    let body = body.trim_start_matches(['\n', '\r']).trim_end();
    let mut out = String::with_capacity(body.len());
    for (i, line) in body.lines().enumerate() {
        if i > 0 {
            out.push('\n');
            if !line.trim().is_empty() {
                out.push_str(indent);
            }
        }
        out.push_str(line);
    }
    out
}

fn plan_splice(content: &str, edit: &UnitEdit, crlf: bool) -> Splice {
    let line_start = content[..edit.start_byte].rfind('\n').map_or(0, |i| i + 1);
    let line_end = content[edit.end_byte..].find('\n').map_or(content.len(), |i| edit.end_byte + i);
    let before = &content[line_start..edit.start_byte];
    let after = &content[edit.end_byte..line_end];
    let indent = &before[..before.len() - before.trim_start_matches([' ', '\t']).len()];

    let (start, end, mut text) = if before.trim().is_empty() && after.trim().is_empty() {
        // The unit owns its lines: swap them whole.
        let had_newline = line_end < content.len();
        let end = if had_newline { line_end + 1 } else { content.len() };
        let mut text = reindent(&edit.replacement, indent);
        if !had_newline {
            text.truncate(text.trim_end_matches('\n').len());
        }
        (line_start, end, text)
    } else {
        (edit.start_byte, edit.end_byte, inline_text(&edit.replacement, indent))
    };
    if crlf {
        text = text.replace('\n', "\r\n");
    }
    Splice { index: edit.index, start, end, text }
}

/// Apply `edits` to `content`.
///
/// A unit alone on its lines is replaced line-wise and re-indented. A unit
/// sharing a line with other code is replaced byte-wise; the text around it
/// is kept verbatim. Overlapping edits are rejected with the index of the
/// later edit.
pub fn apply_edits(path: &Path, content: &str, edits: &[UnitEdit]) -> Result<String, PatchError> {
    let crlf = content.contains("\r\n");
    let mut splices = Vec::with_capacity(edits.len());
    for edit in edits {
        if edit.start_byte > edit.end_byte || content.get(edit.start_byte..edit.end_byte).is_none() {
            return Err(PatchError::Stale { index: edit.index, unit: edit.unit.clone() });
        }
        splices.push(plan_splice(content, edit, crlf));
    }

    splices.sort_by_key(|s| (s.start, s.end));
    for pair in splices.windows(2) {
        if pair[1].start < pair[0].end {
            let (first, second) = if pair[0].index < pair[1].index { (&pair[0], &pair[1]) } else { (&pair[1], &pair[0]) };
            return Err(PatchError::Overlap { index: second.index, other: first.index, path: path.to_path_buf() });
        }
    }

    let mut out = content.to_string();
    for splice in splices.iter().rev() {
        out.replace_range(splice.start..splice.end, &splice.text);
    }
    Ok(out)
}
