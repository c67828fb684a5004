//! Splits raw document text into bounded, deduplicated segments that act as
//! pseudo-documents for the modeling variants.
//!
//! Segments carry enough signal for an embedding model (merged up past
//! `MIN_CHARS`) while staying bounded (`1.5 x MAX_CHARS` worst case), and
//! repeated boilerplate (nav/footer blocks) is removed by signature dedup.

use once_cell::sync::Lazy;
use regex::Regex;

/// Chunks shorter than this are buffered and merged with neighbors.
pub const MIN_CHARS: usize = 200;
/// Paragraphs longer than this are cut at sentence boundaries.
pub const MAX_CHARS: usize = 1200;
/// Segments shorter than this after merging are dropped outright.
pub const FLOOR_CHARS: usize = 100;
/// Hard cap on segments per document.
pub const MAX_SEGMENTS: usize = 200;

static PARAGRAPH_SPLIT: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n\s*\n+").unwrap());
static NON_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\W+").unwrap());

/// Segments `text` with the default bounds.
pub fn segment(text: &str) -> Vec<String> {
    segment_with(text, MIN_CHARS, MAX_CHARS)
}

/// Paragraph split, sentence-aware chunking of oversized paragraphs, small
/// chunk merging, length floor, signature dedup, and a segment cap —
/// in that order. Lengths are measured in characters.
pub fn segment_with(text: &str, min_chars: usize, max_chars: usize) -> Vec<String> {
    let paragraphs: Vec<&str> = PARAGRAPH_SPLIT
        .split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut segments: Vec<String> = Vec::new();
    let mut small_buffer: Vec<String> = Vec::new();

    let flush_joined = |buffer: &mut Vec<String>, segments: &mut Vec<String>| {
        if !buffer.is_empty() {
            segments.push(buffer.join(" "));
            buffer.clear();
        }
    };

    for paragraph in paragraphs {
        for chunk in chunk_paragraph(paragraph, max_chars) {
            if chunk.chars().count() < min_chars {
                small_buffer.push(chunk);
                let joined_len: usize = small_buffer
                    .iter()
                    .map(|s| s.chars().count())
                    .sum::<usize>()
                    + small_buffer.len().saturating_sub(1);
                if joined_len >= min_chars {
                    flush_joined(&mut small_buffer, &mut segments);
                }
            } else if !small_buffer.is_empty() {
                let buffered = small_buffer.join(" ");
                let merged_len = buffered.chars().count() + 1 + chunk.chars().count();
                if merged_len <= max_chars * 3 / 2 {
                    segments.push(format!("{buffered} {chunk}"));
                } else {
                    segments.push(buffered);
                    segments.push(chunk);
                }
                small_buffer.clear();
            } else {
                segments.push(chunk);
            }
        }
    }

    flush_joined(&mut small_buffer, &mut segments);

    let filtered = segments
        .into_iter()
        .filter(|s| s.chars().count() >= FLOOR_CHARS);

    let mut seen = std::collections::HashSet::new();
    let mut uniq = Vec::new();
    for s in filtered {
        if seen.insert(signature(&s)) {
            uniq.push(s);
        }
        if uniq.len() >= MAX_SEGMENTS {
            break;
        }
    }

    uniq
}

/// Cuts an oversized paragraph into windows of at most `max_chars`,
/// preferring the last sentence-ending ". " at or past half the window.
fn chunk_paragraph(paragraph: &str, max_chars: usize) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    if chars.len() <= max_chars {
        return vec![paragraph.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;
    while start < chars.len() {
        let end = (start + max_chars).min(chars.len());
        let cut = match rfind_sentence_end(&chars, start, end) {
            Some(pos) if pos >= start + max_chars / 2 => pos + 2,
            _ => end,
        };

        let chunk: String = chars[start..cut].iter().collect();
        let chunk = chunk.trim().to_string();
        if !chunk.is_empty() {
            chunks.push(chunk);
        }
        start = cut;
    }

    chunks
}

/// Last index of a ". " pair within `[start, end)`, if any.
fn rfind_sentence_end(chars: &[char], start: usize, end: usize) -> Option<usize> {
    if end < start + 2 {
        return None;
    }
    (start..end - 1).rev().find(|&i| chars[i] == '.' && chars[i + 1] == ' ')
}

/// Normalized dedup signature: non-word runs collapsed, lowercased, first
/// 200 characters.
fn signature(segment: &str) -> String {
    let lowered = segment.to_lowercase();
    let collapsed = NON_WORD.replace_all(&lowered, " ");
    collapsed.trim().chars().take(200).collect()
}
