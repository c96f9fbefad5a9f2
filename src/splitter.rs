//! Recursive text splitter.
//!
//! Splits raw document content into overlapping windows no longer than
//! `chunk_size` characters, preferring paragraph boundaries, then sentence,
//! word, and finally character boundaries. Separators stay attached to the
//! preceding piece, so concatenating the chunks minus their overlap regions
//! reconstructs the original content.
//!
//! Output ordering is significant: chunks are referenced by position when the
//! UI reconstructs a document, so the sequence is never reordered.

/// Separator cascade, most to least semantically meaningful. The empty
/// separator is the terminal character-level fallback.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", ". ", " "];

/// Split `content` into chunks of at most `chunk_size` characters with
/// `chunk_overlap` characters duplicated at each boundary.
///
/// NUL characters are replaced with U+FFFD before splitting; embedding
/// backends reject NUL bytes.
pub fn split(content: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let text = if content.contains('\0') {
        content.replace('\0', "\u{FFFD}")
    } else {
        content.to_string()
    };

    if char_len(&text) <= chunk_size {
        return vec![text];
    }

    let pieces = split_pieces(&text, &SEPARATORS, chunk_size);
    merge_pieces(pieces, chunk_size, chunk_overlap)
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Break `text` into ordered pieces no longer than `chunk_size`, recursing
/// through the separator cascade for oversized parts.
fn split_pieces(text: &str, separators: &[&str], chunk_size: usize) -> Vec<String> {
    if char_len(text) <= chunk_size {
        return vec![text.to_string()];
    }

    let Some((sep, rest)) = separators.split_first() else {
        return hard_split(text, chunk_size);
    };

    let parts: Vec<&str> = text.split_inclusive(sep).collect();
    if parts.len() <= 1 {
        return split_pieces(text, rest, chunk_size);
    }

    let mut pieces = Vec::with_capacity(parts.len());
    for part in parts {
        if char_len(part) > chunk_size {
            pieces.extend(split_pieces(part, rest, chunk_size));
        } else {
            pieces.push(part.to_string());
        }
    }
    pieces
}

/// Character-level fallback when no separator produces small enough parts.
fn hard_split(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|window| window.iter().collect())
        .collect()
}

/// Greedily pack ordered pieces into chunks, carrying the trailing pieces
/// that fit inside `chunk_overlap` into the start of the next chunk.
fn merge_pieces(pieces: Vec<String>, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: Vec<String> = Vec::new();
    let mut window_len = 0usize;

    for piece in pieces {
        let piece_len = char_len(&piece);

        if window_len + piece_len > chunk_size && !window.is_empty() {
            chunks.push(window.concat());

            // Drop leading pieces until the carried overlap fits, and until
            // the incoming piece fits alongside it.
            while !window.is_empty()
                && (window_len > chunk_overlap || window_len + piece_len > chunk_size)
            {
                let removed = window.remove(0);
                window_len -= char_len(&removed);
            }
        }

        window_len += piece_len;
        window.push(piece);
    }

    if !window.is_empty() {
        chunks.push(window.concat());
    }

    chunks
}
