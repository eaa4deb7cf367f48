//! Platform-aware splitting of long text at preferred boundaries. (spec §4.2)

/// Splits `text` into chunks of at most `max_len` UTF-8 bytes, preferring
/// to break on the last newline within reach of the limit.
///
/// Empty input yields `[""]`. Text already within the limit yields
/// `[text]`. Every chunk after the first has any leading `\n` stripped,
/// so `chunks.concat()` reconstructs `text` modulo that stripping.
pub fn chunk(text: &str, max_len: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut rest = text;
    while rest.len() > max_len {
        let window = &rest[..max_len];
        let split_at = window.rfind('\n');
        let (head, tail) = match split_at {
            Some(idx) => (&rest[..idx], &rest[idx + 1..]),
            None => {
                let boundary = floor_char_boundary(rest, max_len);
                (&rest[..boundary], &rest[boundary..])
            }
        };
        chunks.push(head.to_string());
        rest = tail.trim_start_matches('\n');
        if rest.is_empty() {
            return chunks;
        }
    }
    chunks.push(rest.to_string());
    chunks
}

/// Steps back from `idx` to the nearest UTF-8 char boundary so we never
/// split inside a multi-byte sequence.
fn floor_char_boundary(s: &str, idx: usize) -> usize {
    let mut i = idx.min(s.len());
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_yields_single_empty_chunk() {
        assert_eq!(chunk("", 100), vec![""]);
    }

    #[test]
    fn short_text_is_single_chunk() {
        assert_eq!(chunk("hello", 100), vec!["hello"]);
    }

    #[test]
    fn splits_at_last_newline_within_limit() {
        let text = "aaaa\nbbbb\ncccc";
        let chunks = chunk(text, 9);
        assert_eq!(chunks, vec!["aaaa", "bbbb\ncccc"]);
        for c in &chunks {
            assert!(c.len() <= 9);
        }
    }

    #[test]
    fn hard_break_when_no_newline() {
        let text = "a".repeat(20);
        let chunks = chunk(&text, 7);
        assert_eq!(chunks.len(), 3);
        for c in &chunks {
            assert!(c.len() <= 7);
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn reconstruction_modulo_leading_newline_strip() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let chunks = chunk(text, 12);
        for c in &chunks {
            assert!(c.len() <= 12);
        }
        let rebuilt: String = chunks
            .iter()
            .enumerate()
            .map(|(i, c)| if i == 0 { c.clone() } else { format!("\n{c}") })
            .collect();
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn never_splits_inside_a_multibyte_char() {
        let text = "é".repeat(10); // 2 bytes each, no newlines
        let chunks = chunk(&text, 3);
        for c in &chunks {
            assert!(c.is_char_boundary(0) && c.is_char_boundary(c.len()));
        }
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn caption_overflow_chunk_count_matches_ceil() {
        let body = "x".repeat(6700);
        let chunks = chunk(&body, 4096);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !c.is_empty() && c.len() <= 4096));
    }
}
