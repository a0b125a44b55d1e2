use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

/// One immutable slice of the source document. Ids are ordinals within a
/// single index generation; `source_offset` is the byte offset of the
/// chunk's first character in the source.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: u32,
    pub text: String,
    pub source_offset: usize,
}

/// Splits `text` into windows of `chunk_size` characters advancing by
/// `chunk_size - chunk_overlap`, so consecutive chunks share the overlap
/// and catalog entries straddling a boundary stay retrievable. Boundaries
/// are character boundaries, never the middle of a code point.
pub fn split_text(text: &str, settings: &ChunkSettings) -> Vec<Chunk> {
    debug_assert!(settings.chunk_overlap < settings.chunk_size);

    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, plus the end of the text.
    let mut boundaries: Vec<usize> = text.char_indices().map(|(offset, _)| offset).collect();
    boundaries.push(text.len());

    let total_chars = boundaries.len() - 1;
    let step = settings.chunk_size - settings.chunk_overlap;

    let mut chunks = Vec::new();
    let mut start_char = 0;
    while start_char < total_chars {
        let end_char = (start_char + settings.chunk_size).min(total_chars);
        let start_byte = boundaries[start_char];
        let end_byte = boundaries[end_char];

        chunks.push(Chunk {
            id: chunks.len() as u32,
            text: text[start_byte..end_byte].to_string(),
            source_offset: start_byte,
        });

        if end_char == total_chars {
            break;
        }
        start_char += step;
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::{split_text, ChunkSettings};

    fn settings(chunk_size: usize, chunk_overlap: usize) -> ChunkSettings {
        ChunkSettings { chunk_size, chunk_overlap }
    }

    #[test]
    fn short_text_yields_single_chunk() {
        let chunks = split_text("rotomartillo TE-500", &settings(500, 100));

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, 0);
        assert_eq!(chunks[0].text, "rotomartillo TE-500");
        assert_eq!(chunks[0].source_offset, 0);
    }

    #[test]
    fn consecutive_chunks_share_the_overlap() {
        let text: String = ('a'..='z').cycle().take(30).collect();
        let chunks = split_text(&text, &settings(10, 4));

        assert!(chunks.len() > 1);
        for window in chunks.windows(2) {
            let tail: String = window[0].text.chars().skip(10 - 4).collect();
            let head: String = window[1].text.chars().take(4).collect();
            assert_eq!(tail, head, "overlap must repeat at the next chunk head");
        }
    }

    #[test]
    fn ids_are_sequential_and_offsets_monotonic() {
        let text = "x".repeat(95);
        let chunks = split_text(&text, &settings(20, 5));

        for (expected_id, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.id as usize, expected_id);
        }
        for window in chunks.windows(2) {
            assert!(window[0].source_offset < window[1].source_offset);
        }
    }

    #[test]
    fn multibyte_text_is_never_split_inside_a_code_point() {
        let text = "ñandú áéíóú ñoño ".repeat(20);
        let chunks = split_text(&text, &settings(12, 3));

        let mut reassembled = String::new();
        for chunk in &chunks {
            // Every slice is valid UTF-8 by construction; also verify the
            // offset points at the chunk's own text.
            assert!(text[chunk.source_offset..].starts_with(&chunk.text));
            reassembled.push_str(&chunk.text);
        }
        assert!(!reassembled.is_empty());
    }

    #[test]
    fn last_chunk_may_be_shorter() {
        let text = "y".repeat(25);
        let chunks = split_text(&text, &settings(10, 2));

        let last = chunks.last().expect("at least one chunk");
        assert!(last.text.chars().count() <= 10);
        assert_eq!(last.source_offset + last.text.len(), text.len());
    }

    #[test]
    fn empty_text_yields_no_chunks() {
        assert!(split_text("", &settings(10, 2)).is_empty());
    }
}
