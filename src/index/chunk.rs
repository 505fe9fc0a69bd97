//! Overlapping character chunker with sentence-boundary backoff.

/// A chunk of one source document, positioned by character offset.
#[derive(Debug, Clone)]
pub struct DocumentChunk {
    pub text: String,
    pub source: String,
    pub start_offset: usize,
    pub chunk_index: usize,
}

/// Chunking parameters. Overlap must be smaller than the chunk size; the
/// step is clamped to at least one character so progress is guaranteed.
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 50,
        }
    }
}

/// Splits `text` into overlapping chunks, preferring to end each chunk at
/// a sentence boundary near its tail.
pub fn split_into_chunks(text: &str, source: &str, config: ChunkerConfig) -> Vec<DocumentChunk> {
    let chunk_size = config.chunk_size.max(1);
    let step = chunk_size.saturating_sub(config.chunk_overlap).max(1);

    let chars: Vec<char> = text.chars().collect();
    let total_chars = chars.len();

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut chunk_index = 0;

    while start < total_chars {
        let end = (start + chunk_size).min(total_chars);
        let window: String = chars[start..end].iter().collect();

        let chunk_text = if end < total_chars {
            trim_to_sentence_boundary(&window)
        } else {
            window
        };

        let trimmed = chunk_text.trim();
        if !trimmed.is_empty() {
            chunks.push(DocumentChunk {
                text: trimmed.to_string(),
                source: source.to_string(),
                start_offset: start,
                chunk_index,
            });
            chunk_index += 1;
        }

        start += step;
    }

    chunks
}

/// Cuts the window back to the last sentence ending found in its final
/// fifth. Returns the window unchanged when no boundary is close enough.
fn trim_to_sentence_boundary(text: &str) -> String {
    let sentence_endings = [". ", "! ", "? ", ".\n", "!\n", "?\n"];

    let search_start = floor_char_boundary(text, (text.len() * 80) / 100);
    let search_text = &text[search_start..];

    for ending in sentence_endings.iter() {
        if let Some(pos) = search_text.rfind(ending) {
            let cut_pos = search_start + pos + ending.len();
            return text[..cut_pos].to_string();
        }
    }

    text.to_string()
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while index > 0 && !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
