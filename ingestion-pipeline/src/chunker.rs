use common::error::AppError;
use text_splitter::{Characters, ChunkConfig, TextSplitter};

/// One passage of document text, sized for embedding.
///
/// Chunks carry an exact character overlap with their predecessor so the
/// original text can be rebuilt: chunk 0, followed by every later chunk with
/// its first `overlap` characters dropped, concatenates back to the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSpan {
    pub index: usize,
    pub text: String,
    /// Number of characters at the start of `text` shared with the previous
    /// chunk. Always 0 for the first chunk.
    pub overlap: usize,
}

/// Splits text into bounded, overlapping passages.
///
/// Boundary selection is delegated to `text-splitter` with trimming disabled,
/// so the produced segments are contiguous and cover the whole input:
/// paragraph breaks are preferred, then sentences and words, with hard
/// character cuts as the last resort for oversized units. The overlap is
/// woven on top of those segments character-exactly, which keeps every chunk
/// within `max_chars` and makes reconstruction a matter of skipping each
/// chunk's recorded overlap.
pub struct Chunker {
    max_chars: usize,
    overlap_chars: usize,
    splitter: TextSplitter<Characters>,
}

impl Chunker {
    /// Requires `max_chars > overlap_chars`, so every chunk has room for new
    /// text beyond what it shares with its predecessor.
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, AppError> {
        if max_chars <= overlap_chars {
            return Err(AppError::Validation(format!(
                "chunk_max_chars ({max_chars}) must be greater than chunk_overlap_chars ({overlap_chars})"
            )));
        }

        let capacity = max_chars.saturating_sub(overlap_chars);
        let config = ChunkConfig::new(capacity).with_trim(false);

        Ok(Self {
            max_chars,
            overlap_chars,
            splitter: TextSplitter::new(config),
        })
    }

    pub fn max_chars(&self) -> usize {
        self.max_chars
    }

    pub fn overlap_chars(&self) -> usize {
        self.overlap_chars
    }

    /// Lazily yields the chunk sequence for `text`. Calling this again
    /// restarts the sequence from the beginning.
    pub fn chunks<'splitter, 'text: 'splitter>(
        &'splitter self,
        text: &'text str,
    ) -> impl Iterator<Item = ChunkSpan> + 'splitter {
        let overlap = self.overlap_chars;

        self.splitter.chunks(text).enumerate().scan(
            String::new(),
            move |tail, (index, segment)| {
                let mut chunk_text = String::with_capacity(tail.len().saturating_add(segment.len()));
                chunk_text.push_str(tail);
                chunk_text.push_str(segment);

                let span = ChunkSpan {
                    index,
                    overlap: tail.chars().count(),
                    text: chunk_text,
                };

                // Roll the tail forward: it always holds the last
                // `overlap` characters of the text consumed so far.
                if overlap == 0 {
                    tail.clear();
                } else {
                    tail.push_str(segment);
                    let excess = tail.chars().count().saturating_sub(overlap);
                    if excess > 0 {
                        if let Some((cut, _)) = tail.char_indices().nth(excess) {
                            tail.drain(..cut);
                        }
                    }
                }

                Some(span)
            },
        )
    }
}
