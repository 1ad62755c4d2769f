//! Chapter-to-chunk splitting with chapter boundary tracking.
//!
//! Chunks are packed greedily up to the chunk size: paragraphs first,
//! oversized paragraphs broken at sentence boundaries, oversized sentences
//! hard-split. Empty sections produce no chunks and no chapter marker.

/// One unit of synthesis work.
#[derive(Debug, Clone, PartialEq)]
pub struct TextChunk {
    pub chapter_title: String,
    pub text: String,
}

/// Split a paragraph at sentence ends (`.` `!` `?` followed by whitespace).
fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_was_terminal = false;

    for (i, ch) in paragraph.char_indices() {
        if prev_was_terminal && ch.is_whitespace() {
            let sentence = paragraph[start..i].trim();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            start = i + ch.len_utf8();
        }
        prev_was_terminal = matches!(ch, '.' | '!' | '?');
    }

    let tail = paragraph[start..].trim();
    if !tail.is_empty() {
        sentences.push(tail);
    }
    sentences
}

/// Hard-split text into pieces of at most `chunk_chars` characters,
/// respecting UTF-8 boundaries.
fn hard_split(text: &str, chunk_chars: usize) -> Vec<String> {
    let mut pieces = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if current.chars().count() >= chunk_chars {
            pieces.push(std::mem::take(&mut current));
        }
        current.push(ch);
    }
    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

/// Break one paragraph into pieces no longer than `chunk_chars`.
fn split_oversized_paragraph(paragraph: &str, chunk_chars: usize) -> Vec<String> {
    if paragraph.chars().count() <= chunk_chars {
        return vec![paragraph.to_string()];
    }

    let mut pieces: Vec<String> = Vec::new();
    let mut buffer = String::new();

    for sentence in split_sentences(paragraph) {
        if sentence.chars().count() > chunk_chars {
            if !buffer.is_empty() {
                pieces.push(std::mem::take(&mut buffer));
            }
            pieces.extend(hard_split(sentence, chunk_chars));
            continue;
        }

        let candidate_len = if buffer.is_empty() {
            sentence.chars().count()
        } else {
            buffer.chars().count() + 1 + sentence.chars().count()
        };
        if candidate_len <= chunk_chars {
            if !buffer.is_empty() {
                buffer.push(' ');
            }
            buffer.push_str(sentence);
        } else {
            if !buffer.is_empty() {
                pieces.push(std::mem::take(&mut buffer));
            }
            buffer.push_str(sentence);
        }
    }

    if !buffer.is_empty() {
        pieces.push(buffer);
    }

    if pieces.is_empty() {
        vec![paragraph.to_string()]
    } else {
        pieces
    }
}

/// Split sections into chunks and record where each chapter starts.
///
/// Returns the ordered chunk list and `(chunk_index, title)` pairs marking
/// the first chunk of every non-empty chapter. Chapter boundary offsets are
/// computed cumulatively downstream, so chunk order is significant.
pub fn split_text_to_chunks(
    sections: &[(String, String)],
    chunk_chars: usize,
) -> (Vec<TextChunk>, Vec<(usize, String)>) {
    let mut chunks: Vec<TextChunk> = Vec::new();
    let mut chapter_starts: Vec<(usize, String)> = Vec::new();

    for (title, text) in sections {
        let paragraphs: Vec<&str> = text
            .split('\n')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();
        if paragraphs.is_empty() {
            continue;
        }

        chapter_starts.push((chunks.len(), title.clone()));

        let mut buffer = String::new();
        for paragraph in paragraphs {
            for piece in split_oversized_paragraph(paragraph, chunk_chars) {
                if buffer.chars().count() + piece.chars().count() + 1 <= chunk_chars {
                    if !buffer.is_empty() {
                        buffer.push(' ');
                    }
                    buffer.push_str(&piece);
                } else {
                    if !buffer.is_empty() {
                        chunks.push(TextChunk {
                            chapter_title: title.clone(),
                            text: std::mem::take(&mut buffer),
                        });
                    }
                    buffer = piece;
                }
            }
        }

        if !buffer.is_empty() {
            chunks.push(TextChunk {
                chapter_title: title.clone(),
                text: buffer,
            });
        }
    }

    (chunks, chapter_starts)
}
