//! Document chunking for embeddings and hierarchical ingestion (spec §4.5).

/// One chunk of a larger document. `header_path` carries the markdown
/// headers in scope at this chunk, joined with " > ", so a retrieved
/// fragment is self-describing even out of context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub header_path: Option<String>,
    pub index: usize,
}

/// ~4 chars/token, matching the spec's rough heuristic.
const CHARS_PER_TOKEN: usize = 4;
const DEFAULT_MAX_TOKENS: usize = 512;
const MAX_CHUNK_CHARS: usize = DEFAULT_MAX_TOKENS * CHARS_PER_TOKEN;
/// Hard cap for a single sentence that alone exceeds the budget.
const HARD_SPLIT_CHARS: usize = MAX_CHUNK_CHARS * 2;

/// Split `text` into chunks, using markdown-header hierarchy when the
/// document has headers, otherwise falling back to plain paragraph/sentence
/// splitting (spec §4.5 "Hierarchical mode").
pub fn chunk_document(text: &str) -> Vec<Chunk> {
    if has_markdown_headers(text) {
        chunk_by_headers(text)
    } else {
        chunk_by_paragraphs(text, None)
    }
}

fn has_markdown_headers(text: &str) -> bool {
    text.lines().any(|line| line.trim_start().starts_with('#'))
}

struct Section {
    header_path: Vec<String>,
    body: String,
}

fn chunk_by_headers(text: &str) -> Vec<Chunk> {
    let mut sections = Vec::new();
    let mut stack: Vec<(usize, String)> = Vec::new();
    let mut current_body = String::new();

    let flush = |stack: &[(usize, String)], body: &str, sections: &mut Vec<Section>| {
        if !body.trim().is_empty() {
            sections.push(Section {
                header_path: stack.iter().map(|(_, h)| h.clone()).collect(),
                body: body.trim().to_string(),
            });
        }
    };

    for line in text.lines() {
        let trimmed = line.trim_start();
        if let Some(level) = markdown_header_level(trimmed) {
            flush(&stack, &current_body, &mut sections);
            current_body.clear();
            while stack.last().is_some_and(|(l, _)| *l >= level) {
                stack.pop();
            }
            stack.push((level, trimmed.trim_start_matches('#').trim().to_string()));
        } else {
            current_body.push_str(line);
            current_body.push('\n');
        }
    }
    flush(&stack, &current_body, &mut sections);

    let mut chunks = Vec::new();
    for section in sections {
        let header_path = if section.header_path.is_empty() {
            None
        } else {
            Some(section.header_path.join(" > "))
        };
        for sub in chunk_by_paragraphs(&section.body, header_path.as_deref()) {
            chunks.push(Chunk { index: chunks.len(), ..sub });
        }
    }
    chunks
}

fn markdown_header_level(line: &str) -> Option<usize> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if hashes > 0 && hashes <= 6 && line.as_bytes().get(hashes).is_some_and(|b| *b == b' ') {
        Some(hashes)
    } else {
        None
    }
}

/// Split by blank-line paragraphs, packing consecutive paragraphs up to the
/// token budget; oversized paragraphs split on sentence boundaries, and a
/// pathologically long sentence hard-splits on a character limit.
fn chunk_by_paragraphs(text: &str, header_path: Option<&str>) -> Vec<Chunk> {
    let paragraphs: Vec<&str> = text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()).collect();
    if paragraphs.is_empty() {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    let mut push_current = |current: &mut String, chunks: &mut Vec<Chunk>| {
        if !current.trim().is_empty() {
            chunks.push(Chunk { text: current.trim().to_string(), header_path: header_path.map(str::to_string), index: chunks.len() });
        }
        current.clear();
    };

    for paragraph in paragraphs {
        for piece in split_oversized(paragraph) {
            if current.len() + piece.len() + 2 > MAX_CHUNK_CHARS && !current.is_empty() {
                push_current(&mut current, &mut chunks);
            }
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(&piece);
            if current.len() > MAX_CHUNK_CHARS {
                push_current(&mut current, &mut chunks);
            }
        }
    }
    push_current(&mut current, &mut chunks);
    chunks
}

/// Split a paragraph that alone exceeds the budget on sentence boundaries;
/// a single sentence still too long is hard-split on a character limit.
fn split_oversized(paragraph: &str) -> Vec<String> {
    if paragraph.len() <= MAX_CHUNK_CHARS {
        return vec![paragraph.to_string()];
    }

    let mut out = Vec::new();
    let mut current = String::new();
    for sentence in split_sentences(paragraph) {
        if sentence.len() > HARD_SPLIT_CHARS {
            if !current.is_empty() {
                out.push(std::mem::take(&mut current));
            }
            out.extend(hard_split(&sentence));
            continue;
        }
        if current.len() + sentence.len() > MAX_CHUNK_CHARS && !current.is_empty() {
            out.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&sentence);
    }
    if !current.is_empty() {
        out.push(current);
    }
    out
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            out.push(std::mem::take(&mut current).trim().to_string());
        }
    }
    if !current.trim().is_empty() {
        out.push(current.trim().to_string());
    }
    out.retain(|s| !s.is_empty());
    out
}

fn hard_split(text: &str) -> Vec<String> {
    text.chars()
        .collect::<Vec<_>>()
        .chunks(HARD_SPLIT_CHARS)
        .map(|c| c.iter().collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_plain_paragraphs() {
        let text = "First paragraph.\n\nSecond paragraph.";
        let chunks = chunk_document(text);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].text.contains("First paragraph"));
        assert!(chunks[0].text.contains("Second paragraph"));
    }

    #[test]
    fn carries_header_path_through_sections() {
        let text = "# Title\n\nIntro text.\n\n## Sub\n\nSub text.";
        let chunks = chunk_document(text);
        assert!(chunks.iter().any(|c| c.header_path.as_deref() == Some("Title")));
        assert!(chunks.iter().any(|c| c.header_path.as_deref() == Some("Title > Sub")));
    }

    #[test]
    fn hard_splits_pathological_sentence() {
        let giant = "a".repeat(HARD_SPLIT_CHARS * 3);
        let pieces = split_oversized(&giant);
        assert!(pieces.len() >= 3);
        assert!(pieces.iter().all(|p| p.len() <= HARD_SPLIT_CHARS));
    }

    #[test]
    fn packs_short_paragraphs_together() {
        let text = "One.\n\nTwo.\n\nThree.";
        let chunks = chunk_document(text);
        assert_eq!(chunks.len(), 1);
    }
}
