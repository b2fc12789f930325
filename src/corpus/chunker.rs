//! Splits long-form markdown into overlapping token-bounded passages.
//!
//! Chunk boundaries are deterministic: identical inputs always produce
//! identical chunk text, ids, and token counts.

use tracing::warn;

use super::{Chunk, SectionIndex};

/// Approximate token count from whitespace-delimited word count.
///
/// Uses the ~0.75 words-per-token ratio, rounded up. Empty input yields 0.
#[must_use]
pub fn estimate_tokens(text: &str) -> usize {
    let words = text.split_whitespace().count();
    // ceil(words / 0.75) == ceil(words * 4 / 3)
    (words * 4).div_ceil(3)
}

/// Chunk section text into passages of about `target_tokens`, seeding each
/// new chunk with the trailing sentences of the previous one up to
/// `overlap_tokens`.
#[must_use]
pub fn chunk_text(
    text: &str,
    section: &SectionIndex,
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    // Short sections become a single chunk of the trimmed input.
    if estimate_tokens(trimmed) <= target_tokens {
        return vec![Chunk {
            id: format!("{}_chunk_0", section.section_id),
            section_id: section.section_id.clone(),
            token_count: estimate_tokens(trimmed),
            start_offset: 0,
            end_offset: trimmed.len(),
            text: trimmed.to_string(),
        }];
    }

    let paragraphs: Vec<&str> = text
        .split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();

    let mut chunks = Vec::new();
    let mut current_chunk = String::new();
    let mut current_tokens = 0usize;
    let mut chunk_start_offset = 0usize;
    let mut global_offset = 0usize;
    let mut chunk_index = 0usize;

    for para in paragraphs {
        let para_tokens = estimate_tokens(para);

        if current_tokens > 0 && current_tokens + para_tokens > target_tokens {
            chunks.push(Chunk {
                id: format!("{}_chunk_{chunk_index}", section.section_id),
                section_id: section.section_id.clone(),
                text: current_chunk.trim().to_string(),
                token_count: current_tokens,
                start_offset: chunk_start_offset,
                end_offset: global_offset,
            });
            chunk_index += 1;

            // Seed the next chunk with trailing sentences of the closed one.
            let (overlap_text, overlap_count) = build_overlap(&current_chunk, overlap_tokens);

            current_chunk = format!("{overlap_text}\n\n{para}");
            current_tokens = overlap_count + para_tokens;
            chunk_start_offset = global_offset.saturating_sub(overlap_text.len());
        } else {
            if current_chunk.is_empty() {
                current_chunk = para.to_string();
                chunk_start_offset = global_offset;
            } else {
                current_chunk.push_str("\n\n");
                current_chunk.push_str(para);
            }
            current_tokens += para_tokens;
        }

        global_offset += para.len() + 2; // account for the paragraph break
    }

    if !current_chunk.trim().is_empty() {
        chunks.push(Chunk {
            id: format!("{}_chunk_{chunk_index}", section.section_id),
            section_id: section.section_id.clone(),
            text: current_chunk.trim().to_string(),
            token_count: current_tokens,
            start_offset: chunk_start_offset,
            end_offset: global_offset,
        });
    }

    chunks
}

/// Walk backward through a closed chunk's sentences, accumulating until
/// the overlap token budget is met. Returns the seed text and its token count.
fn build_overlap(closed_chunk: &str, overlap_tokens: usize) -> (String, usize) {
    let sentences: Vec<&str> = closed_chunk
        .split(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let mut overlap_text = String::new();
    let mut overlap_count = 0usize;

    for sent in sentences.iter().rev() {
        if overlap_count >= overlap_tokens {
            break;
        }
        let sent_tokens = estimate_tokens(sent);
        if overlap_count + sent_tokens <= overlap_tokens {
            overlap_text = format!("{sent}. {overlap_text}");
            overlap_count += sent_tokens;
        } else {
            break;
        }
    }

    (overlap_text, overlap_count)
}

/// Extract a section's text from markdown by matching level-2 headers.
///
/// Matching policy, in order: normalized section id as a substring of the
/// header; title as a substring; majority of the title's significant words
/// present in the header. A document with no level-2 headers is treated as
/// a single section. Returns `None` when headers exist but none match.
#[must_use]
pub fn extract_section(markdown: &str, section_id: &str, title: Option<&str>) -> Option<String> {
    let sections = split_level2_sections(markdown);
    if sections.is_empty() {
        return Some(markdown.to_string());
    }

    let normalized_id = section_id
        .replace(['-', '_'], " ")
        .to_lowercase();

    // 1. Normalized id as header substring
    for (header, body) in &sections {
        if header.contains(&normalized_id) {
            return Some(body.clone());
        }
    }

    // 2. Title as header substring
    if let Some(title) = title {
        let title_lower = title.to_lowercase();
        for (header, body) in &sections {
            if header.contains(&title_lower) {
                return Some(body.clone());
            }
        }

        // 3. Majority of significant title words appear in the header
        let words: Vec<&str> = title_lower
            .split_whitespace()
            .filter(|w| w.len() > 3)
            .collect();
        if !words.is_empty() {
            let needed = words.len().div_ceil(2);
            for (header, body) in &sections {
                let hits = words.iter().filter(|w| header.contains(*w)).count();
                if hits >= needed {
                    return Some(body.clone());
                }
            }
        }
    }

    None
}

/// Split markdown into `(lowercased header line, full section text)` pairs
/// at level-2 headers. Returns an empty vec when no headers exist.
fn split_level2_sections(markdown: &str) -> Vec<(String, String)> {
    let mut sections = Vec::new();
    let mut current: Option<(String, Vec<&str>)> = None;

    for line in markdown.lines() {
        if let Some(header) = line.strip_prefix("## ") {
            if let Some((h, body)) = current.take() {
                sections.push((h, body.join("\n")));
            }
            current = Some((header.to_lowercase(), vec![line]));
        } else if let Some((_, body)) = current.as_mut() {
            body.push(line);
        }
    }

    if let Some((h, body)) = current {
        sections.push((h, body.join("\n")));
    }

    sections
}

/// Chunk every section listed in the index. Sections that fail to extract
/// are skipped with a warning; the corpus is built from whatever succeeds.
#[must_use]
pub fn process_corpus(
    markdown: &str,
    index: &[SectionIndex],
    target_tokens: usize,
    overlap_tokens: usize,
) -> Vec<Chunk> {
    let mut all_chunks = Vec::new();

    for section in index {
        let Some(text) = extract_section(markdown, &section.section_id, Some(&section.title))
        else {
            warn!("Section {} not found in markdown", section.section_id);
            continue;
        };

        all_chunks.extend(chunk_text(&text, section, target_tokens, overlap_tokens));
    }

    all_chunks
}
