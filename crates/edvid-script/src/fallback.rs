//! Deterministic fallback script generator.
//!
//! Used when the LLM is unavailable after retries or keeps returning output
//! that fails validation. Splits the document into 3-7 plain slide scenes
//! so the job can still produce a watchable video.

use edvid_models::{Scene, Script, VisualKind, MAX_SCENES, MIN_SCENES};

/// Narration budget per generated scene, well inside the 1000-char bound.
const NARRATION_TARGET_CHARS: usize = 600;

/// Build a slide-only script from raw document text.
///
/// Deterministic: the same text always yields the same script. The output
/// always satisfies the script invariants (3-7 scenes, narration and prompt
/// bounds).
pub fn fallback_script(text: &str) -> Script {
    let chunks = split_chunks(text);

    let scenes = chunks
        .into_iter()
        .enumerate()
        .map(|(i, narration)| {
            let prompt = prompt_for(&narration, i);
            Scene::new(i as u32 + 1, narration, VisualKind::Slide, prompt)
        })
        .collect();

    Script::new(scenes)
}

/// Split text into MIN_SCENES..=MAX_SCENES narration chunks.
fn split_chunks(text: &str) -> Vec<String> {
    let cleaned = text.split_whitespace().collect::<Vec<_>>().join(" ");
    let sentences = split_sentences(&cleaned);

    // Aim for one scene per NARRATION_TARGET_CHARS of text, clamped.
    let target = (cleaned.len() / NARRATION_TARGET_CHARS + 1).clamp(MIN_SCENES, MAX_SCENES);

    let mut chunks: Vec<String> = vec![String::new(); target];
    let per_chunk = sentences.len().div_ceil(target).max(1);
    for (i, sentence) in sentences.iter().enumerate() {
        let idx = (i / per_chunk).min(target - 1);
        if !chunks[idx].is_empty() {
            chunks[idx].push(' ');
        }
        chunks[idx].push_str(sentence);
    }

    chunks
        .into_iter()
        .map(|c| clamp_narration(&c))
        .collect()
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            let trimmed = current.trim();
            if !trimmed.is_empty() {
                sentences.push(trimmed.to_string());
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    if sentences.is_empty() {
        sentences.push(text.trim().to_string());
    }
    sentences
}

/// Keep narration inside the 10-1000 character bounds.
fn clamp_narration(text: &str) -> String {
    let mut narration: String = text.chars().take(1000).collect();
    if narration.trim().len() < 10 {
        // Thin sections still need speakable narration.
        narration = format!("{} This section is covered on the slide.", narration.trim())
            .trim()
            .to_string();
    }
    narration
}

/// Derive a 5-500 character visual prompt from the narration.
fn prompt_for(narration: &str, index: usize) -> String {
    let headline: String = narration.chars().take(120).collect();
    let headline = headline.trim();
    if headline.len() >= 5 {
        format!("Slide {}: {}", index + 1, headline)
            .chars()
            .take(500)
            .collect()
    } else {
        format!("Slide {} overview", index + 1)
    }
}
