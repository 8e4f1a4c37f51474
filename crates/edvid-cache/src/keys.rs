//! Stable fingerprints for cache keys.

use sha2::{Digest, Sha256};

/// SHA-256 over the parts, separated so concatenation cannot collide.
pub fn fingerprint(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Collapse runs of whitespace and case so cosmetic edits to the source
/// document still hit the script cache.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Key for a generated script: (normalized source text, model, template).
pub fn script_key(source_text: &str, model: &str, template_version: &str) -> String {
    fingerprint(&[&normalize_text(source_text), model, template_version])
}

/// Key for synthesised narration: (text, voice params).
pub fn audio_key(
    text: &str,
    voice: &str,
    format: &str,
    speed: f32,
    exaggeration: f32,
    cfg_weight: f32,
    temperature: f32,
) -> String {
    fingerprint(&[
        text,
        voice,
        format,
        &speed.to_string(),
        &exaggeration.to_string(),
        &cfg_weight.to_string(),
        &temperature.to_string(),
    ])
}

/// Key for a rendered visual: (visual type, prompt, rendering params).
pub fn visual_key(visual_type: &str, prompt: &str, render_params: &str) -> String {
    fingerprint(&[visual_type, prompt, render_params])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable() {
        assert_eq!(fingerprint(&["a", "b"]), fingerprint(&["a", "b"]));
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["ab"]));
        assert_ne!(fingerprint(&["a", "b"]), fingerprint(&["b", "a"]));
    }

    #[test]
    fn test_normalize_collapses_whitespace_and_case() {
        assert_eq!(normalize_text("  Hello\n\tWorld  "), "hello world");
        assert_eq!(
            script_key("Hello   World", "m", "v1"),
            script_key("hello world", "m", "v1")
        );
    }

    #[test]
    fn test_audio_key_sensitive_to_params() {
        let a = audio_key("text", "nova", "wav", 1.0, 0.5, 0.5, 0.8);
        let b = audio_key("text", "nova", "wav", 1.25, 0.5, 0.5, 0.8);
        assert_ne!(a, b);
    }
}
