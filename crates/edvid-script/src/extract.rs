//! Source document text extraction.

use std::path::Path;

use edvid_models::{SourceDocument, SourceKind};
use tracing::debug;

use crate::error::{ScriptError, ScriptResult};

/// Extract the narration source text from an uploaded document.
///
/// - txt: UTF-8, falling back to a Latin-1 reinterpretation for legacy files
/// - md: raw content, markup included
/// - pdf: pages extracted and concatenated
pub async fn extract_text(source: &SourceDocument) -> ScriptResult<String> {
    let text = match source.kind {
        SourceKind::Text => read_text_lossy(&source.path).await?,
        SourceKind::Markdown => {
            let bytes = tokio::fs::read(&source.path).await?;
            String::from_utf8_lossy(&bytes).into_owned()
        }
        SourceKind::Pdf => extract_pdf(&source.path).await?,
    };

    if text.trim().is_empty() {
        return Err(ScriptError::EmptySource);
    }

    debug!(
        path = %source.path.display(),
        kind = %source.kind,
        chars = text.len(),
        "extracted source text"
    );
    Ok(text)
}

async fn read_text_lossy(path: &Path) -> ScriptResult<String> {
    let bytes = tokio::fs::read(path).await?;
    match String::from_utf8(bytes) {
        Ok(text) => Ok(text),
        // Latin-1 maps every byte to the code point of the same value.
        Err(e) => Ok(e.into_bytes().iter().map(|&b| b as char).collect()),
    }
}

async fn extract_pdf(path: &Path) -> ScriptResult<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text(&path).map_err(|e| ScriptError::PdfExtract(e.to_string()))
    })
    .await
    .map_err(|e| ScriptError::PdfExtract(format!("extraction task failed: {e}")))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[tokio::test]
    async fn test_utf8_text() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        write!(file, "héllo wörld").unwrap();

        let source = SourceDocument::new(file.path(), SourceKind::Text, 12);
        let text = extract_text(&source).await.unwrap();
        assert_eq!(text, "héllo wörld");
    }

    #[tokio::test]
    async fn test_latin1_fallback() {
        let mut file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        // 0xE9 is 'é' in Latin-1 but invalid standalone UTF-8.
        file.write_all(b"caf\xe9").unwrap();

        let source = SourceDocument::new(file.path(), SourceKind::Text, 4);
        let text = extract_text(&source).await.unwrap();
        assert_eq!(text, "café");
    }

    #[tokio::test]
    async fn test_markdown_is_raw() {
        let mut file = tempfile::NamedTempFile::with_suffix(".md").unwrap();
        write!(file, "# Title\n\nSome *markdown*.").unwrap();

        let source = SourceDocument::new(file.path(), SourceKind::Markdown, 24);
        let text = extract_text(&source).await.unwrap();
        assert!(text.contains("# Title"));
        assert!(text.contains("*markdown*"));
    }

    #[tokio::test]
    async fn test_empty_source_rejected() {
        let file = tempfile::NamedTempFile::with_suffix(".txt").unwrap();
        let source = SourceDocument::new(file.path(), SourceKind::Text, 0);
        assert!(matches!(
            extract_text(&source).await,
            Err(ScriptError::EmptySource)
        ));
    }
}
