//! Locally generated error placeholder images.

/// Render an SVG placeholder naming the visual type and the failure.
/// Produced entirely locally so it can never itself fail over the network.
pub(crate) fn placeholder_svg(
    visual_type: &str,
    message: &str,
    width: u32,
    height: u32,
) -> Vec<u8> {
    let type_label = escape(visual_type);
    let detail = escape(&truncate(message, 140));

    format!(
        r##"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">
  <rect width="100%" height="100%" fill="#1e1e2e"/>
  <rect x="24" y="24" width="{inner_w}" height="{inner_h}" fill="none" stroke="#f38ba8" stroke-width="3" stroke-dasharray="12 8"/>
  <text x="50%" y="45%" text-anchor="middle" fill="#f38ba8" font-family="sans-serif" font-size="42">{type_label} unavailable</text>
  <text x="50%" y="58%" text-anchor="middle" fill="#cdd6f4" font-family="sans-serif" font-size="20">{detail}</text>
</svg>
"##,
        inner_w = width.saturating_sub(48),
        inner_h = height.saturating_sub(48),
    )
    .into_bytes()
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let mut out: String = text.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_names_the_type() {
        let svg = String::from_utf8(placeholder_svg("formula", "renderer down", 1280, 720)).unwrap();
        assert!(svg.contains("formula unavailable"));
        assert!(svg.contains("renderer down"));
        assert!(svg.starts_with("<svg"));
    }

    #[test]
    fn test_placeholder_escapes_markup() {
        let svg =
            String::from_utf8(placeholder_svg("slide", "<script>alert(1)</script>", 640, 360))
                .unwrap();
        assert!(!svg.contains("<script>"));
        assert!(svg.contains("&lt;script&gt;"));
    }
}
