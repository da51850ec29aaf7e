use crate::domain::SessionSummary;
use unicode_segmentation::UnicodeSegmentation;
use unicode_width::UnicodeWidthStr;

pub const DEFAULT_PREVIEW_WIDTH: usize = 50;
pub const MIN_PREVIEW_WIDTH: usize = 4;
const SESSION_ID_PREVIEW_CHARS: usize = 12;
const ELLIPSIS: &str = "…";

/// Which field a preview line was taken from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PreviewSource {
    CustomTitle,
    FirstUserText,
    Summary,
    MessageCount,
    SessionId,
}

/// Evaluated in order; the first candidate that yields text wins.
pub const PREVIEW_FALLBACK_CHAIN: [PreviewSource; 5] = [
    PreviewSource::CustomTitle,
    PreviewSource::FirstUserText,
    PreviewSource::Summary,
    PreviewSource::MessageCount,
    PreviewSource::SessionId,
];

impl PreviewSource {
    pub fn candidate(self, summary: &SessionSummary) -> Option<String> {
        match self {
            Self::CustomTitle => single_line(summary.custom_title.as_deref()),
            Self::FirstUserText => single_line(summary.first_user_text.as_deref()),
            Self::Summary => single_line(summary.summary_text.as_deref()),
            Self::MessageCount => {
                (summary.message_count > 0).then(|| format_message_count(summary.message_count))
            }
            Self::SessionId => Some(format_session_id(&summary.identity.session_id)),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Preview {
    pub source: PreviewSource,
    pub text: String,
}

/// One display line for a session, never empty and never wider than
/// `max_width` columns (widths below a small floor are raised to it).
pub fn session_preview(summary: &SessionSummary, max_width: usize) -> Preview {
    let max_width = max_width.max(MIN_PREVIEW_WIDTH);
    PREVIEW_FALLBACK_CHAIN
        .iter()
        .find_map(|source| {
            source.candidate(summary).map(|text| Preview {
                source: *source,
                text: truncate_display(&text, max_width),
            })
        })
        .unwrap_or_else(|| Preview {
            source: PreviewSource::SessionId,
            text: truncate_display(&format_session_id(&summary.identity.session_id), max_width),
        })
}

/// Cuts `text` to `max_width` terminal columns, appending `…` when shortened.
///
/// Cuts only fall between grapheme clusters, so flags, skin-tone sequences
/// and joined emoji are kept or dropped whole.
pub fn truncate_display(text: &str, max_width: usize) -> String {
    if max_width == 0 {
        return String::new();
    }
    if display_width(text) <= max_width {
        return text.to_string();
    }

    let available = max_width.saturating_sub(UnicodeWidthStr::width(ELLIPSIS));
    let mut out = String::new();
    let mut used = 0usize;
    for grapheme in text.graphemes(true) {
        let width = UnicodeWidthStr::width(grapheme);
        if used + width > available {
            break;
        }
        out.push_str(grapheme);
        used += width;
    }

    let mut out = out.trim_end().to_string();
    out.push_str(ELLIPSIS);
    out
}

/// Width as `truncate_display` counts it: the sum of per-cluster widths.
pub fn display_width(text: &str) -> usize {
    text.graphemes(true).map(UnicodeWidthStr::width).sum()
}

fn single_line(text: Option<&str>) -> Option<String> {
    let collapsed = text?.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn format_message_count(count: usize) -> String {
    format!("[{} message{}]", count, if count == 1 { "" } else { "s" })
}

fn format_session_id(session_id: &str) -> String {
    let session_id = session_id.trim();
    if session_id.is_empty() {
        return "[unknown session]".to_string();
    }
    if session_id.chars().count() > SESSION_ID_PREVIEW_CHARS {
        let short: String = session_id.chars().take(SESSION_ID_PREVIEW_CHARS).collect();
        format!("[{short}{ELLIPSIS}]")
    } else {
        format!("[{session_id}]")
    }
}
