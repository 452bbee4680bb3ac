//! Downloadable renderings of an enhancement record.

use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};

use crate::enhancement::fallback::render_suggestions;
use crate::models::enhancement::EnhancementRecord;

const MARKDOWN_CONTENT_TYPE: &str = "text/markdown; charset=utf-8";
const HTML_CONTENT_TYPE: &str = "text/html; charset=utf-8";

/// A rendered document plus the metadata needed to serve it as an attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordExport {
    pub file_name: String,
    pub content_type: &'static str,
    pub body: String,
}

impl IntoResponse for RecordExport {
    fn into_response(self) -> Response {
        let disposition = HeaderValue::from_str(&format!(
            "attachment; filename=\"{}\"",
            self.file_name
        ))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"));

        (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, HeaderValue::from_static(self.content_type)),
                (header::CONTENT_DISPOSITION, disposition),
            ],
            self.body,
        )
            .into_response()
    }
}

fn title(record: &EnhancementRecord) -> String {
    format!("Resume {} v{}", record.submission_id, record.version)
}

fn file_stem(record: &EnhancementRecord) -> String {
    format!(
        "resume-{}-{}-v{}",
        record.submission_id,
        record.kind.as_str(),
        record.version
    )
}

pub fn markdown(record: &EnhancementRecord, exported_at: DateTime<Utc>) -> RecordExport {
    let mut body = format!("# {}\n\n{}\n", title(record), record.text.trim());
    if let Some(suggestions) = record.suggestions.as_ref().filter(|s| !s.is_empty()) {
        if record.text.trim() != render_suggestions(suggestions) {
            body.push_str("\n## Suggestions\n\n");
            for suggestion in suggestions {
                body.push_str(&format!("- {suggestion}\n"));
            }
        }
    }
    body.push_str(&format!(
        "\n---\n*Exported {}*\n",
        exported_at.format("%Y-%m-%d %H:%M UTC")
    ));

    RecordExport {
        file_name: format!("{}.md", file_stem(record)),
        content_type: MARKDOWN_CONTENT_TYPE,
        body,
    }
}

pub fn comparison(original: &str, record: &EnhancementRecord) -> RecordExport {
    let title = escape_html(&title(record));
    let body = format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body {{ font-family: sans-serif; margin: 2rem; }}
.columns {{ display: flex; gap: 2rem; }}
.columns section {{ flex: 1; }}
pre {{ white-space: pre-wrap; background: #f6f8fa; padding: 1rem; }}
</style>
</head>
<body>
<h1>{title}</h1>
<div class="columns">
<section><h2>Original</h2><pre>{original}</pre></section>
<section><h2>Enhanced</h2><pre>{enhanced}</pre></section>
</div>
</body>
</html>
"#,
        original = escape_html(original),
        enhanced = escape_html(&record.text),
    );

    RecordExport {
        file_name: format!("{}-comparison.html", file_stem(record)),
        content_type: HTML_CONTENT_TYPE,
        body,
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
