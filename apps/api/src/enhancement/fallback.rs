//! Local fallback transforms.
//!
//! Used whenever the generator is not requested, not configured, or fails. Every
//! function here is pure and total: any input yields a usable output.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::models::enhancement::Language;

const ENHANCE_BANNER: &str =
    "# Enhanced Resume\n\n*This resume has been optimized for professional presentation*\n\n";
const ROLE_NOTE_CHARS: usize = 100;
const MAX_FOCUS_TERMS: usize = 3;

/// Weak phrasing and its stronger replacement, matched case-insensitively.
static PHRASE_UPGRADES: LazyLock<Vec<(Regex, &'static str)>> = LazyLock::new(|| {
    [
        (r"(?i)responsible for", "Led"),
        (r"(?i)worked on", "Developed"),
        (r"(?i)helped with", "Collaborated on"),
    ]
    .into_iter()
    .map(|(pattern, replacement)| (Regex::new(pattern).expect("valid regex"), replacement))
    .collect()
});

static WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9+#.\-]*").expect("valid regex"));

/// Words too generic to be worth mirroring from a job focus.
const FOCUS_STOPWORDS: &[&str] = &[
    "about", "ability", "across", "experience", "from", "have", "into", "role", "skills", "strong",
    "team", "that", "their", "this", "will", "with", "work", "years", "your",
];

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFallback;

impl LocalFallback {
    /// Reformats `text` under a fixed banner, upgrading weak phrasing section by section.
    pub fn enhance(&self, text: &str, job_focus: Option<&str>) -> String {
        let mut enhanced = String::from(ENHANCE_BANNER);

        for section in text.split("\n\n") {
            let section = section.trim();
            if section.is_empty() {
                continue;
            }
            let improved = PHRASE_UPGRADES
                .iter()
                .fold(section.to_string(), |acc, (pattern, replacement)| {
                    pattern.replace_all(&acc, *replacement).into_owned()
                });
            enhanced.push_str(&improved);
            enhanced.push_str("\n\n");
        }

        if let Some(focus) = job_focus.filter(|f| !f.trim().is_empty()) {
            let excerpt: String = focus.chars().take(ROLE_NOTE_CHARS).collect();
            enhanced.push_str(&format!("---\n*Enhanced for role: {excerpt}...*\n"));
        }

        enhanced
    }

    /// Returns the source text under a target-language banner. No translation happens.
    pub fn translate(&self, text: &str, language: Language) -> String {
        format!(
            "# {} Resume\n\n*Untranslated copy: the translation service was unavailable*\n\n{text}",
            language.display_name()
        )
    }

    /// Rule-based improvement ideas. Always returns at least one suggestion.
    pub fn suggest(
        &self,
        structured: Option<&Value>,
        text: &str,
        job_focus: Option<&str>,
    ) -> Vec<String> {
        let mut suggestions = Vec::new();

        if !text.chars().any(|c| c.is_ascii_digit()) {
            suggestions.push(
                "Quantify your achievements with concrete numbers such as percentages, revenue or time saved."
                    .to_string(),
            );
        }

        let has_skills = structured
            .and_then(|s| s.get("skills"))
            .is_some_and(|skills| match skills {
                Value::Array(items) => !items.is_empty(),
                Value::String(s) => !s.trim().is_empty(),
                Value::Object(map) => !map.is_empty(),
                _ => false,
            });
        if !has_skills {
            suggestions.push(
                "Add a dedicated skills section listing the tools and technologies you use."
                    .to_string(),
            );
        }

        for term in missing_focus_terms(text, job_focus) {
            suggestions.push(format!(
                "Highlight any experience with '{term}', which the target role mentions."
            ));
        }

        suggestions.push(
            "Strengthen your portfolio with a project that demonstrates the skills the role asks for."
                .to_string(),
        );
        suggestions
    }
}

/// Distinct job-focus words (four letters or more) that never appear in `text`.
fn missing_focus_terms(text: &str, job_focus: Option<&str>) -> Vec<String> {
    let Some(focus) = job_focus else {
        return Vec::new();
    };
    let haystack = text.to_lowercase();
    let mut seen = BTreeSet::new();
    WORD.find_iter(focus)
        .map(|m| m.as_str().trim_end_matches(['.', '-']).to_lowercase())
        .filter(|word| word.chars().count() >= 4)
        .filter(|word| !FOCUS_STOPWORDS.contains(&word.as_str()))
        .filter(|word| !haystack.contains(word.as_str()))
        .filter(|word| seen.insert(word.clone()))
        .take(MAX_FOCUS_TERMS)
        .collect()
}

/// Renders suggestions as the record text stored alongside the list.
pub fn render_suggestions(suggestions: &[String]) -> String {
    suggestions
        .iter()
        .map(|s| format!("- {s}"))
        .collect::<Vec<_>>()
        .join("\n")
}
