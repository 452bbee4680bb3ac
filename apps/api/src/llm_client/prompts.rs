// Prompt builders for the three generation requests.
// Output must be a pure function of the inputs: identical requests produce
// byte-identical prompts.

use serde_json::Value;

use crate::models::enhancement::Language;

/// Fallback job focus when the caller gives none.
pub const DEFAULT_JOB_FOCUS: &str = "General improvement";
const DEFAULT_SUGGESTION_FOCUS: &str = "general career improvement";

/// Target layout every enhanced resume is restructured into.
pub const RESUME_TEMPLATE: &str = "\
# [FULL NAME]

📞 [PHONE NUMBER] | 📧 [EMAIL] | 📍 [LOCATION]

---

## EDUCATION

**[UNIVERSITY/INSTITUTION]** – *[DEGREE], [FIELD OF STUDY]*
*[START DATE] – [END DATE]*

## SKILLS

**Programming Languages:** [List programming languages, e.g., Python, Java, JavaScript]
**Frameworks & Tools:** [List frameworks and tools, e.g., React, Node.js, Docker, AWS]
**Core Strengths:** [List key strengths, e.g., problem-solving, teamwork, leadership]
**Languages:** [List languages and proficiency levels, e.g., English (Native), Spanish (Fluent)]

## EXPERIENCE

**[JOB TITLE]** | [COMPANY NAME] ([company-website.com])  *[START DATE] – [END DATE]* · [LOCATION/REMOTE]

- [Bullet point describing key responsibility or achievement]
- [Bullet point describing key responsibility or achievement]
- [Bullet point describing key responsibility or achievement]

## PROJECTS

**[PROJECT NAME]** | *[PROJECT DURATION]*

- [Bullet point describing project scope and technologies used]";

pub fn enhance_prompt(source_text: &str, job_focus: Option<&str>, language: Language) -> String {
    let job_focus = non_blank(job_focus).unwrap_or(DEFAULT_JOB_FOCUS);
    let mut prompt = format!(
        "You are an expert career coach. Transform the following resume to match this EXACT template format:\n\n\
         TEMPLATE FORMAT:\n{RESUME_TEMPLATE}\n\n\
         CURRENT RESUME:\n{source_text}\n\n\
         JOB FOCUS: {job_focus}\n\n\
         INSTRUCTIONS:\n\
         1. Restructure the resume to EXACTLY match the template format\n\
         2. Replace template placeholders with actual information from the current resume\n\
         3. Preserve all factual information (names, dates, companies, metrics)\n\
         4. Enhance descriptions to be more professional and results-oriented\n\
         5. If sections are missing, create appropriate content based on available information\n\
         6. Output ONLY the enhanced resume in the exact template format\n\
         7. Do not include any explanations or additional text"
    );

    if !language.is_default() {
        let name = language.display_name();
        prompt.push_str(&format!(
            "\n\nCRITICAL LANGUAGE REQUIREMENTS:\n\
             - Write the ENTIRE output in {name}, including section headings\n\
             - Keep names, dates, numbers, URLs and technology names unchanged\n\
             - Do NOT mix languages and do NOT add an English copy"
        ));
    }
    prompt
}

pub fn translate_prompt(text: &str, language: Language) -> String {
    format!(
        "Translate the following resume into {}, preserving dates, numbers, and technology names. \
         Output Markdown format. Keep the structure and formatting intact.\n\n\
         Resume text:\n{text}",
        language.display_name()
    )
}

pub fn suggestions_prompt(structured: &Value, job_focus: Option<&str>) -> String {
    let job_focus = non_blank(job_focus).unwrap_or(DEFAULT_SUGGESTION_FOCUS);
    format!(
        "Given resume: {structured} and job: {job_focus}, suggest 3-5 practical ways the candidate \
         can improve competitiveness. \
         Return ONLY JSON: {{\"suggestions\": [\"...\", \"...\"]}} \
         Focus on actionable improvements like: \
         - Specific skills to learn or certify \
         - Project ideas to strengthen portfolio \
         - Ways to quantify achievements \
         - Industry-relevant experience to gain \
         - Networking or learning opportunities"
    )
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}
