// CV extraction prompt template and builder.
// The prompt is a pure function of the CV text.

/// Longest CV text embedded in a prompt, in characters.
pub const MAX_CV_CHARS: usize = 12_000;

/// Appended when the CV text was cut at `MAX_CV_CHARS`.
pub const TRUNCATION_MARKER: &str = "\n[... CV TRUNCATED ...]";

pub const CV_EXTRACTION_PROMPT: &str = r#"You are an expert CV analyst working for a consulting firm.
Extract the consultant's profile from the CV below into a structured JSON object.

CV TEXT:
<<<
{cv_text}
>>>

OUTPUT SCHEMA (return exactly this structure):
{
  "consultant_info": {
    "name": "string" | null,
    "email": "string" | null,
    "phone": "string" | null,
    "years_experience": number | null,
    "education_level": "string" | null
  },
  "missions": [
    {
      "client": "string (required)",
      "role": "string" | null,
      "date_debut": "YYYY-MM-DD" | null,
      "date_fin": "YYYY-MM-DD" | "ongoing" | null,
      "description": "string" | null,
      "technologies": ["string"],
      "functional_skills": ["string"]
    }
  ],
  "competences": {
    "technical": ["string"],
    "functional": ["string"],
    "languages": ["string"],
    "certifications": ["string"]
  },
  "formation": "string" | null,
  "resume_general": "string" | null,
  "disponibilite": "string" | null,
  "mobilite": "string" | null,
  "salaire_actuel": "string" | null,
  "pretentions": "string" | null
}

RULES:
1. Never guess. If a field is not stated in the CV, use null (or [] for lists).
2. Dates must be "YYYY-MM-DD". Use "YYYY-MM-01" if only the month is known and "YYYY-01-01" if only the year is known.
3. Use "ongoing" for date_fin when the mission is still in progress.
4. List missions in the order they appear in the CV.
5. Every mission must name its client. Skip a mission if the client is unknown.
6. Reply with the JSON object ONLY: no prose, no explanations."#;

/// Builds the extraction prompt. Over-long text is cut at a fixed character count,
/// so the same input always yields the same prompt.
pub fn build_prompt(cv_text: &str) -> String {
    CV_EXTRACTION_PROMPT.replace("{cv_text}", &truncate_cv(cv_text))
}

fn truncate_cv(cv_text: &str) -> String {
    match cv_text.char_indices().nth(MAX_CV_CHARS) {
        Some((idx, _)) => format!("{}{}", &cv_text[..idx], TRUNCATION_MARKER),
        None => cv_text.to_string(),
    }
}
