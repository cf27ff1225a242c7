// All LLM prompt constants for the tailoring pipeline.
// The prompt is deterministic: same CV text and job spec text, same prompt.

/// System prompt for CV tailoring — enforces JSON-only output.
pub const TAILOR_SYSTEM: &str = "You are an expert CV writer who restructures \
    real candidate material to fit a specific job. \
    You MUST respond with valid JSON only. \
    Do NOT include any text outside the JSON object. \
    Do NOT use markdown code fences. \
    Do NOT invent employers, titles, dates, or skills not present in the CV.";

/// Tailoring prompt template. Replace `{cv_text}` and `{job_spec_text}`
/// before sending.
pub const TAILOR_PROMPT_TEMPLATE: &str = r#"Rewrite the following CV so it targets the job specification below. Keep every fact grounded in the CV; reorder, reword, and trim for relevance.

Return a JSON object with this EXACT schema (no extra fields):
{
  "name": "Jane Doe",
  "title": "Senior Backend Engineer",
  "contact": {
    "email": "jane@example.com",
    "phone": "+44 20 7946 0000",
    "location": "London, UK",
    "links": ["github.com/janedoe", "janedoe.dev"]
  },
  "summary": "Two to three sentences positioning the candidate for this job.",
  "experience": [
    {
      "title": "Backend Engineer",
      "organization": "ACME Ltd",
      "date_range": "2021 - 2024",
      "location": "Remote",
      "bullets": [
        "Rebuilt the billing pipeline, cutting invoice errors by 80%"
      ]
    }
  ],
  "education": [
    {
      "degree": "BSc Computer Science",
      "institution": "University of Example",
      "date_range": "2014 - 2017",
      "details": ["First-class honours"]
    }
  ],
  "technical_skills": ["Rust", "PostgreSQL", "Redis"],
  "soft_skills": ["Mentoring", "Incident command"],
  "portfolio": [
    {
      "name": "openbook",
      "url": "github.com/janedoe/openbook",
      "description": "Order-book matching engine"
    }
  ]
}

HARD RULES:
1. Use ONLY facts present in the CV text — no invention, no interpolation
2. `name` is REQUIRED; take it verbatim from the CV
3. Order experience entries by relevance to the job specification, most relevant first
4. Every `bullets` item is one complete achievement statement, strongest evidence first
5. `technical_skills` and `soft_skills` are flat string arrays, each skill its own element
6. Omit a field entirely rather than filling it with placeholders or empty strings
7. Keep `summary` specific to this job; never write a generic objective statement

CV TEXT:
{cv_text}

JOB SPECIFICATION:
{job_spec_text}"#;

/// Builds the tailoring prompt for one submission.
pub fn build_tailor_prompt(cv_text: &str, job_spec_text: &str) -> String {
    TAILOR_PROMPT_TEMPLATE
        .replace("{cv_text}", cv_text)
        .replace("{job_spec_text}", job_spec_text)
}
