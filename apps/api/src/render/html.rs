//! HTML rendering of a tailored document.
//!
//! Print-oriented markup with an embedded stylesheet, built section by
//! section. The rule throughout: an empty section contributes no markup, not
//! an empty heading.

use crate::models::tailored::{EducationEntry, ExperienceEntry, PortfolioItem, TailoredCv};

const STYLE: &str = r#"
  body { font-family: Georgia, 'Times New Roman', serif; color: #1a1a1a;
         max-width: 48rem; margin: 0 auto; padding: 2rem; font-size: 11pt; }
  h1 { font-size: 20pt; margin: 0 0 0.1rem 0; }
  h2 { font-size: 13pt; border-bottom: 1px solid #999; padding-bottom: 0.15rem;
       margin: 1.2rem 0 0.5rem 0; text-transform: uppercase; letter-spacing: 0.05em; }
  h3 { font-size: 11.5pt; margin: 0.7rem 0 0.1rem 0; }
  p { margin: 0.2rem 0; }
  ul { margin: 0.25rem 0 0.25rem 1.2rem; padding: 0; }
  li { margin: 0.15rem 0; }
  .headline { color: #444; font-size: 12pt; }
  .contact { color: #555; font-size: 9.5pt; }
  .meta { color: #555; font-size: 9.5pt; font-style: italic; }
"#;

/// Renders the document as a standalone HTML page.
pub fn render_html(cv: &TailoredCv) -> String {
    let mut page = String::with_capacity(4096);
    page.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    page.push_str(&format!("<title>{}</title>\n", escape(&cv.name)));
    page.push_str(&format!("<style>{STYLE}</style>\n</head>\n<body>\n"));

    page.push_str(&format!("<h1>{}</h1>\n", escape(&cv.name)));
    if let Some(ref title) = cv.title {
        page.push_str(&format!("<p class=\"headline\">{}</p>\n", escape(title)));
    }
    if let Some(contact) = contact_line(cv) {
        page.push_str(&format!("<p class=\"contact\">{contact}</p>\n"));
    }

    if let Some(ref summary) = cv.summary {
        page.push_str("<h2>Summary</h2>\n");
        page.push_str(&format!("<p>{}</p>\n", escape(summary)));
    }

    if !cv.experience.is_empty() {
        page.push_str("<h2>Experience</h2>\n");
        for entry in &cv.experience {
            push_experience(&mut page, entry);
        }
    }

    if !cv.education.is_empty() {
        page.push_str("<h2>Education</h2>\n");
        for entry in &cv.education {
            push_education(&mut page, entry);
        }
    }

    if !cv.technical_skills.is_empty() {
        page.push_str("<h2>Technical Skills</h2>\n");
        page.push_str(&format!("<p>{}</p>\n", escape(&cv.technical_skills.join(", "))));
    }

    if !cv.soft_skills.is_empty() {
        page.push_str("<h2>Soft Skills</h2>\n");
        page.push_str(&format!("<p>{}</p>\n", escape(&cv.soft_skills.join(", "))));
    }

    if !cv.portfolio.is_empty() {
        page.push_str("<h2>Portfolio</h2>\n");
        for item in &cv.portfolio {
            push_portfolio(&mut page, item);
        }
    }

    page.push_str("</body>\n</html>\n");
    page
}

fn contact_line(cv: &TailoredCv) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    if let Some(ref email) = cv.contact.email {
        parts.push(escape(email));
    }
    if let Some(ref phone) = cv.contact.phone {
        parts.push(escape(phone));
    }
    if let Some(ref location) = cv.contact.location {
        parts.push(escape(location));
    }
    for link in &cv.contact.links {
        parts.push(escape(link));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" &middot; "))
    }
}

fn push_experience(page: &mut String, entry: &ExperienceEntry) {
    let heading = match (entry.title.is_empty(), entry.organization.is_empty()) {
        (false, false) => format!("{} &mdash; {}", escape(&entry.title), escape(&entry.organization)),
        (false, true) => escape(&entry.title),
        (true, _) => escape(&entry.organization),
    };
    page.push_str(&format!("<h3>{heading}</h3>\n"));

    let mut meta: Vec<String> = Vec::new();
    if let Some(ref range) = entry.date_range {
        meta.push(escape(range));
    }
    if let Some(ref location) = entry.location {
        meta.push(escape(location));
    }
    if !meta.is_empty() {
        page.push_str(&format!("<p class=\"meta\">{}</p>\n", meta.join(" | ")));
    }

    if !entry.bullets.is_empty() {
        page.push_str("<ul>\n");
        for bullet in &entry.bullets {
            page.push_str(&format!("<li>{}</li>\n", escape(bullet)));
        }
        page.push_str("</ul>\n");
    }
}

fn push_education(page: &mut String, entry: &EducationEntry) {
    let heading = match (entry.degree.is_empty(), entry.institution.is_empty()) {
        (false, false) => format!("{} &mdash; {}", escape(&entry.degree), escape(&entry.institution)),
        (false, true) => escape(&entry.degree),
        (true, _) => escape(&entry.institution),
    };
    page.push_str(&format!("<h3>{heading}</h3>\n"));
    if let Some(ref range) = entry.date_range {
        page.push_str(&format!("<p class=\"meta\">{}</p>\n", escape(range)));
    }
    if !entry.details.is_empty() {
        page.push_str("<ul>\n");
        for detail in &entry.details {
            page.push_str(&format!("<li>{}</li>\n", escape(detail)));
        }
        page.push_str("</ul>\n");
    }
}

fn push_portfolio(page: &mut String, item: &PortfolioItem) {
    page.push_str(&format!("<h3>{}</h3>\n", escape(&item.name)));
    if let Some(ref url) = item.url {
        page.push_str(&format!("<p class=\"meta\">{}</p>\n", escape(url)));
    }
    if let Some(ref description) = item.description {
        page.push_str(&format!("<p>{}</p>\n", escape(description)));
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}
