//! Tailored-document schema.
//!
//! The generative model is instructed to return this shape as JSON, but its
//! output is loosely typed in practice: list fields arrive as arrays or as
//! single comma-separated strings, optional sections go missing, entries come
//! back half-empty. `RawTailoredCv` accepts all of that; `normalize()` turns
//! it into the strict `TailoredCv` the renderer consumes, or reports why the
//! document is unusable so the orchestrator can retry.

use serde::{Deserialize, Serialize};

/// A list that may arrive as a JSON array or as a single string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LooseList {
    Many(Vec<String>),
    One(String),
}

/// Normalizes comma-separated list fields (skills, links): splits on commas,
/// trims, drops empties.
pub fn normalize_list(raw: Option<LooseList>) -> Vec<String> {
    let items = match raw {
        None => return Vec::new(),
        Some(LooseList::Many(items)) => items,
        Some(LooseList::One(joined)) => vec![joined],
    };
    items
        .iter()
        .flat_map(|item| item.split(','))
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// Normalizes free-text line fields (bullets, details). Commas are content
/// here, so a single string only splits on newlines.
pub fn normalize_lines(raw: Option<LooseList>) -> Vec<String> {
    let items = match raw {
        None => return Vec::new(),
        Some(LooseList::Many(items)) => items,
        Some(LooseList::One(joined)) => joined.lines().map(String::from).collect(),
    };
    items
        .iter()
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

fn opt_trim(raw: Option<String>) -> Option<String> {
    raw.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ────────────────────────────────────────────────────────────────────────────
// Loose schema, as the model returns it
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct RawTailoredCv {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub contact: Option<RawContact>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub experience: Vec<RawExperienceEntry>,
    #[serde(default)]
    pub education: Vec<RawEducationEntry>,
    #[serde(default)]
    pub technical_skills: Option<LooseList>,
    #[serde(default)]
    pub soft_skills: Option<LooseList>,
    #[serde(default)]
    pub portfolio: Vec<RawPortfolioItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawContact {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub links: Option<LooseList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawExperienceEntry {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub date_range: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub bullets: Option<LooseList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawEducationEntry {
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub date_range: Option<String>,
    #[serde(default)]
    pub details: Option<LooseList>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawPortfolioItem {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl RawTailoredCv {
    /// Tightens the loose document. A blank name makes the whole document
    /// unusable; everything else degrades to empty sections.
    pub fn normalize(self) -> Result<TailoredCv, String> {
        let name = opt_trim(self.name).ok_or_else(|| "missing candidate name".to_string())?;

        let experience: Vec<ExperienceEntry> = self
            .experience
            .into_iter()
            .filter_map(RawExperienceEntry::normalize)
            .collect();
        let education: Vec<EducationEntry> = self
            .education
            .into_iter()
            .filter_map(RawEducationEntry::normalize)
            .collect();
        let portfolio: Vec<PortfolioItem> = self
            .portfolio
            .into_iter()
            .filter_map(RawPortfolioItem::normalize)
            .collect();

        Ok(TailoredCv {
            name,
            title: opt_trim(self.title),
            contact: self.contact.map(RawContact::normalize).unwrap_or_default(),
            summary: opt_trim(self.summary),
            experience,
            education,
            technical_skills: normalize_list(self.technical_skills),
            soft_skills: normalize_list(self.soft_skills),
            portfolio,
        })
    }
}

impl RawContact {
    fn normalize(self) -> Contact {
        Contact {
            email: opt_trim(self.email),
            phone: opt_trim(self.phone),
            location: opt_trim(self.location),
            links: normalize_list(self.links),
        }
    }
}

impl RawExperienceEntry {
    /// Entries with no role, no employer, and no bullets carry nothing worth
    /// rendering and are dropped.
    fn normalize(self) -> Option<ExperienceEntry> {
        let title = opt_trim(self.title).unwrap_or_default();
        let organization = opt_trim(self.organization).unwrap_or_default();
        let bullets = normalize_lines(self.bullets);
        if title.is_empty() && organization.is_empty() && bullets.is_empty() {
            return None;
        }
        Some(ExperienceEntry {
            title,
            organization,
            date_range: opt_trim(self.date_range),
            location: opt_trim(self.location),
            bullets,
        })
    }
}

impl RawEducationEntry {
    fn normalize(self) -> Option<EducationEntry> {
        let degree = opt_trim(self.degree).unwrap_or_default();
        let institution = opt_trim(self.institution).unwrap_or_default();
        if degree.is_empty() && institution.is_empty() {
            return None;
        }
        Some(EducationEntry {
            degree,
            institution,
            date_range: opt_trim(self.date_range),
            details: normalize_lines(self.details),
        })
    }
}

impl RawPortfolioItem {
    fn normalize(self) -> Option<PortfolioItem> {
        let name = opt_trim(self.name).unwrap_or_default();
        let url = opt_trim(self.url);
        if name.is_empty() && url.is_none() {
            return None;
        }
        Some(PortfolioItem {
            name,
            url,
            description: opt_trim(self.description),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Normalized schema, as the renderer consumes it
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TailoredCv {
    pub name: String,
    pub title: Option<String>,
    #[serde(default)]
    pub contact: Contact,
    pub summary: Option<String>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
    #[serde(default)]
    pub technical_skills: Vec<String>,
    #[serde(default)]
    pub soft_skills: Vec<String>,
    #[serde(default)]
    pub portfolio: Vec<PortfolioItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Contact {
    pub email: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl Contact {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.phone.is_none() && self.location.is_none() && self.links.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExperienceEntry {
    pub title: String,
    pub organization: String,
    pub date_range: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub bullets: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EducationEntry {
    pub degree: String,
    pub institution: String,
    pub date_range: Option<String>,
    #[serde(default)]
    pub details: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioItem {
    pub name: String,
    pub url: Option<String>,
    pub description: Option<String>,
}
