use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ingestion::validation::{parse_date, parse_mission_end};

/// End of a mission: a concrete date, or still running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissionEnd {
    Date(NaiveDate),
    Ongoing,
}

impl MissionEnd {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            MissionEnd::Date(d) => Some(*d),
            MissionEnd::Ongoing => None,
        }
    }
}

impl Serialize for MissionEnd {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            MissionEnd::Date(d) => serializer.collect_str(&d.format("%Y-%m-%d")),
            MissionEnd::Ongoing => serializer.serialize_str("ongoing"),
        }
    }
}

/// Accepts what the validator accepts, so reviewed data round-trips through confirm.
impl<'de> Deserialize<'de> for MissionEnd {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_mission_end(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized end date '{raw}'")))
    }
}

fn lenient_date<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<NaiveDate>, D::Error> {
    match Option::<String>::deserialize(deserializer)? {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => parse_date(&raw)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized start date '{raw}'"))),
    }
}

/// Data-quality problems found on a mission. Flagged missions are kept as-is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "raw", rename_all = "snake_case")]
pub enum MissionFlag {
    UnparseableStartDate(String),
    UnparseableEndDate(String),
    EndBeforeStart,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionRecord {
    pub client: String,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default, deserialize_with = "lenient_date")]
    pub date_debut: Option<NaiveDate>,
    #[serde(default)]
    pub date_fin: Option<MissionEnd>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub functional_skills: Vec<String>,
    #[serde(default)]
    pub flags: Vec<MissionFlag>,
}

impl MissionRecord {
    pub fn new(client: impl Into<String>) -> Self {
        Self {
            client: client.into(),
            role: None,
            date_debut: None,
            date_fin: None,
            description: None,
            technologies: Vec::new(),
            functional_skills: Vec::new(),
            flags: Vec::new(),
        }
    }

    pub fn is_ongoing(&self) -> bool {
        matches!(self.date_fin, Some(MissionEnd::Ongoing))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillCategory {
    Technical,
    Functional,
    Language,
    Certification,
}

impl SkillCategory {
    pub const ALL: [SkillCategory; 4] = [
        SkillCategory::Technical,
        SkillCategory::Functional,
        SkillCategory::Language,
        SkillCategory::Certification,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SkillCategory::Technical => "technical",
            SkillCategory::Functional => "functional",
            SkillCategory::Language => "language",
            SkillCategory::Certification => "certification",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "technical" => Some(SkillCategory::Technical),
            "functional" => Some(SkillCategory::Functional),
            "language" | "languages" => Some(SkillCategory::Language),
            "certification" | "certifications" => Some(SkillCategory::Certification),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Competences {
    #[serde(default)]
    pub technical: Vec<String>,
    #[serde(default)]
    pub functional: Vec<String>,
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub certifications: Vec<String>,
}

impl Competences {
    pub fn for_category(&self, category: SkillCategory) -> &[String] {
        match category {
            SkillCategory::Technical => &self.technical,
            SkillCategory::Functional => &self.functional,
            SkillCategory::Language => &self.languages,
            SkillCategory::Certification => &self.certifications,
        }
    }

    pub fn is_empty(&self) -> bool {
        SkillCategory::ALL
            .iter()
            .all(|c| self.for_category(*c).is_empty())
    }
}

/// Identity fields read from the CV. Advisory only: never written over the consultant's record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsultantInfo {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub years_experience: Option<f64>,
    pub education_level: Option<String>,
}

/// Provenance of an extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub source: String,
    pub analyzed_at: DateTime<Utc>,
    pub source_text_length: usize,
}

/// Validated model output. Every field has a default, so consumers never branch on key presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub consultant_info: ConsultantInfo,
    pub missions: Vec<MissionRecord>,
    pub competences: Competences,
    pub formation: Option<String>,
    pub resume_general: Option<String>,
    pub disponibilite: Option<String>,
    pub mobilite: Option<String>,
    pub salaire_actuel: Option<String>,
    pub pretentions: Option<String>,
    /// Missions discarded during validation because the client was blank.
    pub dropped_missions: usize,
    #[serde(rename = "_metadata")]
    pub metadata: ExtractionMetadata,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edited_mission_accepts_validator_date_forms() {
        let mission: MissionRecord = serde_json::from_str(
            r#"{"client": "Acme", "date_debut": "2021-03", "date_fin": "en cours"}"#,
        )
        .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(mission.date_debut, NaiveDate::from_ymd_opt(2021, 3, 1));
        assert_eq!(mission.date_fin, Some(MissionEnd::Ongoing));

        let mission: MissionRecord =
            serde_json::from_str(r#"{"client": "Acme", "date_debut": null, "date_fin": "2020"}"#)
                .unwrap_or_else(|e| panic!("{e}"));
        assert_eq!(mission.date_debut, None);
        assert_eq!(mission.date_fin, NaiveDate::from_ymd_opt(2020, 1, 1).map(MissionEnd::Date));
    }

    #[test]
    fn test_unreadable_edited_date_is_rejected() {
        let result = serde_json::from_str::<MissionRecord>(r#"{"client": "Acme", "date_fin": "soon"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_mission_end_serializes_as_written_by_validator() {
        let end = NaiveDate::from_ymd_opt(2022, 6, 30).map(MissionEnd::Date);
        assert_eq!(serde_json::to_string(&end).unwrap_or_default(), r#""2022-06-30""#);
        assert_eq!(
            serde_json::to_string(&MissionEnd::Ongoing).unwrap_or_default(),
            r#""ongoing""#
        );
    }
}
