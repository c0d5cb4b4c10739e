//! Response validation — turns a raw provider envelope into a typed `ExtractionResult`.
//!
//! Pure apart from reading the clock for provenance. Absent or oddly-typed fields are
//! normalized to documented defaults; only an unusable envelope or non-object payload fails.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use crate::ingestion::models::{
    Competences, ConsultantInfo, ExtractionMetadata, ExtractionResult, MissionEnd, MissionFlag,
    MissionRecord,
};
use crate::ingestion::reconcile::normalize_key;
use crate::llm_client::{truncate_chars, RawModelResponse};

/// Characters of offending model output kept for diagnostics.
pub const SNIPPET_CHARS: usize = 200;

const ONGOING_MARKERS: [&str; 5] = ["ongoing", "present", "current", "en cours", "aujourd'hui"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("malformed provider envelope: {0}")]
    MalformedEnvelope(String),

    #[error("model output is not valid JSON ({reason}); output starts with: {snippet:?}")]
    InvalidJson { reason: String, snippet: String },

    #[error("model output must be a JSON object, got {0}")]
    UnexpectedShape(&'static str),
}

/// Validates a model response against the extraction contract.
pub fn parse_response(
    raw: &RawModelResponse,
    source_text: &str,
) -> Result<ExtractionResult, ValidationError> {
    parse_response_at(raw, source_text, Utc::now())
}

pub(crate) fn parse_response_at(
    raw: &RawModelResponse,
    source_text: &str,
    analyzed_at: DateTime<Utc>,
) -> Result<ExtractionResult, ValidationError> {
    let envelope: Value = serde_json::from_str(&raw.body)
        .map_err(|e| ValidationError::MalformedEnvelope(format!("body is not JSON: {e}")))?;
    let completion = extract_completion(&envelope)?;
    let payload = strip_json_fences(&completion);

    let value: Value = serde_json::from_str(payload).map_err(|e| ValidationError::InvalidJson {
        reason: e.to_string(),
        snippet: truncate_chars(payload, SNIPPET_CHARS),
    })?;
    let object = value
        .as_object()
        .ok_or_else(|| ValidationError::UnexpectedShape(json_kind(&value)))?;

    let source = envelope
        .get("model")
        .and_then(Value::as_str)
        .filter(|m| !m.trim().is_empty())
        .unwrap_or(&raw.requested_model)
        .to_string();

    Ok(normalize_extraction(
        object,
        ExtractionMetadata {
            source,
            analyzed_at,
            source_text_length: source_text.chars().count(),
        },
    ))
}

/// Pulls `choices[0].message.content` out of a chat-completions envelope.
fn extract_completion(envelope: &Value) -> Result<String, ValidationError> {
    let content = envelope
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .and_then(|message| message.get("content"))
        .ok_or_else(|| {
            ValidationError::MalformedEnvelope("missing choices[0].message.content".to_string())
        })?;

    let text = match content {
        Value::String(s) => s.clone(),
        // Content-part arrays: keep the text parts only.
        Value::Array(parts) => parts
            .iter()
            .filter(|p| p.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    };

    if text.trim().is_empty() {
        return Err(ValidationError::MalformedEnvelope(
            "model returned empty content".to_string(),
        ));
    }
    Ok(text)
}

/// Strips ```json ... ``` or ``` ... ``` code fences from LLM output.
/// A missing closing fence is tolerated.
pub fn strip_json_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest
        .strip_prefix("json")
        .or_else(|| rest.strip_prefix("JSON"))
        .unwrap_or(rest)
        .trim_start();
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn normalize_extraction(object: &Map<String, Value>, metadata: ExtractionMetadata) -> ExtractionResult {
    let info = object.get("consultant_info");
    let consultant_info = ConsultantInfo {
        name: text_field(info.and_then(|i| i.get("name"))),
        email: text_field(info.and_then(|i| i.get("email"))),
        phone: text_field(info.and_then(|i| i.get("phone"))),
        years_experience: number_field(info.and_then(|i| i.get("years_experience"))),
        education_level: text_field(info.and_then(|i| i.get("education_level"))),
    };

    let mut missions = Vec::new();
    let mut dropped_missions = 0;
    if let Some(items) = object.get("missions").and_then(Value::as_array) {
        for (idx, item) in items.iter().enumerate() {
            match mission_from_json(item) {
                Some(mission) => missions.push(mission),
                None => {
                    warn!("Dropping extracted mission {idx}: missing client");
                    dropped_missions += 1;
                }
            }
        }
    }

    let comp = object.get("competences");
    let competences = Competences {
        technical: string_list(comp.and_then(|c| c.get("technical"))),
        functional: string_list(comp.and_then(|c| c.get("functional"))),
        languages: string_list(comp.and_then(|c| c.get("languages"))),
        certifications: string_list(comp.and_then(|c| c.get("certifications"))),
    };

    ExtractionResult {
        consultant_info,
        missions,
        competences,
        formation: text_field(object.get("formation")),
        resume_general: text_field(object.get("resume_general")),
        disponibilite: text_field(object.get("disponibilite")),
        mobilite: text_field(object.get("mobilite")),
        salaire_actuel: text_field(object.get("salaire_actuel")),
        pretentions: text_field(object.get("pretentions")),
        dropped_missions,
        metadata,
    }
}

fn mission_from_json(value: &Value) -> Option<MissionRecord> {
    let obj = value.as_object()?;
    let client = text_field(obj.get("client"))?;

    let mut flags = Vec::new();
    let date_debut = match obj.get("date_debut") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let raw = text_field(Some(v)).unwrap_or_default();
            match parse_date(&raw) {
                Some(date) => Some(date),
                None if raw.is_empty() => None,
                None => {
                    flags.push(MissionFlag::UnparseableStartDate(raw));
                    None
                }
            }
        }
    };
    let date_fin = match obj.get("date_fin") {
        None | Some(Value::Null) => None,
        Some(v) => {
            let raw = text_field(Some(v)).unwrap_or_default();
            match parse_mission_end(&raw) {
                Some(end) => Some(end),
                None if raw.is_empty() => None,
                None => {
                    flags.push(MissionFlag::UnparseableEndDate(raw));
                    None
                }
            }
        }
    };

    let mission = MissionRecord {
        role: text_field(obj.get("role")),
        date_debut,
        date_fin,
        description: text_field(obj.get("description")),
        technologies: string_list(obj.get("technologies")),
        functional_skills: string_list(obj.get("functional_skills")),
        flags,
        ..MissionRecord::new(client)
    };
    Some(with_date_order_flag(mission))
}

/// Re-applies the extraction rules to a mission edited in the review UI.
/// Returns `None` when the client is blank.
pub fn sanitize_mission(mission: MissionRecord) -> Option<MissionRecord> {
    let client = clean_text(&mission.client)?;
    let flags = mission
        .flags
        .into_iter()
        .filter(|f| match f {
            MissionFlag::UnparseableStartDate(_) => mission.date_debut.is_none(),
            MissionFlag::UnparseableEndDate(_) => mission.date_fin.is_none(),
            MissionFlag::EndBeforeStart => false,
        })
        .collect();

    let mission = MissionRecord {
        client,
        role: mission.role.as_deref().and_then(clean_text),
        date_debut: mission.date_debut,
        date_fin: mission.date_fin,
        description: mission.description.as_deref().and_then(clean_text),
        technologies: dedup_names(mission.technologies),
        functional_skills: dedup_names(mission.functional_skills),
        flags,
    };
    Some(with_date_order_flag(mission))
}

/// Re-applies list cleanup to competences edited in the review UI.
pub fn sanitize_competences(competences: Competences) -> Competences {
    Competences {
        technical: dedup_names(competences.technical),
        functional: dedup_names(competences.functional),
        languages: dedup_names(competences.languages),
        certifications: dedup_names(competences.certifications),
    }
}

fn with_date_order_flag(mut mission: MissionRecord) -> MissionRecord {
    if let (Some(start), Some(MissionEnd::Date(end))) = (mission.date_debut, mission.date_fin) {
        if end < start {
            warn!(
                "Mission at '{}' ends ({end}) before it starts ({start}); keeping it flagged",
                mission.client
            );
            mission.flags.push(MissionFlag::EndBeforeStart);
        }
    }
    mission
}

/// Accepts ISO-8601 calendar dates, including reduced precision (`YYYY-MM`, `YYYY`).
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // Datetime strings: keep the date part.
    let raw = match raw.find('T') {
        Some(10) => &raw[..10],
        _ => raw,
    };
    match raw.len() {
        10 => NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok(),
        7 => NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d").ok(),
        4 if raw.chars().all(|c| c.is_ascii_digit()) => {
            raw.parse::<i32>().ok().and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1))
        }
        _ => None,
    }
}

pub(crate) fn parse_mission_end(raw: &str) -> Option<MissionEnd> {
    let lower = raw.trim().to_lowercase();
    if ONGOING_MARKERS.contains(&lower.as_str()) {
        return Some(MissionEnd::Ongoing);
    }
    parse_date(raw).map(MissionEnd::Date)
}

fn clean_text(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

/// Reads a free-text field, coercing numbers and lists instead of rejecting them.
fn text_field(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::Null => None,
        Value::String(s) => clean_text(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(|v| text_field(Some(v))).collect();
            (!parts.is_empty()).then(|| parts.join("; "))
        }
        Value::Object(_) => value.map(|v| v.to_string()),
    }
}

fn number_field(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    }
}

/// Reads a list of names. A single comma-separated string is split.
fn string_list(value: Option<&Value>) -> Vec<String> {
    let names = match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| text_field(Some(v))).collect(),
        Some(Value::String(s)) => s.split(',').filter_map(clean_text).collect(),
        _ => Vec::new(),
    };
    dedup_names(names)
}

/// Trims names, drops blanks and keeps the first spelling of each normalized name.
fn dedup_names(names: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    names
        .into_iter()
        .filter_map(|n| clean_text(&n))
        .filter(|n| seen.insert(normalize_key(n)))
        .collect()
}
