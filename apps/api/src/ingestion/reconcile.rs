//! Reconciliation — decides which extracted missions and skills are new to a consultant's profile.
//!
//! Pure: the same extraction and snapshot always produce the same decision.
//!
//! Missions match when their normalized client names are equal and either both start dates
//! are equal or at least one of them is missing. Skills match on the normalized name within
//! one category only. No fuzzy matching.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingestion::models::{Competences, ExtractionResult, MissionRecord, SkillCategory};

/// A mission already stored on the consultant's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingMission {
    pub id: Uuid,
    pub client: String,
    pub date_debut: Option<NaiveDate>,
}

/// A skill already stored on the consultant's profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistingSkill {
    pub id: Uuid,
    pub category: SkillCategory,
    pub name: String,
}

/// Point-in-time view of a profile, read once per reconciliation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileSnapshot {
    pub missions: Vec<ExistingMission>,
    pub skills: Vec<ExistingSkill>,
}

/// What a skipped candidate matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ref", rename_all = "snake_case")]
pub enum DuplicateOf {
    /// An entity already on the profile.
    Existing(Uuid),
    /// An earlier accepted candidate of the same extraction, by position in its `*_to_add` list.
    EarlierInBatch(usize),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMission {
    pub mission: MissionRecord,
    pub duplicate_of: DuplicateOf,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillCandidate {
    pub category: SkillCategory,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateSkill {
    pub category: SkillCategory,
    pub name: String,
    pub duplicate_of: DuplicateOf,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationDecision {
    /// In extraction order.
    pub missions_to_add: Vec<MissionRecord>,
    pub missions_skipped_as_duplicate: Vec<DuplicateMission>,
    /// Grouped by category (technical, functional, language, certification), extraction order within.
    pub skills_to_add: Vec<SkillCandidate>,
    pub skills_skipped_as_duplicate: Vec<DuplicateSkill>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecisionSummary {
    pub missions_to_add: usize,
    pub missions_skipped: usize,
    pub skills_to_add: usize,
    pub skills_skipped: usize,
}

impl ReconciliationDecision {
    pub fn summary(&self) -> DecisionSummary {
        DecisionSummary {
            missions_to_add: self.missions_to_add.len(),
            missions_skipped: self.missions_skipped_as_duplicate.len(),
            skills_to_add: self.skills_to_add.len(),
            skills_skipped: self.skills_skipped_as_duplicate.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.missions_to_add.is_empty()
            && self.missions_skipped_as_duplicate.is_empty()
            && self.skills_to_add.is_empty()
            && self.skills_skipped_as_duplicate.is_empty()
    }
}

/// Normalization key for names: trimmed, lowercased, internal whitespace collapsed.
pub fn normalize_key(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn missions_match(
    client_a: &str,
    start_a: Option<NaiveDate>,
    client_b: &str,
    start_b: Option<NaiveDate>,
) -> bool {
    if client_a != client_b {
        return false;
    }
    match (start_a, start_b) {
        (Some(a), Some(b)) => a == b,
        // Client alone decides when either side is dateless.
        _ => true,
    }
}

/// Reconciles a validated extraction against a profile snapshot.
pub fn reconcile_extraction(
    extraction: &ExtractionResult,
    snapshot: &ProfileSnapshot,
) -> ReconciliationDecision {
    reconcile(&extraction.missions, &extraction.competences, snapshot)
}

/// Splits extracted missions and skills into new vs. already-known.
pub fn reconcile(
    missions: &[MissionRecord],
    competences: &Competences,
    snapshot: &ProfileSnapshot,
) -> ReconciliationDecision {
    let mut decision = ReconciliationDecision::default();
    if missions.is_empty() && competences.is_empty() {
        return decision;
    }

    let existing_missions: Vec<(String, Option<NaiveDate>, Uuid)> = snapshot
        .missions
        .iter()
        .map(|m| (normalize_key(&m.client), m.date_debut, m.id))
        .collect();
    let mut accepted: Vec<(String, Option<NaiveDate>)> = Vec::new();

    for mission in missions {
        let key = normalize_key(&mission.client);
        let duplicate_of = existing_missions
            .iter()
            .find(|(client, start, _)| missions_match(&key, mission.date_debut, client, *start))
            .map(|(_, _, id)| DuplicateOf::Existing(*id))
            .or_else(|| {
                accepted
                    .iter()
                    .position(|(client, start)| missions_match(&key, mission.date_debut, client, *start))
                    .map(DuplicateOf::EarlierInBatch)
            });

        match duplicate_of {
            Some(duplicate_of) => decision.missions_skipped_as_duplicate.push(DuplicateMission {
                mission: mission.clone(),
                duplicate_of,
            }),
            None => {
                accepted.push((key, mission.date_debut));
                decision.missions_to_add.push(mission.clone());
            }
        }
    }

    for category in SkillCategory::ALL {
        let existing: Vec<(String, Uuid)> = snapshot
            .skills
            .iter()
            .filter(|s| s.category == category)
            .map(|s| (normalize_key(&s.name), s.id))
            .collect();
        let mut accepted: Vec<String> = Vec::new();

        for name in competences.for_category(category) {
            let key = normalize_key(name);
            if key.is_empty() {
                continue;
            }
            let duplicate_of = existing
                .iter()
                .find(|(existing_key, _)| *existing_key == key)
                .map(|(_, id)| DuplicateOf::Existing(*id))
                .or_else(|| {
                    // Index into skills_to_add, not into this category's list.
                    let offset = decision.skills_to_add.len() - accepted.len();
                    accepted
                        .iter()
                        .position(|k| *k == key)
                        .map(|pos| DuplicateOf::EarlierInBatch(offset + pos))
                });

            match duplicate_of {
                Some(duplicate_of) => decision.skills_skipped_as_duplicate.push(DuplicateSkill {
                    category,
                    name: name.clone(),
                    duplicate_of,
                }),
                None => {
                    accepted.push(key);
                    decision.skills_to_add.push(SkillCandidate {
                        category,
                        name: name.trim().to_string(),
                    });
                }
            }
        }
    }

    decision
}
