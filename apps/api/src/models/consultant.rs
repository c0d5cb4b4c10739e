use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// The columns of `missions` needed for duplicate detection.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MissionKeyRow {
    pub id: Uuid,
    pub client: String,
    pub date_debut: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SkillRow {
    pub id: Uuid,
    pub category: String,
    pub name: String,
}
