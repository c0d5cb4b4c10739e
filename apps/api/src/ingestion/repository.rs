use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::ingestion::models::{MissionEnd, MissionRecord, SkillCategory};
use crate::ingestion::reconcile::{ExistingMission, ExistingSkill, ProfileSnapshot, SkillCandidate};
use crate::models::consultant::{MissionKeyRow, SkillRow};

/// Ids created by one confirmed run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AppliedChanges {
    pub mission_ids: Vec<Uuid>,
    pub skill_ids: Vec<Uuid>,
}

/// Consultant profile storage as seen by the ingestion pipeline.
/// Performs no deduplication of its own.
#[async_trait]
pub trait ProfileRepository: Send + Sync {
    async fn consultant_exists(&self, consultant_id: Uuid) -> Result<bool>;

    async fn load_snapshot(&self, consultant_id: Uuid) -> Result<ProfileSnapshot>;

    /// Writes every mission and skill, or none of them.
    async fn apply(
        &self,
        consultant_id: Uuid,
        missions: &[MissionRecord],
        skills: &[SkillCandidate],
    ) -> Result<AppliedChanges>;
}

#[derive(Clone)]
pub struct PgProfileRepository {
    pool: PgPool,
}

impl PgProfileRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ProfileRepository for PgProfileRepository {
    async fn consultant_exists(&self, consultant_id: Uuid) -> Result<bool> {
        Ok(
            sqlx::query_scalar::<_, bool>("SELECT EXISTS(SELECT 1 FROM consultants WHERE id = $1)")
                .bind(consultant_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    async fn load_snapshot(&self, consultant_id: Uuid) -> Result<ProfileSnapshot> {
        let missions = sqlx::query_as::<_, MissionKeyRow>(
            "SELECT id, client, date_debut FROM missions WHERE consultant_id = $1 ORDER BY created_at",
        )
        .bind(consultant_id)
        .fetch_all(&self.pool)
        .await?;

        let skills = sqlx::query_as::<_, SkillRow>(
            "SELECT id, category, name FROM consultant_skills WHERE consultant_id = $1 ORDER BY created_at",
        )
        .bind(consultant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProfileSnapshot {
            missions: missions
                .into_iter()
                .map(|row| ExistingMission {
                    id: row.id,
                    client: row.client,
                    date_debut: row.date_debut,
                })
                .collect(),
            skills: skills
                .into_iter()
                .filter_map(|row| match SkillCategory::parse(&row.category) {
                    Some(category) => Some(ExistingSkill {
                        id: row.id,
                        category,
                        name: row.name,
                    }),
                    None => {
                        warn!("Ignoring skill {} with unknown category '{}'", row.id, row.category);
                        None
                    }
                })
                .collect(),
        })
    }

    async fn apply(
        &self,
        consultant_id: Uuid,
        missions: &[MissionRecord],
        skills: &[SkillCandidate],
    ) -> Result<AppliedChanges> {
        let mut tx = self.pool.begin().await?;
        let mut applied = AppliedChanges::default();

        for mission in missions {
            applied.mission_ids.push(add_mission(&mut tx, consultant_id, mission).await?);
        }
        for skill in skills {
            applied
                .skill_ids
                .push(add_skill(&mut tx, consultant_id, skill.category, &skill.name).await?);
        }

        tx.commit().await?;
        info!(
            "Applied {} missions and {} skills to consultant {consultant_id}",
            applied.mission_ids.len(),
            applied.skill_ids.len()
        );
        Ok(applied)
    }
}

async fn add_mission(
    conn: &mut PgConnection,
    consultant_id: Uuid,
    mission: &MissionRecord,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO missions
            (id, consultant_id, client, role, date_debut, date_fin, ongoing,
             description, technologies, functional_skills)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(id)
    .bind(consultant_id)
    .bind(&mission.client)
    .bind(&mission.role)
    .bind(mission.date_debut)
    .bind(mission.date_fin.as_ref().and_then(MissionEnd::date))
    .bind(mission.is_ongoing())
    .bind(&mission.description)
    .bind(&mission.technologies)
    .bind(&mission.functional_skills)
    .execute(&mut *conn)
    .await?;
    Ok(id)
}

async fn add_skill(
    conn: &mut PgConnection,
    consultant_id: Uuid,
    category: SkillCategory,
    name: &str,
) -> Result<Uuid> {
    let id = Uuid::new_v4();
    sqlx::query(
        "INSERT INTO consultant_skills (id, consultant_id, category, name) VALUES ($1, $2, $3, $4)",
    )
    .bind(id)
    .bind(consultant_id)
    .bind(category.as_str())
    .bind(name)
    .execute(&mut *conn)
    .await?;
    Ok(id)
}
