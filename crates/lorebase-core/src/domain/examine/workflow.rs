//! Examine workflow
//!
//! Approval applies the proposed value first and commits the record's status
//! only once the change has landed. A failed apply leaves the record `Idle`
//! and returns the error. Rejection always commits.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::archive::ArchiveEngine;
use crate::domain::document::{DocumentStore, Document, EXAMINES_TABLE, Filter, decode};
use crate::domain::entity::{EntityCache, EntityStatus, Word};
use crate::domain::taxonomy::AttributeRegistry;
use crate::error::{Error, Result};

use super::examine::{ExamineCategory, ExamineRecord, ExamineStatus};

/// Keys accepted for `Base` proposals
pub const BASE_KEYS: &[&str] = &["name", "cover", "avatar", "summary", "description"];

pub struct ExamineWorkflow {
    store: Arc<dyn DocumentStore>,
    entities: Arc<EntityCache>,
    attributes: Arc<AttributeRegistry>,
    archive: Arc<ArchiveEngine>,
}

impl ExamineWorkflow {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        entities: Arc<EntityCache>,
        attributes: Arc<AttributeRegistry>,
        archive: Arc<ArchiveEngine>,
    ) -> Self {
        Self {
            store,
            entities,
            attributes,
            archive,
        }
    }

    /// Open a proposal against an existing entity
    pub async fn propose(
        &self,
        target: &str,
        key: &str,
        value: &str,
        category: ExamineCategory,
        operator: &str,
    ) -> Result<ExamineRecord> {
        let key = key.trim();
        if key.is_empty() {
            return Err(Error::InvalidArgument("examine key is required".into()));
        }
        self.entities.get(target).await?;

        match category {
            ExamineCategory::Base if !BASE_KEYS.contains(&key) => {
                return Err(Error::InvalidArgument(format!("'{}' is not a base field", key)));
            }
            ExamineCategory::Attribute => {
                self.attributes.get_by_key(key).await?;
            }
            _ => {}
        }

        let now = Utc::now();
        let record = ExamineRecord {
            uid: Uuid::new_v4().to_string(),
            target: target.to_string(),
            key: key.to_string(),
            value: value.to_string(),
            category,
            status: ExamineStatus::Idle,
            creator: operator.to_string(),
            operator: operator.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.store
            .insert(EXAMINES_TABLE, Document::from_value(&record.uid, &record)?)
            .await?;

        info!(examine_uid = %record.uid, target = %target, key = %key, category = %category, "Change proposed");
        Ok(record)
    }

    pub async fn get(&self, uid: &str) -> Result<ExamineRecord> {
        let body = self
            .store
            .find_by_id(EXAMINES_TABLE, uid)
            .await?
            .ok_or_else(|| Error::not_found("examine record", uid))?;
        decode(body)
    }

    /// Undecided proposals targeting an entity, oldest first
    pub async fn list_pending(&self, target: &str) -> Result<Vec<ExamineRecord>> {
        self.list(
            Filter::all()
                .eq("target", target)
                .eq("status", ExamineStatus::Idle.as_str()),
        )
        .await
    }

    /// Every proposal targeting an entity
    pub async fn list_by_target(&self, target: &str) -> Result<Vec<ExamineRecord>> {
        self.list(Filter::all().eq("target", target)).await
    }

    async fn list(&self, filter: Filter) -> Result<Vec<ExamineRecord>> {
        self.store
            .find_many(EXAMINES_TABLE, &filter)
            .await?
            .into_iter()
            .map(decode)
            .collect()
    }

    /// Decide a proposal
    pub async fn update_status(&self, uid: &str, status: ExamineStatus, operator: &str) -> Result<ExamineRecord> {
        let record = self.get(uid).await?;
        if record.status.is_terminal() {
            return Err(Error::Prohibition(format!(
                "examine record '{}' is already {}",
                uid, record.status
            )));
        }

        match status {
            ExamineStatus::Idle => {
                return Err(Error::InvalidArgument("an examine record cannot move back to idle".into()));
            }
            ExamineStatus::Refuse => {}
            ExamineStatus::Free => self.apply(&record, operator).await?,
        }

        let committed = self.commit(record, status, operator).await?;
        info!(examine_uid = %uid, status = %status, operator = %operator, "Examine record decided");
        Ok(committed)
    }

    async fn apply(&self, record: &ExamineRecord, operator: &str) -> Result<()> {
        let entity = self.entities.get(&record.target).await?;
        if entity.status.is_terminal() {
            return Err(Error::Prohibition(format!(
                "entity '{}' is {} and cannot take approved changes",
                entity.uid, entity.status
            )));
        }

        match record.category {
            ExamineCategory::Event => Err(Error::Prohibition("event proposals are not yet actionable".into())),
            ExamineCategory::Base => {
                let target = record.target.as_str();
                match record.key.as_str() {
                    "name" => self.entities.update_name(target, &record.value, operator).await?,
                    "cover" | "avatar" => self.entities.update_cover(target, &record.value, operator).await?,
                    "summary" => self.entities.update_remark(target, &record.value, operator).await?,
                    "description" => {
                        self.entities
                            .update_description(target, &record.value, operator)
                            .await?
                    }
                    other => {
                        return Err(Error::InvalidArgument(format!("'{}' is not a base field", other)));
                    }
                };

                let others = self
                    .list_pending(target)
                    .await?
                    .into_iter()
                    .filter(|r| r.uid != record.uid)
                    .count();
                if others == 0 {
                    self.entities
                        .update_status(target, EntityStatus::Usable, operator)
                        .await?;
                } else {
                    debug!(entity_uid = %target, pending = others, "Promotion waits for other proposals");
                }
                Ok(())
            }
            ExamineCategory::Attribute => {
                let definition = self.attributes.get_by_key(&record.key).await?;
                let updated = self
                    .entities
                    .update_property(&record.target, &definition.uid, parse_words(&record.value), operator)
                    .await?;
                if updated.status == EntityStatus::Usable {
                    self.archive.archive(&updated, operator).await?;
                }
                Ok(())
            }
        }
    }

    async fn commit(&self, mut record: ExamineRecord, status: ExamineStatus, operator: &str) -> Result<ExamineRecord> {
        record.status = status;
        record.operator = operator.to_string();
        record.updated_at = Utc::now();

        let mut fields = Map::new();
        fields.insert("status".into(), serde_json::to_value(record.status)?);
        fields.insert("operator".into(), Value::from(operator));
        fields.insert("updated_at".into(), serde_json::to_value(record.updated_at)?);
        self.store.update_fields(EXAMINES_TABLE, &record.uid, fields).await?;
        Ok(record)
    }
}

/// A JSON array of words, or the whole value as one literal
fn parse_words(value: &str) -> Vec<Word> {
    serde_json::from_str::<Vec<Word>>(value).unwrap_or_else(|_| vec![Word::literal(value)])
}
