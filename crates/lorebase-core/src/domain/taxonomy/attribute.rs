//! Attribute definitions and the global registry
//!
//! Concepts reference attribute definitions by uid. Names and keys are unique
//! across the registry; the document store holds the authoritative unique
//! keys so concurrent creations cannot both succeed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::document::{ATTRIBUTES_TABLE, CONCEPTS_TABLE, Document, DocumentStore, Filter, decode, fields};
use crate::error::{Error, Result};

/// Value type of an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributeKind {
    #[default]
    String,
    Date,
    Number,
    /// Reference to another entity
    Entity,
    /// One of a fixed option list
    Enum,
}

impl AttributeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Date => "date",
            Self::Number => "number",
            Self::Entity => "entity",
            Self::Enum => "enum",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "string" => Some(Self::String),
            "date" => Some(Self::Date),
            "number" => Some(Self::Number),
            "entity" => Some(Self::Entity),
            "enum" => Some(Self::Enum),
            _ => None,
        }
    }
}

/// A typed field definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttributeDefinition {
    pub uid: String,
    pub name: String,
    pub key: String,
    pub kind: AttributeKind,
    /// Lower bound of the valid range
    #[serde(default)]
    pub begin: Option<String>,
    /// Upper bound of the valid range
    #[serde(default)]
    pub end: Option<String>,
    /// Allowed values for `Enum` attributes
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub remark: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub operator: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AttributeDefinition {
    pub fn new(name: impl Into<String>, key: impl Into<String>, kind: AttributeKind) -> Self {
        let now = Utc::now();
        Self {
            uid: Uuid::new_v4().to_string(),
            name: name.into(),
            key: key.into(),
            kind,
            begin: None,
            end: None,
            options: Vec::new(),
            remark: String::new(),
            creator: String::new(),
            operator: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_range(mut self, begin: Option<String>, end: Option<String>) -> Self {
        self.begin = begin;
        self.end = end;
        self
    }

    pub fn with_options(mut self, options: Vec<String>) -> Self {
        self.options = options;
        self
    }

    fn unique_keys(&self) -> Vec<String> {
        vec![format!("name:{}", self.name), format!("key:{}", self.key)]
    }

    fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::InvalidArgument("attribute name is required".into()));
        }
        if self.key.trim().is_empty() {
            return Err(Error::InvalidArgument("attribute key is required".into()));
        }
        if self.kind == AttributeKind::Enum && self.options.is_empty() {
            return Err(Error::InvalidArgument(format!(
                "enum attribute '{}' needs at least one option",
                self.key
            )));
        }
        Ok(())
    }
}

/// Mutable metadata of an attribute definition
#[derive(Debug, Clone, Default, Serialize)]
pub struct AttributeUpdate {
    pub name: String,
    pub begin: Option<String>,
    pub end: Option<String>,
    pub options: Vec<String>,
    pub remark: String,
}

/// Global attribute registry
pub struct AttributeRegistry {
    store: Arc<dyn DocumentStore>,
    attributes: RwLock<Vec<AttributeDefinition>>,
}

impl AttributeRegistry {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            attributes: RwLock::new(Vec::new()),
        }
    }

    /// Reload every live definition from the store
    pub async fn load(&self) -> Result<usize> {
        let rows = self.store.find_many(ATTRIBUTES_TABLE, &Filter::all()).await?;
        let mut loaded = Vec::with_capacity(rows.len());
        for row in rows {
            match decode::<AttributeDefinition>(row) {
                Ok(def) => loaded.push(def),
                Err(e) => warn!(error = %e, "Skipping undecodable attribute definition"),
            }
        }

        let count = loaded.len();
        *self.attributes.write().await = loaded;
        debug!(count, "Attribute registry loaded");
        Ok(count)
    }

    /// Register a new definition
    ///
    /// Fails with `AlreadyExists` when the name or key is taken.
    pub async fn create(&self, mut def: AttributeDefinition, operator: &str) -> Result<AttributeDefinition> {
        def.validate()?;

        let mut attributes = self.attributes.write().await;
        if attributes.iter().any(|a| a.name == def.name) {
            return Err(Error::already_exists("attribute name", &def.name));
        }
        if attributes.iter().any(|a| a.key == def.key) {
            return Err(Error::already_exists("attribute key", &def.key));
        }

        if def.uid.is_empty() {
            def.uid = Uuid::new_v4().to_string();
        }
        def.creator = operator.to_string();
        def.operator = operator.to_string();
        def.created_at = Utc::now();
        def.updated_at = def.created_at;

        let mut document = Document::from_value(&def.uid, &def)?;
        for key in def.unique_keys() {
            document = document.with_unique_key(key);
        }
        self.store.insert(ATTRIBUTES_TABLE, document).await?;
        attributes.push(def.clone());

        info!(attribute_uid = %def.uid, key = %def.key, "Attribute created");
        Ok(def)
    }

    pub async fn get_by_uid(&self, uid: &str) -> Result<AttributeDefinition> {
        self.attributes
            .read()
            .await
            .iter()
            .find(|a| a.uid == uid)
            .cloned()
            .ok_or_else(|| Error::not_found("attribute", uid))
    }

    pub async fn get_by_key(&self, key: &str) -> Result<AttributeDefinition> {
        self.attributes
            .read()
            .await
            .iter()
            .find(|a| a.key == key)
            .cloned()
            .ok_or_else(|| Error::not_found("attribute key", key))
    }

    pub async fn get_by_name(&self, name: &str) -> Result<AttributeDefinition> {
        self.attributes
            .read()
            .await
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| Error::not_found("attribute name", name))
    }

    pub async fn contains(&self, uid: &str) -> bool {
        self.attributes.read().await.iter().any(|a| a.uid == uid)
    }

    pub async fn list(&self) -> Vec<AttributeDefinition> {
        self.attributes.read().await.clone()
    }

    /// Update name and metadata; the key is immutable
    pub async fn update(&self, uid: &str, update: AttributeUpdate, operator: &str) -> Result<AttributeDefinition> {
        let mut attributes = self.attributes.write().await;
        let index = attributes
            .iter()
            .position(|a| a.uid == uid)
            .ok_or_else(|| Error::not_found("attribute", uid))?;

        let mut def = attributes[index].clone();
        let renamed = def.name != update.name;
        def.name = update.name;
        def.begin = update.begin;
        def.end = update.end;
        def.options = update.options;
        def.remark = update.remark;
        def.operator = operator.to_string();
        def.updated_at = Utc::now();
        def.validate()?;

        if renamed {
            if attributes.iter().any(|a| a.uid != uid && a.name == def.name) {
                return Err(Error::already_exists("attribute name", &def.name));
            }
            self.store.rekey(ATTRIBUTES_TABLE, uid, def.unique_keys()).await?;
        }
        self.store.update_fields(ATTRIBUTES_TABLE, uid, fields(&def)?).await?;
        attributes[index] = def.clone();

        info!(attribute_uid = %uid, "Attribute updated");
        Ok(def)
    }

    /// Remove a definition no concept references
    pub async fn remove(&self, uid: &str, operator: &str) -> Result<()> {
        let mut attributes = self.attributes.write().await;
        let index = attributes
            .iter()
            .position(|a| a.uid == uid)
            .ok_or_else(|| Error::not_found("attribute", uid))?;

        let users = self
            .store
            .find_many(CONCEPTS_TABLE, &Filter::all().contains("attributes", uid))
            .await?;
        if !users.is_empty() {
            return Err(Error::Prohibition(format!(
                "attribute '{}' is used by {} concept(s)",
                attributes[index].key,
                users.len()
            )));
        }

        self.store.soft_delete(ATTRIBUTES_TABLE, uid, operator).await?;
        attributes.remove(index);

        info!(attribute_uid = %uid, operator = %operator, "Attribute removed");
        Ok(())
    }
}
