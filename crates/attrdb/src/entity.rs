//! Entity limits (`max_run`, `max_run_res.ncpus`, ...).
//!
//! A value maps `(resource, entity)` to a limit, e.g. `max_run_res.ncpus = [u:bob=4],[g:staff=16]`.
//! Each resource key is stored as a separate record, so one attribute can be
//! recovered from several records that have to be merged.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub enum EntityType {
    User,
    Group,
    Project,
    Overall,
}

impl EntityType {
    fn from_char(c: char) -> Option<Self> {
        match c {
            'u' => Some(EntityType::User),
            'g' => Some(EntityType::Group),
            'p' => Some(EntityType::Project),
            'o' => Some(EntityType::Overall),
            _ => None,
        }
    }

    fn as_char(&self) -> char {
        match self {
            EntityType::User => 'u',
            EntityType::Group => 'g',
            EntityType::Project => 'p',
            EntityType::Overall => 'o',
        }
    }
}

#[derive(Debug, Clone, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityType,
    pub name: String,
}

impl Display for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_char(), self.name)
    }
}

/// Limits keyed by resource name (empty for plain limits) and entity.
#[derive(Debug, Clone, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct EntityLimits {
    limits: BTreeMap<String, BTreeMap<Entity, String>>,
}

impl EntityLimits {
    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn get(&self, resource: &str, entity: &Entity) -> Option<&str> {
        self.limits
            .get(resource)
            .and_then(|entities| entities.get(entity))
            .map(|s| s.as_str())
    }

    pub fn insert(&mut self, resource: &str, entity: Entity, limit: String) {
        self.limits
            .entry(resource.to_string())
            .or_default()
            .insert(entity, limit);
    }

    /// Parses a stored value such as `[u:bob=4],[o:PBS_ALL=10]` for one resource key.
    pub fn parse(resource: &str, value: &str) -> Result<Self, String> {
        let mut limits = EntityLimits::default();
        for item in value.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let inner = item
                .strip_prefix('[')
                .and_then(|s| s.strip_suffix(']'))
                .ok_or_else(|| format!("entity limit '{item}' is not enclosed in brackets"))?;
            let (entity, limit) = inner
                .split_once('=')
                .ok_or_else(|| format!("entity limit '{item}' has no value"))?;
            let (kind, name) = entity
                .split_once(':')
                .ok_or_else(|| format!("entity '{entity}' has no type"))?;
            let mut chars = kind.trim().chars();
            let kind = match (chars.next().and_then(EntityType::from_char), chars.next()) {
                (Some(kind), None) => kind,
                _ => return Err(format!("unknown entity type '{kind}'")),
            };
            let name = name.trim();
            if name.is_empty() {
                return Err(format!("entity limit '{item}' has no entity name"));
            }
            if kind == EntityType::Overall && name != "PBS_ALL" {
                return Err(format!("overall limit must use PBS_ALL, not '{name}'"));
            }
            let limit = limit.trim();
            if limit.is_empty() {
                return Err(format!("entity limit '{item}' has an empty value"));
            }
            limits.insert(
                resource,
                Entity {
                    kind,
                    name: name.to_string(),
                },
                limit.to_string(),
            );
        }
        if limits.is_empty() {
            return Err("empty entity limit".to_string());
        }
        Ok(limits)
    }

    /// One `(resource, value)` pair per resource key, in resource order.
    pub fn format_by_resource(&self) -> Vec<(&str, String)> {
        self.limits
            .iter()
            .filter(|(_, entities)| !entities.is_empty())
            .map(|(resource, entities)| {
                let value = entities
                    .iter()
                    .map(|(entity, limit)| format!("[{entity}={limit}]"))
                    .collect::<Vec<_>>()
                    .join(",");
                (resource.as_str(), value)
            })
            .collect()
    }

    /// Adds or overwrites every entry of `other`.
    pub fn merge(&mut self, other: &EntityLimits) {
        for (resource, entities) in &other.limits {
            let target = self.limits.entry(resource.clone()).or_default();
            for (entity, limit) in entities {
                target.insert(entity.clone(), limit.clone());
            }
        }
    }

    /// Removes every entry of `other` that is present.
    pub fn remove_all(&mut self, other: &EntityLimits) {
        for (resource, entities) in &other.limits {
            if let Some(target) = self.limits.get_mut(resource) {
                for entity in entities.keys() {
                    target.remove(entity);
                }
                if target.is_empty() {
                    self.limits.remove(resource);
                }
            }
        }
    }
}
