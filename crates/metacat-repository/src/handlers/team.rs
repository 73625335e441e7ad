//! Teams and their hierarchy

use std::fmt;
use std::str::FromStr;

use metacat_core::{entity_types, fqn, Entity, Error, RelationKind, Result};
use metacat_storage::ReadTransaction;
use serde::{Deserialize, Serialize};

use crate::handler::EntityHandler;

pub const TEAM_TYPE: &str = "teamType";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TeamType {
    Organization,
    BusinessUnit,
    Division,
    Department,
    #[default]
    Group,
}

impl fmt::Display for TeamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TeamType::Organization => "Organization",
            TeamType::BusinessUnit => "BusinessUnit",
            TeamType::Division => "Division",
            TeamType::Department => "Department",
            TeamType::Group => "Group",
        };
        f.write_str(s)
    }
}

impl FromStr for TeamType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Organization" => Ok(TeamType::Organization),
            "BusinessUnit" => Ok(TeamType::BusinessUnit),
            "Division" => Ok(TeamType::Division),
            "Department" => Ok(TeamType::Department),
            "Group" => Ok(TeamType::Group),
            other => Err(Error::invalid(format!("Invalid team type {}", other))),
        }
    }
}

/// Teams are top level; the hierarchy is kept in `children` via `parentOf` edges
pub struct TeamHandler;

impl EntityHandler for TeamHandler {
    fn entity_type(&self) -> &str {
        entity_types::TEAM
    }

    fn prepare(&self, entity: &mut Entity, _tx: &dyn ReadTransaction, _update: bool) -> Result<()> {
        let team_type = match entity.attributes.get(TEAM_TYPE) {
            Some(value) => value
                .as_str()
                .ok_or_else(|| Error::invalid("teamType must be a string"))?
                .parse()?,
            None => TeamType::default(),
        };
        if team_type == TeamType::Group && !entity.children.is_empty() {
            return Err(Error::invalid(format!(
                "Team of type {} can't have children",
                TeamType::Group
            )));
        }
        entity.set_attribute(TEAM_TYPE, &team_type)
    }

    fn set_fully_qualified_name(&self, entity: &mut Entity) -> Result<()> {
        entity.fully_qualified_name = fqn::build(&[entity.name.as_str()])?;
        Ok(())
    }

    fn children_relationship(&self) -> Option<RelationKind> {
        Some(RelationKind::ParentOf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacat_core::{EntityId, EntityReference};
    use metacat_storage::{MemoryStorage, StorageBackend};
    use serde_json::json;

    #[test]
    fn test_team_type_defaults_to_group() {
        let storage = MemoryStorage::new();
        let read = storage.begin_read().unwrap();
        let mut team = Entity::new("team", "analytics");
        TeamHandler.prepare(&mut team, read.as_ref(), false).unwrap();
        assert_eq!(team.attribute::<TeamType>(TEAM_TYPE).unwrap(), Some(TeamType::Group));
    }

    #[test]
    fn test_group_has_no_children() {
        let storage = MemoryStorage::new();
        let read = storage.begin_read().unwrap();
        let mut team = Entity::new("team", "analytics");
        team.children.push(EntityReference::new(EntityId::new(), "team"));
        assert!(TeamHandler.prepare(&mut team, read.as_ref(), false).is_err());

        team.attributes.insert(TEAM_TYPE.into(), json!("Department"));
        TeamHandler.prepare(&mut team, read.as_ref(), false).unwrap();

        team.attributes.insert(TEAM_TYPE.into(), json!("Squad"));
        assert!(TeamHandler.prepare(&mut team, read.as_ref(), false).is_err());
    }
}
