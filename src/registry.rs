//! The entity registry: string identifiers to live handles.
//!
//! Every identifier referenced by an operation or assertion must resolve to
//! exactly one entity of a compatible kind; anything else is a malformed
//! test file and surfaces as an interpreter-integrity error.

use std::collections::HashMap;

use mongodb::{bson::Document, gridfs::GridFsBucket, Collection, Database};

use crate::{
    entity::{ClientEntity, Entity, EntityKind, SessionEntity, ThreadEntity},
    error::{Error, Result},
};

#[derive(Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entity` under `id`, failing if the identifier is taken.
    pub fn register(&mut self, id: &str, entity: impl Into<Entity>) -> Result<()> {
        if self.entities.contains_key(id) {
            return Err(Error::DuplicateEntity { id: id.to_string() });
        }
        self.entities.insert(id.to_string(), entity.into());
        Ok(())
    }

    pub fn resolve(&self, id: &str) -> Result<&Entity> {
        self.entities
            .get(id)
            .ok_or_else(|| Error::unknown_entity(id))
    }

    fn resolve_mut(&mut self, id: &str) -> Result<&mut Entity> {
        self.entities
            .get_mut(id)
            .ok_or_else(|| Error::unknown_entity(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entities.contains_key(id)
    }

    pub fn client(&self, id: &str) -> Result<&ClientEntity> {
        match self.resolve(id)? {
            Entity::Client(client) => Ok(client),
            other => Err(Error::wrong_entity_kind(id, other.kind(), EntityKind::Client)),
        }
    }

    pub fn database(&self, id: &str) -> Result<&Database> {
        match self.resolve(id)? {
            Entity::Database(database) => Ok(database),
            other => Err(Error::wrong_entity_kind(
                id,
                other.kind(),
                EntityKind::Database,
            )),
        }
    }

    pub fn collection(&self, id: &str) -> Result<&Collection<Document>> {
        match self.resolve(id)? {
            Entity::Collection(collection) => Ok(collection),
            other => Err(Error::wrong_entity_kind(
                id,
                other.kind(),
                EntityKind::Collection,
            )),
        }
    }

    pub fn session(&self, id: &str) -> Result<&SessionEntity> {
        match self.resolve(id)? {
            Entity::Session(session) => Ok(session),
            other => Err(Error::wrong_entity_kind(
                id,
                other.kind(),
                EntityKind::Session,
            )),
        }
    }

    pub fn session_mut(&mut self, id: &str) -> Result<&mut SessionEntity> {
        match self.resolve_mut(id)? {
            Entity::Session(session) => Ok(session),
            other => Err(Error::wrong_entity_kind(
                id,
                other.kind(),
                EntityKind::Session,
            )),
        }
    }

    /// Resolves an optional `session` argument: absent means "no explicit
    /// session", present must name a session entity.
    pub fn resolve_session_mut(&mut self, id: Option<&str>) -> Result<Option<&mut SessionEntity>> {
        match id {
            Some(id) => Ok(Some(self.session_mut(id)?)),
            None => Ok(None),
        }
    }

    pub fn bucket(&self, id: &str) -> Result<&GridFsBucket> {
        match self.resolve(id)? {
            Entity::Bucket(bucket) => Ok(bucket),
            other => Err(Error::wrong_entity_kind(id, other.kind(), EntityKind::Bucket)),
        }
    }

    pub fn thread(&self, id: &str) -> Result<&ThreadEntity> {
        match self.resolve(id)? {
            Entity::Thread(thread) => Ok(thread),
            other => Err(Error::wrong_entity_kind(id, other.kind(), EntityKind::Thread)),
        }
    }

    /// All registered session entities; used by teardown to end them.
    pub(crate) fn sessions_mut(&mut self) -> impl Iterator<Item = (&String, &mut SessionEntity)> {
        self.entities.iter_mut().filter_map(|(id, entity)| match entity {
            Entity::Session(session) => Some((id, session)),
            _ => None,
        })
    }

    /// Drops all thread entities. Closing their channels lets the executor
    /// tasks drain and exit.
    pub(crate) fn remove_threads(&mut self) {
        self.entities
            .retain(|_, entity| !matches!(entity, Entity::Thread(_)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;

    fn registry_with_thread(id: &str) -> EntityRegistry {
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let thread = ThreadEntity {
            sender,
            failures: Default::default(),
        };
        let mut registry = EntityRegistry::new();
        registry.register(id, Entity::Thread(thread)).unwrap();
        registry
    }

    #[test]
    fn unknown_identifier_is_a_distinct_error() {
        let registry = EntityRegistry::new();
        assert!(matches!(
            registry.resolve("coll0"),
            Err(Error::UnknownEntity { .. })
        ));
        assert!(matches!(
            registry.client("client0"),
            Err(Error::UnknownEntity { .. })
        ));
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = registry_with_thread("thread0");
        let (sender, _receiver) = tokio::sync::mpsc::unbounded_channel();
        let another = ThreadEntity {
            sender,
            failures: Default::default(),
        };
        assert!(matches!(
            registry.register("thread0", Entity::Thread(another)),
            Err(Error::DuplicateEntity { .. })
        ));
    }

    #[test]
    fn kind_mismatch_names_both_kinds() {
        let registry = registry_with_thread("thread0");
        match registry.session("thread0") {
            Err(Error::WrongEntityKind {
                id,
                actual,
                expected,
            }) => {
                assert_eq!(id, "thread0");
                assert_eq!(actual, EntityKind::Thread);
                assert_eq!(expected, EntityKind::Session);
            }
            other => panic!("expected WrongEntityKind, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn absent_session_argument_resolves_to_none() {
        let mut registry = registry_with_thread("thread0");
        assert!(registry.resolve_session_mut(None).unwrap().is_none());
        assert!(matches!(
            registry.resolve_session_mut(Some("nope")),
            Err(Error::UnknownEntity { .. })
        ));
    }
}
