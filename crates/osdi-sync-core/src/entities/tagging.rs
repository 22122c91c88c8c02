//! Tag assignments ↔ OSDI taggings.
//!
//! A tagging references a person and a tag, so both must already be linked
//! before the assignment can be matched or written. Remote taggings cannot be
//! edited; a changed assignment is a delete plus a new one.

use super::{stores, IdTranslator, LocalStore, RemoteObjects};
use crate::error::{MapError, MatchError};
use crate::model::{Entity, EntityKind, EntityTag, RemoteTagging, SyncObject};
use crate::store::{Filter, ObjectStore};
use crate::sync::mapper::{MapAction, Mapper};
use crate::sync::matcher::{at_most_one, Matcher};
use crate::sync::registry::{EntitySync, SyncContext};
use crate::sync::single::SingleSyncer;

#[derive(Debug, Clone)]
pub struct Tagging;

impl Entity for Tagging {
    const KIND: EntityKind = EntityKind::Tagging;
    type Local = EntityTag;
    type Remote = RemoteTagging;
}

pub(crate) fn syncer(ctx: &SyncContext) -> Box<dyn EntitySync> {
    let (local, remote) = stores::<Tagging>(ctx);
    let ids = IdTranslator::new(ctx);
    Box::new(
        SingleSyncer::new(
            local.clone(),
            remote.clone(),
            ctx.states(),
            TaggingMatcher::new(local, remote, ids.clone()),
            TaggingMapper::new(ids),
            ctx.profile_id,
        )
        .propagating_deletions(),
    )
}

pub struct TaggingMatcher {
    local: LocalStore<Tagging>,
    remote: RemoteObjects<Tagging>,
    ids: IdTranslator,
}

impl TaggingMatcher {
    pub(crate) fn new(local: LocalStore<Tagging>, remote: RemoteObjects<Tagging>, ids: IdTranslator) -> Self {
        Self { local, remote, ids }
    }
}

impl Matcher<Tagging> for TaggingMatcher {
    fn find_match_for_local(&self, entity_tag: &EntityTag) -> Result<Option<RemoteTagging>, MatchError> {
        let person_id = self.ids.require_remote(EntityKind::Person, entity_tag.contact_id.get())?;
        let tag_id = self.ids.require_remote(EntityKind::Tag, entity_tag.tag_id.get())?;
        let found = self.remote.find(&[
            Filter::eq("person_id", person_id),
            Filter::eq("tag_id", tag_id),
        ])?;
        at_most_one(found, "remote taggings")
    }

    fn find_match_for_remote(&self, tagging: &RemoteTagging) -> Result<Option<EntityTag>, MatchError> {
        let contact_id = self.ids.require_local(EntityKind::Person, tagging.person_id.get())?;
        let tag_id = self.ids.require_local(EntityKind::Tag, tagging.tag_id.get())?;
        let found = self.local.find(&[
            Filter::eq("contact_id", contact_id),
            Filter::eq("tag_id", tag_id),
        ])?;
        at_most_one(found, "local tag assignments")
    }
}

pub struct TaggingMapper {
    ids: IdTranslator,
}

impl TaggingMapper {
    pub(crate) fn new(ids: IdTranslator) -> Self {
        Self { ids }
    }
}

impl Mapper<Tagging> for TaggingMapper {
    fn map_local_to_remote(&self, entity_tag: &EntityTag, tagging: &mut RemoteTagging) -> Result<MapAction, MapError> {
        let person_id = self
            .ids
            .map_remote(EntityKind::Person, entity_tag.contact_id.get(), "person_id")?;
        let tag_id = self
            .ids
            .map_remote(EntityKind::Tag, entity_tag.tag_id.get(), "tag_id")?;

        if tagging.is_loaded() && (*tagging.person_id.get() != person_id || *tagging.tag_id.get() != tag_id) {
            return Ok(MapAction::SkipAllChanges("remote taggings are immutable".into()));
        }
        tagging.person_id.set(person_id);
        tagging.tag_id.set(tag_id);
        Ok(MapAction::Mapped)
    }

    fn map_remote_to_local(&self, tagging: &RemoteTagging, entity_tag: &mut EntityTag) -> Result<MapAction, MapError> {
        let contact_id = self
            .ids
            .map_local(EntityKind::Person, tagging.person_id.get(), "contact_id")?;
        let tag_id = self
            .ids
            .map_local(EntityKind::Tag, tagging.tag_id.get(), "tag_id")?;
        entity_tag.contact_id.set(contact_id);
        entity_tag.tag_id.set(tag_id);
        Ok(MapAction::Mapped)
    }
}
