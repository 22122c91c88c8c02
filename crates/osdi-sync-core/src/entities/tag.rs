//! Local tags ↔ OSDI tags.

use super::{stores, LocalStore, RemoteObjects};
use crate::error::{MapError, MatchError};
use crate::model::{clean, Entity, EntityKind, LocalTag, RemoteTag, SyncObject};
use crate::store::{Filter, ObjectStore};
use crate::sync::mapper::{MapAction, Mapper};
use crate::sync::matcher::{at_most_one, Matcher};
use crate::sync::registry::{EntitySync, SyncContext};
use crate::sync::single::SingleSyncer;

#[derive(Debug, Clone)]
pub struct Tag;

impl Entity for Tag {
    const KIND: EntityKind = EntityKind::Tag;
    type Local = LocalTag;
    type Remote = RemoteTag;
}

pub(crate) fn syncer(ctx: &SyncContext) -> Box<dyn EntitySync> {
    let (local, remote) = stores::<Tag>(ctx);
    Box::new(SingleSyncer::new(
        local.clone(),
        remote.clone(),
        ctx.states(),
        TagMatcher::new(local, remote),
        TagMapper,
        ctx.profile_id,
    ))
}

fn required_name(tag_name: &str) -> Result<String, MatchError> {
    clean(tag_name).ok_or_else(|| MatchError::MissingData("tag has no name".into()))
}

pub struct TagMatcher {
    local: LocalStore<Tag>,
    remote: RemoteObjects<Tag>,
}

impl TagMatcher {
    pub fn new(local: LocalStore<Tag>, remote: RemoteObjects<Tag>) -> Self {
        Self { local, remote }
    }
}

impl Matcher<Tag> for TagMatcher {
    /// The tag collection cannot be filtered by name, so every remote tag
    /// is listed and compared.
    fn find_match_for_local(&self, tag: &LocalTag) -> Result<Option<RemoteTag>, MatchError> {
        let name = required_name(tag.name.get())?;
        let named: Vec<RemoteTag> = self
            .remote
            .find(&[])?
            .into_iter()
            .filter(|remote| remote.name.get().trim() == name)
            .collect();
        at_most_one(named, "remote tags")
    }

    fn find_match_for_remote(&self, tag: &RemoteTag) -> Result<Option<LocalTag>, MatchError> {
        let name = required_name(tag.name.get())?;
        at_most_one(self.local.find(&[Filter::eq("name", name)])?, "local tags")
    }
}

/// Remote tags cannot be renamed once created.
pub struct TagMapper;

impl Mapper<Tag> for TagMapper {
    fn map_local_to_remote(&self, tag: &LocalTag, remote: &mut RemoteTag) -> Result<MapAction, MapError> {
        let name = clean(tag.name.get()).ok_or_else(|| MapError::Validation {
            field: "name".into(),
            message: "tag has no name".into(),
        })?;
        if remote.is_loaded() && remote.name.get().trim() != name {
            return Ok(MapAction::SkipAllChanges(format!(
                "remote tag '{}' cannot be renamed to '{name}'",
                remote.name.get()
            )));
        }
        if !remote.is_loaded() {
            remote.name.set(name);
        }
        Ok(MapAction::Mapped)
    }

    fn map_remote_to_local(&self, remote: &RemoteTag, tag: &mut LocalTag) -> Result<MapAction, MapError> {
        let name = clean(remote.name.get()).ok_or_else(|| MapError::Validation {
            field: "name".into(),
            message: "tag has no name".into(),
        })?;
        tag.name.set(name);
        Ok(MapAction::Mapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixture::Fixture;
    use crate::store::WriteContext;

    #[test]
    fn local_tag_matches_remote_by_exact_name() {
        let fx = Fixture::new();
        let (local, remote) = fx.stores::<Tag>();
        for name in ["volunteer", "Volunteer", "donor"] {
            remote
                .save(&mut RemoteTag::new(name), &WriteContext::sync_engine(1))
                .unwrap();
        }
        let matcher = TagMatcher::new(local, remote);
        let found = matcher
            .find_match_for_local(&LocalTag::new("Volunteer"))
            .unwrap()
            .unwrap();
        assert_eq!(found.name.get(), "Volunteer");
        assert!(matcher
            .find_match_for_local(&LocalTag::new("member"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn remote_tag_matches_local_by_name() {
        let fx = Fixture::new();
        let (local, remote) = fx.stores::<Tag>();
        let mut tag = LocalTag::new("donor");
        fx.crm().save(&mut tag, &WriteContext::user()).unwrap();
        let matcher = TagMatcher::new(local, remote);
        let found = matcher
            .find_match_for_remote(&RemoteTag::new("donor"))
            .unwrap()
            .unwrap();
        assert_eq!(found.id(), tag.id());
    }

    #[test]
    fn renaming_a_linked_remote_tag_is_skipped() {
        let mut remote = RemoteTag::new("donor");
        remote.set_id("t-1".into());
        remote.mark_saved();
        let action = TagMapper
            .map_local_to_remote(&LocalTag::new("donors"), &mut remote)
            .unwrap();
        assert!(matches!(action, MapAction::SkipAllChanges(_)));
        assert_eq!(remote.name.get(), "donor");

        let action = TagMapper
            .map_local_to_remote(&LocalTag::new("donor"), &mut remote)
            .unwrap();
        assert_eq!(action, MapAction::Mapped);
        assert!(!remote.is_altered());
    }

    #[test]
    fn new_remote_tag_takes_local_name() {
        let mut remote = RemoteTag::default();
        TagMapper
            .map_local_to_remote(&LocalTag::new(" member "), &mut remote)
            .unwrap();
        assert_eq!(remote.name.get(), "member");
        assert!(remote.is_altered());
    }
}
