//! Tag operations: lightweight refs and annotated tag objects.

use bstr::BString;
use strata_hash::ObjectId;
use strata_object::{Ident, Object, ObjectType, Tag};
use strata_odb::TieredStore;

use crate::name::validate_name;
use crate::store::RefStore;
use crate::RefError;

/// Longest annotated-tag chain `resolve_to_commit` will follow.
const MAX_TAG_DEPTH: usize = 50;

/// Tag-level operations; annotated tags write through the tiered store.
pub struct Tags<'a> {
    refs: &'a RefStore,
    store: &'a TieredStore,
}

impl<'a> Tags<'a> {
    pub fn new(refs: &'a RefStore, store: &'a TieredStore) -> Self {
        Self { refs, store }
    }

    /// A lightweight tag: just a ref at the target.
    pub async fn create_lightweight(
        &self,
        name: &str,
        target: &ObjectId,
        force: bool,
    ) -> Result<(), RefError> {
        validate_name(name)?;
        let full = format!("refs/tags/{name}");
        if !force && self.refs.read(&full).await?.is_some() {
            return Err(RefError::AlreadyExists(full));
        }
        self.refs.set_ref(&full, target, None).await
    }

    /// An annotated tag: a tag object in the store, ref at the object.
    pub async fn create_annotated(
        &self,
        name: &str,
        target: &ObjectId,
        tagger: Ident,
        message: impl Into<BString>,
        signature: Option<BString>,
        force: bool,
    ) -> Result<ObjectId, RefError> {
        validate_name(name)?;
        let full = format!("refs/tags/{name}");
        if !force && self.refs.read(&full).await?.is_some() {
            return Err(RefError::AlreadyExists(full));
        }

        let target_type = self
            .store
            .get(target)
            .await?
            .map(|(ty, _)| ty)
            .ok_or(RefError::Store(strata_odb::StoreError::NotFound(*target)))?;

        let tag = Tag {
            target: *target,
            target_type,
            name: BString::from(name),
            tagger: Some(tagger),
            message: message.into(),
            signature,
        };
        let tag_id = self.store.put_object(&Object::Tag(tag)).await?;
        self.refs.set_ref(&full, &tag_id, None).await?;
        Ok(tag_id)
    }

    pub async fn delete(&self, name: &str) -> Result<bool, RefError> {
        self.refs.delete_ref(&format!("refs/tags/{name}"), None).await
    }

    pub async fn list(&self) -> Result<Vec<(String, ObjectId)>, RefError> {
        Ok(self
            .refs
            .list(Some("refs/tags/"))
            .await?
            .into_iter()
            .map(|(full, id)| {
                let short = full.strip_prefix("refs/tags/").unwrap_or(&full).to_string();
                (short, id)
            })
            .collect())
    }

    /// Peel a tag to the commit it ultimately names, following annotated
    /// tag chains (tags may tag tags) up to a fixed depth.
    pub async fn resolve_to_commit(&self, name: &str) -> Result<Option<ObjectId>, RefError> {
        let full = format!("refs/tags/{name}");
        let Some(mut current) = self.refs.resolve(&full).await? else {
            return Ok(None);
        };
        self.peel(&mut current).await?;
        Ok(Some(current))
    }

    /// Peel an id in place until it names a non-tag object.
    pub async fn peel(&self, id: &mut ObjectId) -> Result<ObjectType, RefError> {
        for _ in 0..MAX_TAG_DEPTH {
            match self.store.get_object(id).await? {
                Some(Object::Tag(tag)) => *id = tag.target,
                Some(other) => return Ok(other.object_type()),
                None => return Err(RefError::Store(strata_odb::StoreError::NotFound(*id))),
            }
        }
        Err(RefError::TagChainTooDeep(MAX_TAG_DEPTH))
    }
}
