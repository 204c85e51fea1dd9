use ::sled::Tree;
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::{error::ErrorKind, Result};

use super::{child_key, decode, encode, Collectable, Identifiable};

#[derive(Clone, Debug)]
pub struct SledDb {
    inner: ::sled::Db,
}

impl SledDb {
    pub fn new(config: &crate::config::Db) -> Result<Self> {
        if config.temporary {
            return Self::temporary();
        }
        let inner = ::sled::Config::default().path(&config.path).open()?;
        Ok(Self { inner })
    }

    /// Opens a throwaway database, removed from disk once dropped.
    pub fn temporary() -> Result<Self> {
        let inner = ::sled::Config::new().temporary(true).open()?;
        Ok(Self { inner })
    }

    /// Opens the tree holding entries of the given type.
    pub fn tree<T: Collectable>(&self) -> Result<Tree> {
        self.tree_at(T::get_collection_name())
    }

    pub fn tree_at(&self, name: &str) -> Result<Tree> {
        Ok(self.inner.open_tree(name)?)
    }

    pub fn get_collection<T: DeserializeOwned + Collectable>(&self) -> Result<Vec<T>> {
        let tree = self.tree::<T>()?;
        let mut out = Vec::with_capacity(tree.len());
        for entry in tree.iter() {
            let (_, value_bytes) = entry?;
            out.push(decode(&value_bytes)?);
        }
        Ok(out)
    }

    /// Returns the length of the collection as defined for the specified type.
    pub fn len<T: Collectable>(&self) -> Result<usize> {
        Ok(self.tree::<T>()?.len())
    }

    /// Gets an item from the collection defined for the item type.
    pub fn get<T: DeserializeOwned + Collectable>(&self, id: Uuid) -> Result<T> {
        self.find(id)?.ok_or_else(|| {
            ErrorKind::NotFound(format!(
                "entity with id '{}' not found in collection {}",
                id,
                T::get_collection_name()
            ))
            .into()
        })
    }

    pub fn find<T: DeserializeOwned + Collectable>(&self, id: Uuid) -> Result<Option<T>> {
        match self.tree::<T>()?.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn set<T: Serialize + Identifiable + Collectable>(&self, value: &T) -> Result<()> {
        let tree = self.tree::<T>()?;
        tree.insert(value.get_id().as_bytes(), encode(value)?)?;
        Ok(())
    }

    /// Removes the item with the given id, returning whether it existed.
    pub fn remove<T: Collectable>(&self, id: Uuid) -> Result<bool> {
        Ok(self.tree::<T>()?.remove(id.as_bytes())?.is_some())
    }

    /// Gets all children of `parent`, ordered by position.
    pub fn get_children<T: DeserializeOwned + Collectable>(&self, parent: Uuid) -> Result<Vec<T>> {
        let tree = self.tree::<T>()?;
        let mut out = Vec::new();
        for entry in tree.scan_prefix(parent.as_bytes()) {
            let (_, value_bytes) = entry?;
            out.push(decode(&value_bytes)?);
        }
        Ok(out)
    }

    /// Writes a whole list of children of `parent` in a single batch.
    pub fn set_children<T: Serialize + Collectable>(&self, parent: Uuid, children: &[T]) -> Result<()> {
        let tree = self.tree::<T>()?;
        let mut batch = ::sled::Batch::default();
        for (index, child) in children.iter().enumerate() {
            batch.insert(&child_key(parent, index as u32)[..], encode(child)?);
        }
        tree.apply_batch(batch)?;
        Ok(())
    }

    pub async fn flush(&self) -> Result<()> {
        self.inner.flush_async().await?;
        Ok(())
    }
}
