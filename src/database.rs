pub(crate) mod comment;
pub(crate) mod run;

use std::marker::PhantomData;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;
use sled::{Db, Tree};

/// Reconstructs a value from a raw partition entry.
pub(crate) trait TryFromKeyValue: Sized {
    fn try_from_key_value(key: &[u8], value: &[u8]) -> Result<Self>;
}

/// Key-ordered iterator over one partition, decoding entries on the fly.
pub(crate) struct Iter<T> {
    inner: sled::Iter,
    _marker: PhantomData<T>,
}

impl<T> Iter<T> {
    fn new(inner: sled::Iter) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }
}

impl<T: TryFromKeyValue> Iterator for Iter<T> {
    type Item = Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|item| {
            let (key, value) = item.context("failed to read database entry")?;
            T::try_from_key_value(&key, &value)
        })
    }
}

impl<T: TryFromKeyValue> DoubleEndedIterator for Iter<T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        self.inner.next_back().map(|item| {
            let (key, value) = item.context("failed to read database entry")?;
            T::try_from_key_value(&key, &value)
        })
    }
}

#[derive(Clone)]
pub(crate) struct Database {
    #[allow(unused)]
    db: Db,
    comment_partition: Tree,
    run_partition: Tree,
}

impl Database {
    pub(crate) fn connect(path: &Path) -> Result<Database> {
        let db = sled::open(path)
            .with_context(|| format!("cannot open database at {}", path.display()))?;
        let comment_partition = db.open_tree("comments")?;
        let run_partition = db.open_tree("classification_runs")?;
        Ok(Database {
            db,
            comment_partition,
            run_partition,
        })
    }

    fn insert<T: Serialize>(key: &str, item: T, partition: &Tree) -> Result<()> {
        partition.insert(key, bincode::serialize(&item)?)?;
        Ok(())
    }
}
