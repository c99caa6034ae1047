use anyhow::Result;
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Database;

/// One classification pass over the unclassified pool.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub(crate) struct ClassificationRun {
    pub(crate) date: NaiveDateTime,
    pub(crate) num_updated: i64,
    pub(crate) avg_confidence: f64,
}

impl Database {
    pub(crate) fn insert_run(&self, run: &ClassificationRun) -> Result<()> {
        // Timestamp keys keep the partition ordered by run time.
        let key = run.date.format("%Y-%m-%dT%H:%M:%S%.f").to_string();
        self.run_partition
            .insert(key.as_bytes(), bincode::serialize(run)?)?;
        Ok(())
    }

    pub(crate) fn last_run(&self) -> Result<Option<ClassificationRun>> {
        match self.run_partition.last()? {
            Some((_, value)) => Ok(Some(bincode::deserialize(&value)?)),
            None => Ok(None),
        }
    }
}
