use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::Database;
use super::Iter;
use crate::api::comment::Comment;
use crate::query::{Filter, Label};

/// One survey response as stored in the comment partition, keyed by `id`.
#[derive(Debug, Default, Clone, Deserialize, Serialize, PartialEq)]
pub(crate) struct SurveyComment {
    pub(crate) id: String,
    pub(crate) age: i64,
    pub(crate) gender: String,
    pub(crate) health_center: String,
    pub(crate) frequency: String,
    pub(crate) satisfaction: i64,
    pub(crate) recommendation: i64,
    pub(crate) comment: String,
    pub(crate) date: NaiveDateTime,
    pub(crate) label: Label,
}

impl Database {
    pub(crate) fn insert_comments(&self, records: Vec<SurveyComment>) -> Result<()> {
        for item in records {
            let key = item.id.clone();
            Database::insert(&key, item, &self.comment_partition)?;
        }
        Ok(())
    }

    pub(crate) fn comments(&self, start: Option<&[u8]>, end: Option<&[u8]>) -> Iter<Comment> {
        let start = start.unwrap_or(b"\x00");
        if let Some(end) = end {
            Iter::new(self.comment_partition.range(start..end))
        } else {
            Iter::new(self.comment_partition.range(start..))
        }
    }

    /// Full scan keeping the records the filter accepts.
    pub(crate) fn find(&self, filter: &Filter) -> Vec<Comment> {
        self.comments(None, None)
            .filter_map(std::result::Result::ok)
            .filter(|comment| comment.matches(filter))
            .collect()
    }

    pub(crate) fn count(&self, filter: &Filter) -> usize {
        self.comments(None, None)
            .filter_map(std::result::Result::ok)
            .filter(|comment| comment.matches(filter))
            .count()
    }

    pub(crate) fn update_label(&self, id: &str, label: Label) -> Result<()> {
        let value = self
            .comment_partition
            .get(id)?
            .with_context(|| format!("no comment with id {id}"))?;
        let mut record: SurveyComment = bincode::deserialize(&value)?;
        record.label = label;
        Database::insert(id, record, &self.comment_partition)
    }

    /// Sends every record back to the unclassified pool; returns how many
    /// were touched.
    pub(crate) fn reset_labels(&self) -> Result<usize> {
        let entries = self
            .comment_partition
            .iter()
            .collect::<Result<Vec<_>, _>>()?;
        let mut updated = 0;
        for (key, value) in entries {
            let mut record: SurveyComment = bincode::deserialize(&value)?;
            record.label = Label::Unclassified;
            self.comment_partition
                .insert(key, bincode::serialize(&record)?)?;
            updated += 1;
        }
        Ok(updated)
    }
}
