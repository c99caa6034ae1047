use async_graphql::{Context, Object, Result, SimpleObject};

use crate::{
    api::DateTimeLocal,
    database::{run::ClassificationRun, Database},
    query::{Filter, Label},
};

/// Summary of one classification pass, also returned by the
/// `classifyPending` mutation.
#[derive(SimpleObject, Debug)]
pub(crate) struct ClassificationRunStat {
    pub(crate) date: DateTimeLocal,
    pub(crate) num_updated: i64,
    pub(crate) avg_confidence: f64,
}

impl From<ClassificationRun> for ClassificationRunStat {
    fn from(run: ClassificationRun) -> Self {
        Self {
            date: DateTimeLocal(run.date),
            num_updated: run.num_updated,
            avg_confidence: run.avg_confidence,
        }
    }
}

#[derive(SimpleObject)]
struct CommentStat {
    /// The number of stored survey comments.
    total_count: i64,

    /// The number of comments still waiting for classification.
    unclassified_count: i64,

    /// The most recent classification pass, if one has run.
    last_run: Option<ClassificationRunStat>,
}

#[derive(Default)]
pub(super) struct CommentStatQuery;

#[Object]
impl CommentStatQuery {
    #[allow(clippy::unused_async)]
    async fn comment_stat(&self, ctx: &Context<'_>) -> Result<CommentStat> {
        let db = ctx.data::<Database>()?;
        let total_count = db.count(&Filter::Empty).try_into()?;
        let unclassified_count = db
            .count(&Filter::LabelEquals(Label::Unclassified))
            .try_into()?;
        let last_run = db
            .last_run()
            .map_err(|e| format!("failed to read database: {e}"))?
            .map(Into::into);
        Ok(CommentStat {
            total_count,
            unclassified_count,
            last_run,
        })
    }
}
