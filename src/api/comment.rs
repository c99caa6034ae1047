use std::fmt;
use std::sync::Arc;

use async_graphql::{
    connection::{query, Connection, EmptyFields},
    Context, Object, Result, SimpleObject,
};
use chrono::Local;
use tracing::info;

use super::comment_stat::ClassificationRunStat;
use crate::{
    api::{self, ConfidenceThreshold, DateTimeLocal, Today},
    classifier::Classify,
    database::{comment::SurveyComment, run::ClassificationRun, Database, TryFromKeyValue},
    export,
    query::{normalize, Column, Field, Filter, Label},
};

#[derive(SimpleObject, Debug)]
pub(crate) struct Comment {
    pub(crate) id: String,
    pub(crate) age: i64,
    pub(crate) gender: String,
    pub(crate) health_center: String,
    pub(crate) frequency: String,
    pub(crate) satisfaction: i64,
    pub(crate) recommendation: i64,
    pub(crate) comment: String,
    pub(crate) date: DateTimeLocal,
    pub(crate) label: Label,
}

impl TryFromKeyValue for Comment {
    fn try_from_key_value(_key: &[u8], value: &[u8]) -> anyhow::Result<Self> {
        let record: SurveyComment = bincode::deserialize(value)?;
        Ok(Comment {
            id: record.id,
            age: record.age,
            gender: record.gender,
            health_center: record.health_center,
            frequency: record.frequency,
            satisfaction: record.satisfaction,
            recommendation: record.recommendation,
            comment: record.comment,
            date: DateTimeLocal(record.date),
            label: record.label,
        })
    }
}

impl fmt::Display for Comment {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

impl Comment {
    /// Whether this record satisfies the normalized filter.
    pub(crate) fn matches(&self, filter: &Filter) -> bool {
        match filter {
            Filter::Empty => true,
            Filter::IntEquals(field, expected) => self.int_field(*field) == Some(*expected),
            Filter::TextContains(field, needle) => self
                .text_field(*field)
                .to_lowercase()
                .contains(&needle.to_lowercase()),
            Filter::DateRange(start, end) => self.date.0 >= *start && self.date.0 < *end,
            Filter::DateEquals(instant) => self.date.0 == *instant,
            Filter::LabelEquals(label) => self.label == *label,
            Filter::Or(filters) => filters.iter().any(|f| self.matches(f)),
        }
    }

    /// Exact-equality view of a field; text-only fields have none, so an
    /// integer filter on them matches nothing.
    fn int_field(&self, field: Field) -> Option<i64> {
        match field {
            Field::Age => Some(self.age),
            Field::Satisfaction => Some(self.satisfaction),
            Field::Recommendation => Some(self.recommendation),
            Field::Label => Some(self.label.code()),
            Field::Id | Field::Gender | Field::HealthCenter | Field::Frequency | Field::Comment => {
                None
            }
        }
    }

    /// Substring-match view of a field; numeric fields are compared against
    /// their decimal rendering, the label against its display name.
    fn text_field(&self, field: Field) -> String {
        match field {
            Field::Id => self.id.clone(),
            Field::Age => self.age.to_string(),
            Field::Gender => self.gender.clone(),
            Field::HealthCenter => self.health_center.clone(),
            Field::Frequency => self.frequency.clone(),
            Field::Satisfaction => self.satisfaction.to_string(),
            Field::Recommendation => self.recommendation.to_string(),
            Field::Comment => self.comment.clone(),
            Field::Label => self.label.name().to_string(),
        }
    }
}

#[derive(Default)]
pub(super) struct CommentQuery;

#[Object]
impl CommentQuery {
    async fn comments(
        &self,
        ctx: &Context<'_>,
        after: Option<String>,
        before: Option<String>,
        first: Option<i32>,
        last: Option<i32>,
    ) -> Result<Connection<String, Comment, EmptyFields, EmptyFields>> {
        query(
            after,
            before,
            first,
            last,
            |after, before, first, last| async move {
                api::load_connection(ctx, Database::comments, after, before, first, last)
            },
        )
        .await
    }

    /// All records matching the search term interpreted for the selected
    /// column. A blank term matches everything; an uninterpretable date
    /// expression matches nothing.
    #[allow(clippy::unused_async)]
    async fn search_comments(
        &self,
        ctx: &Context<'_>,
        column: Column,
        query: String,
    ) -> Result<Vec<Comment>> {
        let db = ctx.data::<Database>()?;
        let today = ctx.data::<Today>()?.0;
        if query.trim().is_empty() {
            return Ok(db.find(&Filter::Empty));
        }
        let Some(filter) = normalize(&query, column, today()) else {
            return Ok(Vec::new());
        };
        Ok(db.find(&filter))
    }

    /// Same record set as `searchComments`, rendered as a CSV document.
    async fn export_comments(
        &self,
        ctx: &Context<'_>,
        column: Column,
        query: String,
    ) -> Result<String> {
        let results = self.search_comments(ctx, column, query).await?;
        export::to_csv(&results).map_err(|e| format!("failed to render csv: {e}").into())
    }
}

#[derive(Default)]
pub(super) struct CommentMutation;

#[Object]
impl CommentMutation {
    /// Classify every unclassified comment and record the run.
    async fn classify_pending(&self, ctx: &Context<'_>) -> Result<ClassificationRunStat> {
        let db = ctx.data::<Database>()?.clone();
        let classifier = Arc::clone(ctx.data::<Arc<dyn Classify>>()?);
        let threshold = ctx.data::<ConfidenceThreshold>()?.0;
        let run =
            tokio::task::spawn_blocking(move || run_classification(&db, &*classifier, threshold))
                .await
                .map_err(|e| format!("classification task aborted: {e}"))?
                .map_err(|e| format!("classification failed: {e}"))?;
        Ok(run.into())
    }

    /// Send every record back to the unclassified pool.
    #[allow(clippy::unused_async)]
    async fn reset_labels(&self, ctx: &Context<'_>) -> Result<i64> {
        let db = ctx.data::<Database>()?;
        let updated: i64 = db
            .reset_labels()
            .map_err(|e| format!("failed to reset labels: {e}"))?
            .try_into()?;
        Ok(updated)
    }
}

fn run_classification(
    db: &Database,
    classifier: &dyn Classify,
    threshold: f64,
) -> anyhow::Result<ClassificationRun> {
    let pending = db.find(&Filter::LabelEquals(Label::Unclassified));
    let mut num_updated = 0_i64;
    let mut total_confidence = 0.0_f64;
    for comment in pending {
        let (label, confidence) = classifier.classify(&comment.comment)?;
        let label = if confidence < threshold {
            Label::ClassificationError
        } else {
            label
        };
        db.update_label(&comment.id, label)?;
        total_confidence += confidence;
        num_updated += 1;
    }
    #[allow(clippy::cast_precision_loss)]
    let avg_confidence = if num_updated == 0 {
        0.0
    } else {
        total_confidence / num_updated as f64
    };
    let run = ClassificationRun {
        date: Local::now().naive_local(),
        num_updated,
        avg_confidence,
    };
    db.insert_run(&run)?;
    info!("classified {num_updated} comments");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use crate::{
        api::TestSchema,
        database::comment::SurveyComment,
        query::Label,
    };

    fn create_comments(n: usize) -> Vec<SurveyComment> {
        (1..=n)
            .map(|i| SurveyComment {
                id: format!("c{i:02}"),
                ..Default::default()
            })
            .collect()
    }

    fn on_day(year: i32, month: u32, day: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(year, month, day)
            .unwrap()
            .and_hms_opt(10, 30, 0)
            .unwrap()
    }

    #[tokio::test]
    async fn comments_empty() {
        let schema = TestSchema::new();
        let query = r"
        {
            comments {
                edges {
                    node {
                        id
                    }
                }
            }
        }";
        let res = schema.execute(query).await;
        assert_eq!(res.data.to_string(), "{comments: {edges: []}}");
    }

    #[tokio::test]
    async fn comments_first() {
        let schema = TestSchema::new();
        schema.db.insert_comments(create_comments(3)).unwrap();

        let query = r"
        {
            comments(first: 2) {
                edges {
                    node {
                        id
                    }
                }
                pageInfo {
                    hasNextPage
                }
            }
        }";
        let res = schema.execute(query).await;
        assert_eq!(
            res.data.to_string(),
            r#"{comments: {edges: [{node: {id: "c01"}}, {node: {id: "c02"}}], pageInfo: {hasNextPage: true}}}"#
        );

        let query = r"
        {
            comments(first: 5) {
                pageInfo {
                    hasNextPage
                }
            }
        }";
        let res = schema.execute(query).await;
        assert_eq!(
            res.data.to_string(),
            "{comments: {pageInfo: {hasNextPage: false}}}"
        );
    }

    #[tokio::test]
    async fn comments_last() {
        let schema = TestSchema::new();
        schema.db.insert_comments(create_comments(3)).unwrap();

        let query = r"
        {
            comments(last: 2) {
                edges {
                    node {
                        id
                    }
                }
                pageInfo {
                    hasPreviousPage
                }
            }
        }";
        let res = schema.execute(query).await;
        assert_eq!(
            res.data.to_string(),
            r#"{comments: {edges: [{node: {id: "c02"}}, {node: {id: "c03"}}], pageInfo: {hasPreviousPage: true}}}"#
        );
    }

    #[tokio::test]
    async fn search_by_comment_text() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].comment = "La atención fue excelente".to_string();
        comments[1].comment = "Muy mala experiencia".to_string();
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: COMMENT, query: "excelente") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"], serde_json::json!([{"id": "c01"}]));
    }

    #[tokio::test]
    async fn search_is_case_insensitive() {
        let schema = TestSchema::new();
        let mut comments = create_comments(1);
        comments[0].health_center = "CESFAM Placeres".to_string();
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: HEALTH_CENTER, query: "placeres") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"], serde_json::json!([{"id": "c01"}]));
    }

    #[tokio::test]
    async fn search_numeric_column() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].age = 45;
        comments[1].age = 62;
        comments[2].age = 45;
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: AGE, query: "45") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(
            data["searchComments"],
            serde_json::json!([{"id": "c01"}, {"id": "c03"}])
        );
    }

    #[tokio::test]
    async fn search_numeric_column_falls_back_to_text() {
        let schema = TestSchema::new();
        let mut comments = create_comments(2);
        comments[0].age = 45;
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: AGE, query: "abc") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn search_label_by_partial_name() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].label = Label::Positive;
        comments[1].label = Label::Negative;
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: LABEL, query: "pos") {
                id
                label
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(
            data["searchComments"],
            serde_json::json!([{"id": "c01", "label": "POSITIVE"}])
        );
    }

    #[tokio::test]
    async fn search_by_year() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].date = on_day(2023, 3, 15);
        comments[1].date = on_day(2022, 12, 31);
        comments[2].date = on_day(2023, 1, 1);
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: DATE, query: "2023") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(
            data["searchComments"],
            serde_json::json!([{"id": "c01"}, {"id": "c03"}])
        );
    }

    #[tokio::test]
    async fn search_by_numeric_date() {
        let schema = TestSchema::new();
        let mut comments = create_comments(2);
        comments[0].date = on_day(2023, 3, 15);
        comments[1].date = on_day(2023, 3, 16);
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: DATE, query: "15-03-23") {
                id
                date
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(
            data["searchComments"],
            serde_json::json!([{"id": "c01", "date": "2023-03-15T10:30:00"}])
        );
    }

    #[tokio::test]
    async fn unparseable_date_matches_nothing() {
        let schema = TestSchema::new();
        schema.db.insert_comments(create_comments(3)).unwrap();

        let query = r#"
        {
            searchComments(column: DATE, query: "xyz123notadate") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn blank_query_matches_everything() {
        let schema = TestSchema::new();
        schema.db.insert_comments(create_comments(3)).unwrap();

        let query = r#"
        {
            searchComments(column: DATE, query: "   ") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn search_all_columns() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].age = 5;
        comments[1].comment = "Esperé 5 horas".to_string();
        comments[2].gender = "Femenino".to_string();
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            searchComments(column: ALL, query: "5") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(
            data["searchComments"],
            serde_json::json!([{"id": "c01"}, {"id": "c02"}])
        );
    }

    #[tokio::test]
    async fn classify_pending_updates_labels() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].comment = "La atención fue excelente".to_string();
        comments[1].comment = "Muy mala experiencia".to_string();
        comments[2].comment = "No hay estacionamiento".to_string();
        schema.db.insert_comments(comments).unwrap();

        let mutation = r"
        mutation {
            classifyPending {
                numUpdated
            }
        }";
        let data = schema.execute(mutation).await.data.into_json().unwrap();
        assert_eq!(data["classifyPending"]["numUpdated"], 3);

        let query = r#"
        {
            searchComments(column: LABEL, query: "positive") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"], serde_json::json!([{"id": "c01"}]));
    }

    #[tokio::test]
    async fn classify_pending_skips_already_labeled() {
        let schema = TestSchema::new();
        let mut comments = create_comments(2);
        comments[0].comment = "La atención fue excelente".to_string();
        comments[1].comment = "Muy mala experiencia".to_string();
        comments[1].label = Label::Negative;
        schema.db.insert_comments(comments).unwrap();

        let mutation = r"
        mutation {
            classifyPending {
                numUpdated
                avgConfidence
            }
        }";
        let data = schema.execute(mutation).await.data.into_json().unwrap();
        assert_eq!(data["classifyPending"]["numUpdated"], 1);
        assert_eq!(data["classifyPending"]["avgConfidence"], 0.95);
    }

    #[tokio::test]
    async fn low_confidence_becomes_classification_error() {
        let schema = TestSchema::new();
        let mut comments = create_comments(1);
        comments[0].comment = "Sin palabras".to_string();
        schema.db.insert_comments(comments).unwrap();

        let mutation = r"
        mutation {
            classifyPending {
                numUpdated
            }
        }";
        schema.execute(mutation).await;

        let query = r#"
        {
            searchComments(column: LABEL, query: "classification-error") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"], serde_json::json!([{"id": "c01"}]));
    }

    #[tokio::test]
    async fn reset_labels_touches_every_record() {
        let schema = TestSchema::new();
        let mut comments = create_comments(3);
        comments[0].label = Label::Positive;
        comments[1].label = Label::Negative;
        schema.db.insert_comments(comments).unwrap();

        let mutation = r"
        mutation {
            resetLabels
        }";
        let data = schema.execute(mutation).await.data.into_json().unwrap();
        assert_eq!(data["resetLabels"], 3);

        let query = r#"
        {
            searchComments(column: LABEL, query: "unclassified") {
                id
            }
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        assert_eq!(data["searchComments"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn export_comments_renders_csv() {
        let schema = TestSchema::new();
        let mut comments = create_comments(2);
        comments[0].comment = "Todo bien".to_string();
        schema.db.insert_comments(comments).unwrap();

        let query = r#"
        {
            exportComments(column: COMMENT, query: "bien")
        }"#;
        let data = schema.execute(query).await.data.into_json().unwrap();
        let csv = data["exportComments"].as_str().unwrap();
        assert!(csv.starts_with(
            "ID,Age,Gender,Health Center,Frequency,Satisfaction,Recommendation,Comment,Date,Label"
        ));
        assert_eq!(csv.lines().count(), 2);
        assert!(csv.lines().nth(1).unwrap().starts_with("c01"));
    }
}
