use anyhow::{Context, Result};

use crate::api::comment::Comment;

/// Column headers matching the operator's result table.
const HEADER: [&str; 10] = [
    "ID",
    "Age",
    "Gender",
    "Health Center",
    "Frequency",
    "Satisfaction",
    "Recommendation",
    "Comment",
    "Date",
    "Label",
];

/// Renders search results as a CSV document, one row per record.
pub(crate) fn to_csv(comments: &[Comment]) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER)?;
    for comment in comments {
        writer.write_record([
            comment.id.as_str(),
            &comment.age.to_string(),
            comment.gender.as_str(),
            comment.health_center.as_str(),
            comment.frequency.as_str(),
            &comment.satisfaction.to_string(),
            &comment.recommendation.to_string(),
            comment.comment.as_str(),
            &comment.date.0.format("%Y-%m-%d %H:%M:%S").to_string(),
            comment.label.name(),
        ])?;
    }
    let bytes = writer.into_inner().context("failed to flush csv buffer")?;
    String::from_utf8(bytes).context("csv output is not valid utf-8")
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::to_csv;
    use crate::{
        api::{comment::Comment, DateTimeLocal},
        query::Label,
    };

    fn sample() -> Comment {
        Comment {
            id: "c01".to_string(),
            age: 45,
            gender: "Femenino".to_string(),
            health_center: "CESFAM Placeres".to_string(),
            frequency: "Mensual".to_string(),
            satisfaction: 4,
            recommendation: 5,
            comment: "Todo bien, sin reclamos".to_string(),
            date: DateTimeLocal(
                NaiveDate::from_ymd_opt(2023, 3, 15)
                    .unwrap()
                    .and_hms_opt(10, 30, 0)
                    .unwrap(),
            ),
            label: Label::Positive,
        }
    }

    #[test]
    fn header_comes_first() {
        let csv = to_csv(&[]).unwrap();
        assert_eq!(
            csv.trim_end(),
            "ID,Age,Gender,Health Center,Frequency,Satisfaction,Recommendation,Comment,Date,Label"
        );
    }

    #[test]
    fn rows_follow_table_order() {
        let csv = to_csv(&[sample()]).unwrap();
        let row = csv.lines().nth(1).unwrap();
        assert_eq!(
            row,
            "c01,45,Femenino,CESFAM Placeres,Mensual,4,5,\"Todo bien, sin reclamos\",2023-03-15 10:30:00,positive"
        );
    }
}
