//! Turns an operator's free-text search term and column selection into a
//! filter the storage layer understands.

use async_graphql::Enum;
use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Serialize};

const MONTH_NAMES_ENGLISH: [&str; 12] = [
    "january",
    "february",
    "march",
    "april",
    "may",
    "june",
    "july",
    "august",
    "september",
    "october",
    "november",
    "december",
];
const MONTH_NAMES_SPANISH: [&str; 12] = [
    "enero",
    "febrero",
    "marzo",
    "abril",
    "mayo",
    "junio",
    "julio",
    "agosto",
    "septiembre",
    "octubre",
    "noviembre",
    "diciembre",
];

/// Sentiment code stored with every survey comment.
#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug, Deserialize, Serialize)]
pub(crate) enum Label {
    Irrelevant,
    Negative,
    Positive,
    Unclassified,
    ClassificationError,
}

impl Label {
    /// Display names in reverse-lookup precedence order; a search term that
    /// is a substring of one of these resolves to the paired label.
    pub(crate) const NAMES: [(&'static str, Label); 5] = [
        ("irrelevant", Label::Irrelevant),
        ("negative", Label::Negative),
        ("positive", Label::Positive),
        ("unclassified", Label::Unclassified),
        ("classification-error", Label::ClassificationError),
    ];

    pub(crate) fn code(self) -> i64 {
        match self {
            Label::Irrelevant => 0,
            Label::Negative => 1,
            Label::Positive => 2,
            Label::Unclassified => 3,
            Label::ClassificationError => 4,
        }
    }

    pub(crate) fn from_code(code: i64) -> Option<Label> {
        match code {
            0 => Some(Label::Irrelevant),
            1 => Some(Label::Negative),
            2 => Some(Label::Positive),
            3 => Some(Label::Unclassified),
            4 => Some(Label::ClassificationError),
            _ => None,
        }
    }

    pub(crate) fn name(self) -> &'static str {
        match self {
            Label::Irrelevant => "irrelevant",
            Label::Negative => "negative",
            Label::Positive => "positive",
            Label::Unclassified => "unclassified",
            Label::ClassificationError => "classification-error",
        }
    }
}

impl Default for Label {
    fn default() -> Self {
        Label::Unclassified
    }
}

/// Logical column an operator can search, matching the result table.
#[derive(Enum, Copy, Clone, Eq, PartialEq, Debug)]
pub(crate) enum Column {
    Id,
    Age,
    Gender,
    HealthCenter,
    Frequency,
    Satisfaction,
    Recommendation,
    Comment,
    Date,
    Label,
    All,
}

/// Storage-level field a sub-filter applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Field {
    Id,
    Age,
    Gender,
    HealthCenter,
    Frequency,
    Satisfaction,
    Recommendation,
    Comment,
    Label,
}

/// Fields searched as text when the "All" pseudo-column is selected.
const TEXT_FIELDS: [Field; 4] = [
    Field::Gender,
    Field::HealthCenter,
    Field::Frequency,
    Field::Comment,
];
/// Fields additionally matched by exact value when the term is an integer.
const NUMERIC_FIELDS: [Field; 4] = [
    Field::Age,
    Field::Satisfaction,
    Field::Recommendation,
    Field::Label,
];

/// Normalized filter handed to the storage layer. `Or(vec![])` matches
/// nothing; `Empty` matches everything.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Filter {
    Empty,
    IntEquals(Field, i64),
    TextContains(Field, String),
    DateRange(NaiveDateTime, NaiveDateTime),
    DateEquals(NaiveDateTime),
    LabelEquals(Label),
    Or(Vec<Filter>),
}

/// Normalizes a raw search term for the given column.
///
/// Returns `None` only when a date expression cannot be interpreted; callers
/// must surface that as zero results, not as an error. `today` supplies the
/// year implied by date expressions that omit one.
pub(crate) fn normalize(query: &str, column: Column, today: NaiveDate) -> Option<Filter> {
    let query = query.trim();
    match column {
        Column::Age => Some(int_or_text(query, Field::Age)),
        Column::Satisfaction => Some(int_or_text(query, Field::Satisfaction)),
        Column::Recommendation => Some(int_or_text(query, Field::Recommendation)),
        Column::Label => Some(label_filter(query)),
        Column::Id => Some(if query.is_empty() {
            Filter::Empty
        } else {
            Filter::TextContains(Field::Id, query.to_string())
        }),
        Column::Date => date_filter(&query.to_lowercase(), today),
        Column::All => Some(any_column_filter(query)),
        Column::Gender => Some(int_or_text(query, Field::Gender)),
        Column::HealthCenter => Some(int_or_text(query, Field::HealthCenter)),
        Column::Frequency => Some(int_or_text(query, Field::Frequency)),
        Column::Comment => Some(int_or_text(query, Field::Comment)),
    }
}

/// Integer terms match the field exactly; anything else degrades to a
/// substring match instead of failing.
fn int_or_text(query: &str, field: Field) -> Filter {
    match query.parse::<i64>() {
        Ok(n) => Filter::IntEquals(field, n),
        Err(_) => Filter::TextContains(field, query.to_string()),
    }
}

fn label_filter(query: &str) -> Filter {
    let lowered = query.to_lowercase();
    // First label whose name contains the term wins; no ranking.
    for (name, label) in Label::NAMES {
        if name.contains(&lowered) {
            return Filter::LabelEquals(label);
        }
    }
    Filter::TextContains(Field::Label, query.to_string())
}

fn any_column_filter(query: &str) -> Filter {
    let mut filters: Vec<Filter> = TEXT_FIELDS
        .iter()
        .map(|field| Filter::TextContains(*field, query.to_string()))
        .collect();
    if let Ok(n) = query.parse::<i64>() {
        filters.extend(
            NUMERIC_FIELDS
                .iter()
                .map(|field| Filter::IntEquals(*field, n)),
        );
    }
    Filter::Or(filters)
}

/// Interprets a human-entered date expression. The strategies below are
/// tried in order and the first match wins; an expression that matches a
/// strategy but names an impossible calendar date fails outright.
fn date_filter(query: &str, today: NaiveDate) -> Option<Filter> {
    if query.is_empty() {
        return Some(Filter::Empty);
    }

    // Numeric day-month-year, "15-03-2023" or "15/03/23".
    let numeric = Regex::new(r"(\d{1,2})[-/](\d{1,2})[-/](\d{2,4})").ok()?;
    if let Some(caps) = numeric.captures(query) {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let mut year: i32 = caps[3].parse().ok()?;
        // Two-digit years always land in the 21st century; no sliding window.
        if year < 100 {
            year += 2000;
        }
        return day_range(year, month, day);
    }

    // A bare year, optionally "del 2023".
    let bare_year = Regex::new(r"^(?:del\s+)?(\d{4})$").ok()?;
    if let Some(caps) = bare_year.captures(query) {
        let year: i32 = caps[1].parse().ok()?;
        let start = NaiveDate::from_ymd_opt(year, 1, 1)?.and_hms_opt(0, 0, 0)?;
        let end = NaiveDate::from_ymd_opt(year + 1, 1, 1)?.and_hms_opt(0, 0, 0)?;
        return Some(Filter::DateRange(start, end));
    }

    // "marzo 2023" / "march 2023".
    let month_year = Regex::new(r"^(\w+)\s+(\d{4})$").ok()?;
    if let Some(caps) = month_year.captures(query) {
        let month0 = month_index(&caps[1])?;
        let year: i32 = caps[2].parse().ok()?;
        return month_range(year, month0);
    }

    // "27 de octubre 2023", "27 october", year defaults to the current one.
    let day_month = Regex::new(r"(\d{1,2})\s+(?:de\s+)?(\w+)(?:\s+(\d{4}))?").ok()?;
    if let Some(caps) = day_month.captures(query) {
        let day = caps[1].parse().ok()?;
        let month0 = month_index(&caps[2])?;
        let year: i32 = match caps.get(3) {
            Some(m) => m.as_str().parse().ok()?,
            None => today.year(),
        };
        return day_range(year, u32::try_from(month0).ok()? + 1, day);
    }

    if let Some(filter) = exact_textual_date(query, today) {
        return Some(filter);
    }

    // A bare month name spans that month of the current year.
    if let Some(month0) = month_index(query) {
        return month_range(today.year(), month0);
    }

    None
}

/// Whole-string textual date, `<day> [de] <month> [<year>]`, resolved
/// against both month-name lists in list order. Unlike the range
/// strategies this one pins an exact instant.
fn exact_textual_date(query: &str, today: NaiveDate) -> Option<Filter> {
    let tokens: Vec<&str> = query.split_whitespace().collect();
    let (day, name, year) = match tokens.as_slice() {
        [day, name] => (day, name, None),
        [day, particle, name] if *particle == "de" => (day, name, None),
        [day, name, year] => (day, name, Some(year)),
        [day, particle, name, year] if *particle == "de" => (day, name, Some(year)),
        _ => return None,
    };
    let day: u32 = day.parse().ok()?;
    let month0 = MONTH_NAMES_ENGLISH
        .iter()
        .chain(MONTH_NAMES_SPANISH.iter())
        .position(|m| m == name)?
        % 12;
    let year: i32 = match year {
        Some(y) => y.parse().ok()?,
        None => today.year(),
    };
    let date =
        NaiveDate::from_ymd_opt(year, u32::try_from(month0).ok()? + 1, day)?.and_hms_opt(0, 0, 0)?;
    Some(Filter::DateEquals(date))
}

/// 0-based month position in either language list.
fn month_index(name: &str) -> Option<usize> {
    let lowered = name.to_lowercase();
    MONTH_NAMES_ENGLISH
        .iter()
        .position(|m| *m == lowered)
        .or_else(|| MONTH_NAMES_SPANISH.iter().position(|m| *m == lowered))
}

/// Half-open range covering one calendar day.
fn day_range(year: i32, month: u32, day: u32) -> Option<Filter> {
    let start = NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)?;
    Some(Filter::DateRange(start, start + Duration::days(1)))
}

/// Half-open range covering one calendar month; December wraps into the
/// next year.
fn month_range(year: i32, month0: usize) -> Option<Filter> {
    let month = u32::try_from(month0).ok()? + 1;
    let start = NaiveDate::from_ymd_opt(year, month, 1)?.and_hms_opt(0, 0, 0)?;
    let end = if month0 == 11 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 1, 1)?
    }
    .and_hms_opt(0, 0, 0)?;
    Some(Filter::DateRange(start, end))
}
