//! Tenant configuration and lead data model.
//!
//! A tenant owns a questionnaire, one scoring model per scored question, and
//! an ordered list of recommendation rules. These types are plain data; the
//! compiled, ready-to-evaluate form lives in [`crate::cache`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Question types, stored with the backend's short codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum QuestionType {
    Open,
    Choices,
    MultipleChoices,
    Slider,
    Integer,
    Date,
}

impl QuestionType {
    pub fn code(self) -> &'static str {
        match self {
            QuestionType::Open => "O",
            QuestionType::Choices => "CH",
            QuestionType::MultipleChoices => "MC",
            QuestionType::Slider => "S",
            QuestionType::Integer => "I",
            QuestionType::Date => "D",
        }
    }

    /// Whether answers are numbers looked up in value ranges.
    pub fn is_numeric(self) -> bool {
        matches!(self, QuestionType::Slider | QuestionType::Integer)
    }

    pub fn has_choices(self) -> bool {
        matches!(self, QuestionType::Choices | QuestionType::MultipleChoices)
    }
}

impl fmt::Display for QuestionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for QuestionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "o" | "open" => Ok(QuestionType::Open),
            "ch" | "choices" => Ok(QuestionType::Choices),
            "mc" | "multiple_choices" | "multiplechoices" => Ok(QuestionType::MultipleChoices),
            "s" | "slider" => Ok(QuestionType::Slider),
            "i" | "integer" => Ok(QuestionType::Integer),
            "d" | "date" => Ok(QuestionType::Date),
            other => Err(format!("unknown question type: {other}")),
        }
    }
}

impl TryFrom<String> for QuestionType {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QuestionType> for String {
    fn from(value: QuestionType) -> Self {
        value.code().to_string()
    }
}

/// One selectable answer of a Choices or MultipleChoices question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    pub text: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub points: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    #[serde(default)]
    pub id: Option<String>,
    /// Display order, starting at 1.
    pub number: u32,
    /// Identifier used in `{field}` references.
    pub field_name: String,
    pub text: String,
    #[serde(rename = "type")]
    pub question_type: QuestionType,
    /// Accepts several values for one field.
    #[serde(default)]
    pub multiple_values: bool,
    #[serde(default)]
    pub min_value: Option<f64>,
    #[serde(default)]
    pub max_value: Option<f64>,
    #[serde(default)]
    pub choices: Vec<Choice>,
}

impl Question {
    /// Find the choice a response refers to: slug, then exact text, then
    /// case-insensitive text.
    pub fn find_choice(&self, response: &str) -> Option<&Choice> {
        let response = response.trim();
        self.choices
            .iter()
            .find(|c| c.slug.as_deref() == Some(response))
            .or_else(|| self.choices.iter().find(|c| c.text == response))
            .or_else(|| {
                self.choices
                    .iter()
                    .find(|c| c.text.eq_ignore_ascii_case(response))
            })
    }

    /// Whether answers to this question are list-valued.
    pub fn is_multi_valued(&self) -> bool {
        self.multiple_values || self.question_type == QuestionType::MultipleChoices
    }
}

/// Maps `start <= value < end` (or `value >= start` when `end` is absent) to
/// points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub start: f64,
    #[serde(default)]
    pub end: Option<f64>,
    pub points: f64,
}

impl ValueRange {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.start && self.end.is_none_or(|end| value < end)
    }

    pub fn overlaps(&self, other: &ValueRange) -> bool {
        let self_end = self.end.unwrap_or(f64::INFINITY);
        let other_end = other.end.unwrap_or(f64::INFINITY);
        self.start < other_end && other.start < self_end
    }
}

/// Same as [`ValueRange`] over calendar dates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    #[serde(default)]
    pub end: Option<NaiveDate>,
    pub points: f64,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && self.end.is_none_or(|end| date < end)
    }

    pub fn overlaps(&self, other: &DateRange) -> bool {
        let self_end = self.end.unwrap_or(NaiveDate::MAX);
        let other_end = other.end.unwrap_or(NaiveDate::MAX);
        self.start < other_end && other.start < self_end
    }
}

/// How a question's answer turns into axis points.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringModel {
    pub id: String,
    /// The question this model scores.
    pub field_name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default)]
    pub x_axis: bool,
    #[serde(default)]
    pub y_axis: bool,
    /// Optional formula whose result replaces the raw answer.
    #[serde(default)]
    pub formula: Option<String>,
    #[serde(default)]
    pub ranges: Vec<ValueRange>,
    #[serde(default)]
    pub date_ranges: Vec<DateRange>,
}

fn default_weight() -> f64 {
    1.0
}

impl ScoringModel {
    /// Points of the first declared range containing `value`.
    pub fn range_points(&self, value: f64) -> Option<f64> {
        self.ranges
            .iter()
            .find(|r| r.contains(value))
            .map(|r| r.points)
    }

    pub fn date_points(&self, date: NaiveDate) -> Option<f64> {
        self.date_ranges
            .iter()
            .find(|r| r.contains(date))
            .map(|r| r.points)
    }
}

/// A rule plus the content shown when it matches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub id: String,
    pub rule: String,
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_link: Option<String>,
    /// Lower runs first; ties keep declaration order.
    #[serde(default)]
    pub priority: i32,
}

/// Whether recommendation selection stops at the first matching rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    #[default]
    #[serde(alias = "first")]
    FirstMatch,
    #[serde(alias = "all")]
    AllMatches,
}

impl fmt::Display for SelectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionMode::FirstMatch => write!(f, "first_match"),
            SelectionMode::AllMatches => write!(f, "all_matches"),
        }
    }
}

impl FromStr for SelectionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "first" | "first_match" | "first-match" => Ok(SelectionMode::FirstMatch),
            "all" | "all_matches" | "all-matches" => Ok(SelectionMode::AllMatches),
            other => Err(format!("unknown selection mode: {other}")),
        }
    }
}

/// Everything configured for one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantConfig {
    pub id: String,
    pub name: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub scoring_models: Vec<ScoringModel>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
    /// Replaces `x_axis + y_axis` as the total score.
    #[serde(default)]
    pub total_formula: Option<String>,
    #[serde(default)]
    pub selection_mode: Option<SelectionMode>,
}

fn default_version() -> u32 {
    1
}

impl TenantConfig {
    pub fn question(&self, field_name: &str) -> Option<&Question> {
        self.questions.iter().find(|q| q.field_name == field_name)
    }
}

/// A single raw response: a scalar or a list of scalars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Response {
    Number(f64),
    Text(String),
    List(Vec<Response>),
}

impl Response {
    /// Flatten into scalar items. Comma-separated text is split when
    /// `split_text` is set.
    pub fn items(&self, split_text: bool) -> Vec<Response> {
        match self {
            Response::List(items) => items.iter().flat_map(|i| i.items(split_text)).collect(),
            Response::Text(s) if split_text && s.contains(',') => s
                .split(',')
                .map(str::trim)
                .filter(|part| !part.is_empty())
                .map(|part| Response::Text(part.to_string()))
                .collect(),
            scalar => vec![scalar.clone()],
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Response::Number(_) => false,
            Response::Text(s) => s.trim().is_empty(),
            Response::List(items) => items.iter().all(Response::is_empty),
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Number(n) => write!(f, "{n}"),
            Response::Text(s) => write!(f, "{s}"),
            Response::List(items) => {
                let parts: Vec<String> = items.iter().map(ToString::to_string).collect();
                write!(f, "{}", parts.join(", "))
            }
        }
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub field_name: String,
    pub response: Response,
}

static INDEXED_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\[(\d+)\]$").expect("indexed field pattern")
});

/// Ordered answers of one submission.
///
/// Deserializes from either `{"field": response}` or
/// `[{"field_name": .., "response": ..}]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "AnswersRepr", into = "Vec<Answer>")]
pub struct Answers(Vec<Answer>);

#[derive(Deserialize)]
#[serde(untagged)]
enum AnswersRepr {
    Pairs(Vec<Answer>),
    Map(OrderedAnswers),
}

/// `{"field": response, ...}` in document order.
struct OrderedAnswers(Vec<Answer>);

impl<'de> Deserialize<'de> for OrderedAnswers {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = OrderedAnswers;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of field names to responses")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
                let mut answers = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((field_name, response)) = map.next_entry::<String, Response>()? {
                    answers.push(Answer {
                        field_name,
                        response,
                    });
                }
                Ok(OrderedAnswers(answers))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

impl From<AnswersRepr> for Answers {
    fn from(repr: AnswersRepr) -> Self {
        match repr {
            AnswersRepr::Pairs(pairs) => Answers(pairs),
            AnswersRepr::Map(OrderedAnswers(entries)) => Answers(entries),
        }
    }
}

impl From<Answers> for Vec<Answer> {
    fn from(answers: Answers) -> Self {
        answers.0
    }
}

impl Answers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, field_name: impl Into<String>, response: Response) {
        self.0.push(Answer {
            field_name: field_name.into(),
            response,
        });
    }

    /// Builder-style [`push`](Self::push).
    pub fn with(mut self, field_name: impl Into<String>, response: Response) -> Self {
        self.push(field_name, response);
        self
    }

    pub fn get(&self, field_name: &str) -> Option<&Response> {
        self.0
            .iter()
            .find(|a| a.field_name == field_name)
            .map(|a| &a.response)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Answer> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Fold `field[0]`, `field[1]`, ... into one list answer for `field`,
    /// ordered by index and placed where the first indexed entry appeared.
    /// A later plain answer for the same field replaces an earlier one.
    pub fn normalize(self) -> Answers {
        let mut out: Vec<Answer> = Vec::new();
        let mut indexed: BTreeMap<String, Vec<(usize, Response)>> = BTreeMap::new();

        for answer in self.0 {
            if let Some(caps) = INDEXED_FIELD.captures(&answer.field_name) {
                let base = caps[1].to_string();
                let index = caps[2].parse::<usize>().unwrap_or(usize::MAX);
                if !indexed.contains_key(&base) && !out.iter().any(|a| a.field_name == base) {
                    out.push(Answer {
                        field_name: base.clone(),
                        response: Response::List(Vec::new()),
                    });
                }
                indexed
                    .entry(base)
                    .or_default()
                    .push((index, answer.response));
                continue;
            }
            match out.iter_mut().find(|a| a.field_name == answer.field_name) {
                Some(existing) => existing.response = answer.response,
                None => out.push(answer),
            }
        }

        for (base, mut items) in indexed {
            items.sort_by_key(|(index, _)| *index);
            if let Some(slot) = out.iter_mut().find(|a| a.field_name == base) {
                slot.response = Response::List(items.into_iter().map(|(_, r)| r).collect());
            }
        }

        Answers(out)
    }
}

impl FromIterator<(String, Response)> for Answers {
    fn from_iter<I: IntoIterator<Item = (String, Response)>>(iter: I) -> Self {
        Answers(
            iter.into_iter()
                .map(|(field_name, response)| Answer {
                    field_name,
                    response,
                })
                .collect(),
        )
    }
}

/// A lead submission as received from a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    #[serde(default, alias = "id")]
    pub lead_id: Option<Uuid>,
    #[serde(default)]
    pub external_lead_id: Option<String>,
    pub answers: Answers,
}

/// A scored lead. Never mutated; re-scoring produces a new value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: Uuid,
    #[serde(default)]
    pub external_lead_id: Option<String>,
    pub answers: Answers,
    pub x_axis: f64,
    pub y_axis: f64,
    pub total_score: f64,
    #[serde(default)]
    pub matched_recommendations: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub rescored_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Response {
        Response::Text(s.into())
    }

    #[test]
    fn question_type_codes_and_names() {
        assert_eq!("CH".parse::<QuestionType>().unwrap(), QuestionType::Choices);
        assert_eq!(
            "multiple_choices".parse::<QuestionType>().unwrap(),
            QuestionType::MultipleChoices
        );
        assert_eq!("s".parse::<QuestionType>().unwrap(), QuestionType::Slider);
        assert_eq!(QuestionType::Date.to_string(), "D");
        assert!("X".parse::<QuestionType>().is_err());
    }

    #[test]
    fn selection_mode_parse() {
        assert_eq!("all".parse::<SelectionMode>().unwrap(), SelectionMode::AllMatches);
        assert_eq!(
            "first_match".parse::<SelectionMode>().unwrap(),
            SelectionMode::FirstMatch
        );
        assert!("some".parse::<SelectionMode>().is_err());
        let mode: SelectionMode = serde_json::from_str("\"all\"").unwrap();
        assert_eq!(mode, SelectionMode::AllMatches);
    }

    #[test]
    fn value_range_boundaries() {
        let range = ValueRange {
            start: 50_000.0,
            end: Some(100_000.0),
            points: 15.0,
        };
        assert!(range.contains(50_000.0));
        assert!(range.contains(99_999.99));
        assert!(!range.contains(100_000.0));
        assert!(!range.contains(49_999.0));

        let open = ValueRange {
            start: 100_000.0,
            end: None,
            points: 20.0,
        };
        assert!(open.contains(1e12));
        assert!(range.overlaps(&ValueRange {
            start: 90_000.0,
            end: Some(200_000.0),
            points: 0.0
        }));
        assert!(!range.overlaps(&open));
    }

    #[test]
    fn first_declared_range_wins() {
        let model = ScoringModel {
            id: "m".into(),
            field_name: "age".into(),
            weight: 1.0,
            x_axis: true,
            y_axis: false,
            formula: None,
            ranges: vec![
                ValueRange {
                    start: 0.0,
                    end: Some(30.0),
                    points: 5.0,
                },
                ValueRange {
                    start: 20.0,
                    end: None,
                    points: 9.0,
                },
            ],
            date_ranges: vec![],
        };
        assert_eq!(model.range_points(25.0), Some(5.0));
        assert_eq!(model.range_points(31.0), Some(9.0));
        assert_eq!(model.range_points(-1.0), None);
    }

    #[test]
    fn date_range_boundaries() {
        let d = |s: &str| NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap();
        let range = DateRange {
            start: d("2024-01-01"),
            end: Some(d("2024-07-01")),
            points: 3.0,
        };
        assert!(range.contains(d("2024-01-01")));
        assert!(!range.contains(d("2024-07-01")));
    }

    #[test]
    fn find_choice_by_slug_and_text() {
        let q = Question {
            id: None,
            number: 1,
            field_name: "plan".into(),
            text: "Plan?".into(),
            question_type: QuestionType::Choices,
            multiple_values: false,
            min_value: None,
            max_value: None,
            choices: vec![
                Choice {
                    text: "Full Time".into(),
                    slug: Some("full_time".into()),
                    points: 8.0,
                },
                Choice {
                    text: "Part Time".into(),
                    slug: None,
                    points: 3.0,
                },
            ],
        };
        assert_eq!(q.find_choice("full_time").unwrap().points, 8.0);
        assert_eq!(q.find_choice("Part Time").unwrap().points, 3.0);
        assert_eq!(q.find_choice("part time").unwrap().points, 3.0);
        assert!(q.find_choice("retired").is_none());
    }

    #[test]
    fn answers_from_map_keep_submission_order() {
        let answers: Answers = serde_json::from_str(
            r#"{"zip": "90210", "age": 30, "kids[1]": 9, "kids[0]": 4, "budget": 500}"#,
        )
        .unwrap();
        let fields: Vec<&str> = answers.iter().map(|a| a.field_name.as_str()).collect();
        assert_eq!(fields, vec!["zip", "age", "kids[1]", "kids[0]", "budget"]);

        let folded = answers.normalize();
        let fields: Vec<&str> = folded.iter().map(|a| a.field_name.as_str()).collect();
        assert_eq!(fields, vec!["zip", "age", "kids", "budget"]);
        assert_eq!(
            folded.get("kids"),
            Some(&Response::List(vec![Response::Number(4.0), Response::Number(9.0)]))
        );
    }

    #[test]
    fn answers_from_map_and_pairs() {
        let from_map: Answers =
            serde_json::from_str(r#"{"income": 60000, "state": "CA"}"#).unwrap();
        assert_eq!(from_map.get("income"), Some(&Response::Number(60000.0)));
        assert_eq!(from_map.get("state"), Some(&text("CA")));

        let from_pairs: Answers = serde_json::from_str(
            r#"[{"field_name": "income", "response": "60000"}, {"field_name": "kids", "response": [1, 2]}]"#,
        )
        .unwrap();
        assert_eq!(from_pairs.len(), 2);
        assert_eq!(
            from_pairs.get("kids"),
            Some(&Response::List(vec![Response::Number(1.0), Response::Number(2.0)]))
        );
    }

    #[test]
    fn indexed_answers_fold_in_index_order() {
        let answers = Answers::new()
            .with("name", text("Ana"))
            .with("kids_ages[1]", Response::Number(9.0))
            .with("income", Response::Number(1.0))
            .with("kids_ages[0]", Response::Number(4.0))
            .with("kids_ages[10]", Response::Number(14.0))
            .with("kids_ages[2]", Response::Number(12.0))
            .normalize();

        let fields: Vec<&str> = answers.iter().map(|a| a.field_name.as_str()).collect();
        assert_eq!(fields, vec!["name", "kids_ages", "income"]);
        assert_eq!(
            answers.get("kids_ages"),
            Some(&Response::List(vec![
                Response::Number(4.0),
                Response::Number(9.0),
                Response::Number(12.0),
                Response::Number(14.0),
            ]))
        );
    }

    #[test]
    fn response_items_split_text() {
        let r = text("a, b ,c");
        assert_eq!(r.items(true), vec![text("a"), text("b"), text("c")]);
        assert_eq!(r.items(false), vec![text("a, b ,c")]);
        assert!(text("  ").is_empty());
    }

    #[test]
    fn tenant_config_serde_roundtrip() {
        let config = TenantConfig {
            id: "acme".into(),
            name: "Acme Lending".into(),
            version: 2,
            questions: vec![],
            scoring_models: vec![],
            recommendations: vec![Recommendation {
                id: "r1".into(),
                rule: "{x} > 1".into(),
                response_text: "hi".into(),
                redirect_url: None,
                affiliate_name: None,
                affiliate_image: None,
                affiliate_link: None,
                priority: 0,
            }],
            total_formula: None,
            selection_mode: Some(SelectionMode::AllMatches),
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: TenantConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }
}
