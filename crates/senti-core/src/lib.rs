//! Core domain model for the senti batch worker.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub mod text;

pub const CRATE_NAME: &str = "senti-core";

/// Opaque identifier of an uploaded row. Kept in the JSON shape the store
/// returned it in so results reference the source with the same type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
    Int(i64),
    Text(String),
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordId::Int(v) => write!(f, "{v}"),
            RecordId::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RecordId {
    fn from(value: i64) -> Self {
        RecordId::Int(value)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        RecordId::Text(value.to_string())
    }
}

/// Object key under which the word cloud for a row is stored.
pub fn wordcloud_key(id: &RecordId) -> String {
    format!("wc_{id}.png")
}

/// One uploaded row awaiting analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub id: RecordId,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub file_name: String,
    #[serde(default)]
    pub row_number: Option<i64>,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub text: String,
    #[serde(default)]
    pub processed: bool,
}

impl SourceRecord {
    pub fn new(id: impl Into<RecordId>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            file_name: String::new(),
            row_number: None,
            text: text.into(),
            processed: false,
        }
    }

    /// Text with surrounding whitespace removed; empty means nothing to analyze.
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Polarity label. Lexicon scoring only yields the first three; hosted
/// classifiers may return their own label vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
    Other(String),
}

impl SentimentLabel {
    pub fn as_str(&self) -> &str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
            SentimentLabel::Other(label) => label,
        }
    }

    pub fn parse(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "positive" => SentimentLabel::Positive,
            "negative" => SentimentLabel::Negative,
            "neutral" => SentimentLabel::Neutral,
            other => SentimentLabel::Other(other.to_string()),
        }
    }
}

impl fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for SentimentLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SentimentLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(SentimentLabel::parse(&raw))
    }
}

/// Output of one analyzer call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    pub label: SentimentLabel,
    pub score: f64,
    pub summary: String,
}

/// Provenance stamped on every persisted result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub method: String,
    pub timestamp: DateTime<Utc>,
}

/// Persisted analysis of one source row. `source_id` is a weak reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub source_id: RecordId,
    pub file_name: String,
    pub row_number: Option<i64>,
    pub original_text: String,
    pub sentiment_label: SentimentLabel,
    pub sentiment_score: f64,
    pub summary: String,
    pub wordcloud_url: Option<String>,
    pub model_info: ModelInfo,
}

impl AnalysisResult {
    pub fn from_parts(
        record: &SourceRecord,
        analysis: Analysis,
        wordcloud_url: Option<String>,
        model_info: ModelInfo,
    ) -> Self {
        Self {
            source_id: record.id.clone(),
            file_name: record.file_name.clone(),
            row_number: record.row_number,
            original_text: record.text.clone(),
            sentiment_label: analysis.label,
            sentiment_score: analysis.score,
            summary: analysis.summary,
            wordcloud_url,
            model_info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn record_ids_keep_their_json_shape() {
        let rows: Vec<SourceRecord> = serde_json::from_str(
            r#"[
                {"id": 7, "file_name": "a.csv", "row_number": 3, "text": "hi", "processed": false},
                {"id": "9f1c", "file_name": null, "row_number": null, "text": null, "processed": false}
            ]"#,
        )
        .expect("rows");

        assert_eq!(rows[0].id, RecordId::Int(7));
        assert_eq!(rows[1].id, RecordId::Text("9f1c".into()));
        assert_eq!(rows[1].text, "");
        assert_eq!(rows[1].file_name, "");
        assert_eq!(serde_json::to_value(&rows[0].id).unwrap(), serde_json::json!(7));
        assert_eq!(wordcloud_key(&rows[1].id), "wc_9f1c.png");
    }

    #[test]
    fn result_payload_serializes_labels_and_null_url() {
        let record = SourceRecord {
            id: RecordId::Int(1),
            file_name: "reviews.csv".into(),
            row_number: Some(4),
            text: "Great.".into(),
            processed: false,
        };
        let analysis = Analysis {
            label: SentimentLabel::Positive,
            score: 0.62,
            summary: "Great".into(),
        };
        let info = ModelInfo {
            method: "lexicon".into(),
            timestamp: Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).single().unwrap(),
        };
        let payload = AnalysisResult::from_parts(&record, analysis, None, info);
        let value = serde_json::to_value(&payload).expect("json");

        assert_eq!(value["source_id"], 1);
        assert_eq!(value["sentiment_label"], "positive");
        assert!(value["wordcloud_url"].is_null());
        assert_eq!(value["model_info"]["method"], "lexicon");
    }

    #[test]
    fn unknown_labels_are_lowercased() {
        assert_eq!(SentimentLabel::parse("POSITIVE"), SentimentLabel::Positive);
        assert_eq!(
            SentimentLabel::parse("LABEL_1"),
            SentimentLabel::Other("label_1".into())
        );
    }
}
