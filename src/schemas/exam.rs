use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use super::SolutionsMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ExamLevel {
    B1,
    B2,
}

impl ExamLevel {
    pub(crate) const ALL: [ExamLevel; 2] = [ExamLevel::B1, ExamLevel::B2];

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::B1 => "b1",
            Self::B2 => "b2",
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::B1 => "Telc B1",
            Self::B2 => "Telc B2",
        }
    }

    pub(crate) fn tagline(self) -> &'static str {
        match self {
            Self::B1 => "Intermediate",
            Self::B2 => "Advanced (standard format)",
        }
    }

    pub(crate) fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "b1" | "1" => Some(Self::B1),
            "b2" | "2" => Some(Self::B2),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum PartKind {
    MatchingSituations,
    MatchingHeadlines,
    MultipleChoice,
    GapFillChoice,
    GapFillBank,
}

/// `exam_data.json`: the structure of every part, without long texts.
#[derive(Debug, Deserialize)]
pub(crate) struct ExamStructureFile {
    pub(crate) parts: Vec<PartStructure>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct PartStructure {
    pub(crate) id: String,
    #[serde(rename = "type")]
    pub(crate) kind: PartKind,
    #[serde(default)]
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) instruction: Option<String>,
    #[serde(default)]
    pub(crate) items: Vec<ItemStructure>,
    #[serde(default)]
    pub(crate) options: Vec<OptionEntry>,
    #[serde(default)]
    pub(crate) word_bank: Vec<BankWord>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct ItemStructure {
    #[serde(deserialize_with = "deserialize_question_id")]
    pub(crate) question_id: String,
    #[serde(default)]
    pub(crate) question: Option<String>,
    #[serde(default)]
    pub(crate) text: Option<String>,
    #[serde(default)]
    pub(crate) choices: Vec<ChoiceEntry>,
}

/// Multiple choice items carry keyed choices; gap-fill items carry bare labels
/// keyed `a`, `b`, `c` by position.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub(crate) enum ChoiceEntry {
    Keyed { key: String, text: String },
    Label(String),
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OptionEntry {
    #[serde(deserialize_with = "deserialize_question_id")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BankWord {
    pub(crate) key: String,
    pub(crate) word: String,
}

/// `exam_texts.json`: long texts keyed by part id.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ExamTextsFile {
    #[serde(default)]
    pub(crate) texts: HashMap<String, PartTexts>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct PartTexts {
    #[serde(default)]
    pub(crate) content: Option<String>,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) headline: Option<String>,
    #[serde(default)]
    pub(crate) subheadline: Option<String>,
    #[serde(default)]
    pub(crate) intro: Option<String>,
    #[serde(default)]
    pub(crate) situations: Vec<Situation>,
    #[serde(default)]
    pub(crate) ads: Vec<Advert>,
    #[serde(default)]
    pub(crate) items: HashMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Situation {
    #[serde(deserialize_with = "deserialize_question_id")]
    pub(crate) id: String,
    pub(crate) text: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Advert {
    #[serde(deserialize_with = "deserialize_question_id")]
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) title: Option<String>,
    #[serde(default)]
    pub(crate) text: String,
}

/// `exam_solutions.json`.
#[derive(Debug, Deserialize)]
pub(crate) struct SolutionsFile {
    pub(crate) exam_id: String,
    pub(crate) solutions: SolutionsMap,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Integer(i64),
    Float(f64),
}

fn deserialize_question_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(value) => value.trim().to_string(),
        RawId::Integer(value) => value.to_string(),
        RawId::Float(value) => value.to_string(),
    })
}
