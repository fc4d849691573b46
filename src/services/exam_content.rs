use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::schemas::exam::{
    Advert, BankWord, ChoiceEntry, ExamLevel, ExamStructureFile, ExamTextsFile, PartKind,
    PartStructure, PartTexts, SolutionsFile,
};
use crate::schemas::SolutionsMap;
use crate::services::scoring::normalize_answer;

const STRUCTURE_FILE: &str = "exam_data.json";
const TEXTS_FILE: &str = "exam_texts.json";
const SOLUTIONS_FILE: &str = "exam_solutions.json";

pub(crate) const TEXT_UNAVAILABLE: &str = "Text unavailable.";
const GAP_CHOICE_KEYS: [&str; 3] = ["a", "b", "c"];

#[derive(Debug, Error)]
pub(crate) enum ContentError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path} has invalid format: {source}")]
    Format {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("exam has no parts")]
    NoParts,
    #[error("question {0} appears in more than one place")]
    DuplicateQuestion(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnswerOption {
    pub(crate) key: String,
    pub(crate) label: String,
}

#[derive(Debug, Clone)]
pub(crate) struct Question {
    pub(crate) id: String,
    pub(crate) prompt: Option<String>,
    pub(crate) text: Option<String>,
    pub(crate) choices: Vec<AnswerOption>,
}

/// One exam part with its long texts already merged in.
#[derive(Debug, Clone)]
pub(crate) struct ExamPart {
    pub(crate) id: String,
    pub(crate) kind: PartKind,
    pub(crate) title: String,
    pub(crate) subtitle: Option<String>,
    pub(crate) description: Option<String>,
    pub(crate) reading_text: Option<String>,
    pub(crate) questions: Vec<Question>,
    pub(crate) options: Vec<AnswerOption>,
    pub(crate) ads: Vec<Advert>,
    pub(crate) word_bank: Vec<BankWord>,
}

impl ExamPart {
    /// Keys a student may pick for `question`, in display order.
    pub(crate) fn options_for<'a>(&'a self, question: &'a Question) -> Vec<&'a AnswerOption> {
        if !question.choices.is_empty() {
            return question.choices.iter().collect();
        }
        self.options.iter().collect()
    }

    pub(crate) fn bank_word(&self, key: &str) -> Option<&BankWord> {
        let key = normalize_answer(key);
        self.word_bank.iter().find(|word| normalize_answer(&word.key) == key)
    }
}

/// Immutable exam dataset for one level.
#[derive(Debug, Clone)]
pub(crate) struct ExamContent {
    pub(crate) level: ExamLevel,
    pub(crate) exam_id: String,
    pub(crate) parts: Vec<ExamPart>,
    pub(crate) solutions: SolutionsMap,
}

impl ExamContent {
    /// Reads `<content_dir>/<level>/`; the texts file is optional.
    pub(crate) async fn load(content_dir: &Path, level: ExamLevel) -> Result<Self, ContentError> {
        let dir = content_dir.join(level.as_str());
        let structure: ExamStructureFile = read_required(&dir.join(STRUCTURE_FILE)).await?;
        let texts: ExamTextsFile = read_optional(&dir.join(TEXTS_FILE)).await?.unwrap_or_default();
        let solutions: SolutionsFile = read_required(&dir.join(SOLUTIONS_FILE)).await?;

        let content = Self::assemble(level, structure, texts, solutions)?;
        tracing::info!(
            level = level.as_str(),
            exam_id = %content.exam_id,
            parts = content.parts.len(),
            questions = content.question_count(),
            "Exam content loaded"
        );
        Ok(content)
    }

    pub(crate) fn assemble(
        level: ExamLevel,
        structure: ExamStructureFile,
        texts: ExamTextsFile,
        solutions: SolutionsFile,
    ) -> Result<Self, ContentError> {
        if structure.parts.is_empty() {
            return Err(ContentError::NoParts);
        }

        let parts: Vec<ExamPart> = structure
            .parts
            .into_iter()
            .map(|part| {
                let part_texts = texts.texts.get(&part.id);
                merge_part(part, part_texts)
            })
            .collect();

        let mut seen = HashSet::new();
        for question in parts.iter().flat_map(|part| part.questions.iter()) {
            if !seen.insert(question.id.as_str()) {
                return Err(ContentError::DuplicateQuestion(question.id.clone()));
            }
        }
        for question_id in solutions.solutions.keys() {
            if !seen.contains(question_id.as_str()) {
                tracing::warn!(question_id = %question_id, "Solution has no matching question");
            }
        }

        Ok(Self { level, exam_id: solutions.exam_id, parts, solutions: solutions.solutions })
    }

    pub(crate) fn question(&self, question_id: &str) -> Option<(&ExamPart, &Question)> {
        let question_id = question_id.trim();
        self.parts.iter().find_map(|part| {
            part.questions.iter().find(|question| question.id == question_id).map(|q| (part, q))
        })
    }

    /// Canonical key for `option` if the question offers it.
    pub(crate) fn accepted_option(&self, question_id: &str, option: &str) -> Option<String> {
        let (part, question) = self.question(question_id)?;
        let wanted = normalize_answer(option);
        if wanted.is_empty() {
            return None;
        }

        if part.kind == PartKind::GapFillBank && question.choices.is_empty() {
            return part.bank_word(&wanted).map(|word| normalize_answer(&word.key));
        }
        part.options_for(question)
            .into_iter()
            .find(|candidate| normalize_answer(&candidate.key) == wanted)
            .map(|candidate| candidate.key.clone())
    }

    pub(crate) fn question_count(&self) -> usize {
        self.parts.iter().map(|part| part.questions.len()).sum()
    }
}

fn merge_part(part: PartStructure, texts: Option<&PartTexts>) -> ExamPart {
    let questions = part
        .items
        .into_iter()
        .map(|item| {
            let choices = item
                .choices
                .into_iter()
                .enumerate()
                .filter_map(|(index, choice)| match choice {
                    ChoiceEntry::Keyed { key, text } => Some(AnswerOption { key, label: text }),
                    ChoiceEntry::Label(label) => GAP_CHOICE_KEYS
                        .get(index)
                        .map(|key| AnswerOption { key: (*key).to_string(), label }),
                })
                .collect();
            Question { id: item.question_id, prompt: item.question, text: item.text, choices }
        })
        .collect();

    let options = part
        .options
        .into_iter()
        .map(|option| AnswerOption { label: option.text.unwrap_or_default(), key: option.id })
        .collect();

    let mut merged = ExamPart {
        id: part.id,
        kind: part.kind,
        title: part.title,
        subtitle: None,
        description: part.instruction,
        reading_text: None,
        questions,
        options,
        ads: Vec::new(),
        word_bank: part.word_bank,
    };

    let Some(texts) = texts else {
        return merged;
    };

    match merged.kind {
        PartKind::MatchingSituations => {
            for question in &mut merged.questions {
                let situation = texts.situations.iter().find(|s| s.id == question.id);
                question.text = Some(
                    situation.map_or_else(|| TEXT_UNAVAILABLE.to_string(), |s| s.text.clone()),
                );
            }
            merged.ads = texts.ads.clone();
        }
        PartKind::MatchingHeadlines => {
            for question in &mut merged.questions {
                let text = texts.items.get(&question.id).cloned();
                question.text = Some(text.unwrap_or_else(|| TEXT_UNAVAILABLE.to_string()));
            }
            if let Some(intro) = non_empty(texts.intro.as_deref()) {
                merged.description = Some(intro);
            }
        }
        PartKind::MultipleChoice | PartKind::GapFillChoice | PartKind::GapFillBank => {
            merged.reading_text = Some(
                non_empty(texts.content.as_deref()).unwrap_or_else(|| TEXT_UNAVAILABLE.to_string()),
            );
            if let Some(title) = non_empty(texts.title.as_deref()) {
                merged.title = title;
            }
            merged.subtitle = non_empty(texts.headline.as_deref())
                .or_else(|| non_empty(texts.subheadline.as_deref()));
        }
    }

    merged
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|value| !value.is_empty()).map(str::to_string)
}

async fn read_required<T: DeserializeOwned>(path: &Path) -> Result<T, ContentError> {
    let raw = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| ContentError::Io { path: path.to_path_buf(), source })?;
    serde_json::from_str(&raw)
        .map_err(|source| ContentError::Format { path: path.to_path_buf(), source })
}

async fn read_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, ContentError> {
    match read_required(path).await {
        Ok(value) => Ok(Some(value)),
        Err(ContentError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Optional exam file not present");
            Ok(None)
        }
        Err(err) => Err(err),
    }
}
