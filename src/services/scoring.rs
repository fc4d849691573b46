use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::schemas::{AnswerMap, SolutionsMap};

const DEFAULT_POINTS: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub(crate) struct Score {
    pub(crate) correct: f64,
    pub(crate) total: f64,
}

impl Score {
    pub(crate) fn percentage(&self) -> u32 {
        if self.total <= 0.0 {
            return 0;
        }
        (self.correct / self.total * 100.0).round() as u32
    }
}

impl fmt::Display for Score {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", trim_points(self.correct), trim_points(self.total))
    }
}

fn trim_points(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

/// Inclusive range of numeric question ids worth `points` each. `last: None` is open-ended.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct WeightBand {
    pub(crate) first: u32,
    pub(crate) last: Option<u32>,
    pub(crate) points: f64,
}

impl WeightBand {
    fn contains(&self, id: u32) -> bool {
        id >= self.first && self.last.map_or(true, |last| id <= last)
    }

    fn upper(&self) -> u32 {
        self.last.unwrap_or(u32::MAX)
    }
}

/// Per-question point values, looked up by numeric question id.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WeightTable {
    bands: Vec<WeightBand>,
    default_points: f64,
}

#[derive(Debug, Error, PartialEq)]
pub(crate) enum WeightTableError {
    #[error("malformed band '{0}', expected 'first-last:points' or 'first-:points'")]
    Malformed(String),
    #[error("band '{0}' has a negative or non-finite point value")]
    InvalidPoints(String),
    #[error("band '{0}' ends before it starts")]
    EmptyRange(String),
    #[error("bands {0} and {1} overlap")]
    Overlap(String, String),
}

impl WeightTable {
    pub(crate) fn uniform(points: f64) -> Self {
        Self { bands: Vec::new(), default_points: points }
    }

    pub(crate) fn new(mut bands: Vec<WeightBand>) -> Result<Self, WeightTableError> {
        bands.sort_by_key(|band| band.first);
        for band in &bands {
            if !band.points.is_finite() || band.points < 0.0 {
                return Err(WeightTableError::InvalidPoints(describe(band)));
            }
            if band.upper() < band.first {
                return Err(WeightTableError::EmptyRange(describe(band)));
            }
        }
        for pair in bands.windows(2) {
            if pair[0].upper() >= pair[1].first {
                return Err(WeightTableError::Overlap(describe(&pair[0]), describe(&pair[1])));
            }
        }
        Ok(Self { bands, default_points: DEFAULT_POINTS })
    }

    /// Ids that are not numeric, or fall outside every band, are worth the default point.
    pub(crate) fn weight_for(&self, question_id: &str) -> f64 {
        let Ok(id) = question_id.trim().parse::<u32>() else {
            return self.default_points;
        };
        self.bands
            .iter()
            .find(|band| band.contains(id))
            .map(|band| band.points)
            .unwrap_or(self.default_points)
    }
}

impl Default for WeightTable {
    fn default() -> Self {
        Self::uniform(DEFAULT_POINTS)
    }
}

impl FromStr for WeightTable {
    type Err = WeightTableError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut bands = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|entry| !entry.is_empty()) {
            let malformed = || WeightTableError::Malformed(entry.to_string());
            let (range, points) = entry.split_once(':').ok_or_else(malformed)?;
            let (first, last) = range.split_once('-').ok_or_else(malformed)?;
            let first = first.trim().parse::<u32>().map_err(|_| malformed())?;
            let last = match last.trim() {
                "" => None,
                value => Some(value.parse::<u32>().map_err(|_| malformed())?),
            };
            let points = points.trim().parse::<f64>().map_err(|_| malformed())?;
            bands.push(WeightBand { first, last, points });
        }
        Self::new(bands)
    }
}

fn describe(band: &WeightBand) -> String {
    match band.last {
        Some(last) => format!("{}-{}:{}", band.first, last, band.points),
        None => format!("{}-:{}", band.first, band.points),
    }
}

pub(crate) fn normalize_answer(value: &str) -> String {
    value.trim().to_lowercase()
}

/// An empty answer never matches, even against an empty solution.
pub(crate) fn answer_matches(given: Option<&str>, expected: &str) -> bool {
    let given = normalize_answer(given.unwrap_or_default());
    !given.is_empty() && given == normalize_answer(expected)
}

/// Scores every question present in `solutions`; answers to unknown questions are ignored.
pub(crate) fn score(answers: &AnswerMap, solutions: &SolutionsMap, weights: &WeightTable) -> Score {
    let mut correct = 0.0;
    let mut total = 0.0;

    for (question_id, expected) in solutions {
        let points = weights.weight_for(question_id);
        total += points;
        if answer_matches(answers.get(question_id).map(String::as_str), expected) {
            correct += points;
        }
    }

    Score { correct, total }
}
