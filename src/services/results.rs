use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use time::OffsetDateTime;

use crate::core::time::{format_elapsed, format_report_date};
use crate::schemas::student::StudentIdentity;
use crate::schemas::AnswerMap;
use crate::services::exam_content::ExamContent;
use crate::services::scoring::{answer_matches, Score};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PerformanceLevel {
    Excellent,
    VeryGood,
    Good,
    Pass,
    NeedsImprovement,
}

impl PerformanceLevel {
    pub(crate) fn from_percentage(percentage: u32) -> Self {
        match percentage {
            90.. => Self::Excellent,
            75..=89 => Self::VeryGood,
            60..=74 => Self::Good,
            50..=59 => Self::Pass,
            _ => Self::NeedsImprovement,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Excellent => "Excellent",
            Self::VeryGood => "Very good",
            Self::Good => "Good",
            Self::Pass => "Pass",
            Self::NeedsImprovement => "Needs improvement",
        }
    }
}

/// Unweighted per-part tally; only questions with a solution count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PartStats {
    pub(crate) part_id: String,
    pub(crate) title: String,
    pub(crate) correct: u32,
    pub(crate) total: u32,
}

impl PartStats {
    pub(crate) fn percentage(&self) -> u32 {
        if self.total == 0 {
            return 0;
        }
        (f64::from(self.correct) / f64::from(self.total) * 100.0).round() as u32
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ReviewRow {
    pub(crate) question_id: String,
    pub(crate) given: Option<String>,
    pub(crate) expected: String,
    pub(crate) correct: bool,
}

#[derive(Debug, Clone)]
pub(crate) struct ResultsBreakdown {
    pub(crate) score: Score,
    pub(crate) percentage: u32,
    pub(crate) level: PerformanceLevel,
    pub(crate) time_taken: Duration,
    pub(crate) parts: Vec<PartStats>,
    pub(crate) review: Vec<(String, Vec<ReviewRow>)>,
}

impl ResultsBreakdown {
    pub(crate) fn build(
        content: &ExamContent,
        answers: &AnswerMap,
        score: Score,
        time_taken: Duration,
    ) -> Self {
        let mut parts = Vec::with_capacity(content.parts.len());
        let mut review = Vec::with_capacity(content.parts.len());

        for part in &content.parts {
            let mut stats = PartStats {
                part_id: part.id.clone(),
                title: part.title.clone(),
                correct: 0,
                total: 0,
            };
            let mut rows = Vec::new();

            for question in &part.questions {
                let Some(expected) = content.solutions.get(&question.id) else {
                    continue;
                };
                if expected.trim().is_empty() {
                    continue;
                }
                let given = answers.get(&question.id).cloned();
                let correct = answer_matches(given.as_deref(), expected);
                stats.total += 1;
                if correct {
                    stats.correct += 1;
                }
                rows.push(ReviewRow {
                    question_id: question.id.clone(),
                    given,
                    expected: expected.clone(),
                    correct,
                });
            }

            review.push((part.id.clone(), rows));
            parts.push(stats);
        }

        let percentage = score.percentage();
        Self {
            score,
            percentage,
            level: PerformanceLevel::from_percentage(percentage),
            time_taken,
            parts,
            review,
        }
    }

    pub(crate) fn render_report(
        &self,
        student: &StudentIdentity,
        exam_label: &str,
        date: OffsetDateTime,
    ) -> String {
        let mut report = String::new();
        let _ = writeln!(report, "EXAM RESULTS");
        let _ = writeln!(report, "============");
        let _ = writeln!(report, "Student: {}", student.name);
        let _ = writeln!(report, "Exam: {exam_label}");
        let _ = writeln!(report, "Date: {}", format_report_date(date));
        let _ = writeln!(report);
        let _ = writeln!(report, "OVERALL SCORE");
        let _ = writeln!(report, "-------------");
        let _ = writeln!(report, "{} ({}%)", self.score, self.percentage);
        let _ = writeln!(report, "Level: {}", self.level.label());
        let _ = writeln!(report, "Time: {}", format_elapsed(self.time_taken));
        let _ = writeln!(report);
        let _ = writeln!(report, "PER PART");
        let _ = writeln!(report, "--------");
        for part in &self.parts {
            let _ = writeln!(
                report,
                "{}: {}/{} ({}%)",
                part.title,
                part.correct,
                part.total,
                part.percentage()
            );
        }
        report.trim_end().to_string()
    }
}

pub(crate) fn report_path(data_dir: &Path, exam_label: &str, student_name: &str) -> PathBuf {
    let exam: String = exam_label.split_whitespace().collect::<Vec<_>>().join("_");
    let name: String = student_name.split_whitespace().collect::<Vec<_>>().join("_");
    data_dir.join("reports").join(format!("results_{exam}_{name}.txt"))
}

pub(crate) async fn write_report(
    data_dir: &Path,
    breakdown: &ResultsBreakdown,
    student: &StudentIdentity,
    exam_label: &str,
) -> anyhow::Result<PathBuf> {
    let path = report_path(data_dir, exam_label, &student.name);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let report = breakdown.render_report(student, exam_label, OffsetDateTime::now_utc());
    tokio::fs::write(&path, report)
        .await
        .with_context(|| format!("failed to write report {}", path.display()))?;
    tracing::info!(path = %path.display(), "Results report written");
    Ok(path)
}
