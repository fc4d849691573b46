use std::fmt::Write as _;
use std::time::Duration;

use crate::core::time::{format_clock, format_elapsed, format_short_clock};
use crate::schemas::exam::ExamLevel;
use crate::schemas::AnswerMap;
use crate::services::exam_content::{ExamContent, ExamPart};
use crate::services::exam_session::{FinishReason, SessionView, SubmissionState};
use crate::services::results::ResultsBreakdown;

const UNANSWERED: &str = "____";

pub(crate) fn level_menu() -> String {
    let mut menu = String::from("WAVY.LEARN\n\n");
    for (index, level) in ExamLevel::ALL.iter().enumerate() {
        let _ = writeln!(menu, "  {}) {:<8} {}", index + 1, level.label(), level.tagline());
    }
    menu.push_str("\nChoose a level (1/2), or `quit`:");
    menu
}

pub(crate) fn help() -> &'static str {
    "Commands:
  parts                      list the exam parts
  part <n> | next | prev     move between parts
  show                       show the current part again
  answer <q> <option>        pick an option (also <q>=<option>)
  time                       show the remaining time
  finish                     hand in the exam
  logout                     change student (lobby only)
  quit                       leave the program"
}

pub(crate) fn lobby(view: &SessionView) -> String {
    let name = view.student.as_ref().map(|student| student.name.as_str()).unwrap_or("student");
    let duration = view.duration.map(format_clock).unwrap_or_else(|| "--:--:--".to_string());
    format!(
        "Welcome, {name}.\nThe exam has not started yet. Please wait for the proctor.\n\
         Exam duration: {duration}"
    )
}

/// `MM:SS` while an attempt is open, marked when under `urgent`.
pub(crate) fn clock(view: &SessionView, urgent: Duration) -> String {
    let Some(remaining) = view.remaining else {
        return "Time left: --:--".to_string();
    };
    let marker = if remaining < urgent { "  (!) hurry up" } else { "" };
    format!("Time left: {}{marker}", format_short_clock(remaining))
}

pub(crate) fn connection_lost(view: &SessionView) -> String {
    let reason = view.last_error.as_deref().unwrap_or("no answer from the exam server");
    format!("Connection lost ({reason}). Retrying in the background; your answers are kept.")
}

pub(crate) fn parts_list(content: &ExamContent, answers: &AnswerMap) -> String {
    let mut list = String::from("Parts:");
    for (index, part) in content.parts.iter().enumerate() {
        let answered =
            part.questions.iter().filter(|question| answers.contains_key(&question.id)).count();
        let _ = write!(
            list,
            "\n  {}. {} ({answered}/{} answered)",
            index + 1,
            part.title,
            part.questions.len()
        );
    }
    list
}

pub(crate) fn part(content: &ExamContent, index: usize, answers: &AnswerMap) -> String {
    let Some(part) = content.parts.get(index) else {
        return format!("There is no part {}.", index + 1);
    };

    let mut out = String::new();
    let _ = writeln!(out, "Part {}/{}: {}", index + 1, content.parts.len(), part.title);
    if let Some(subtitle) = &part.subtitle {
        let _ = writeln!(out, "{subtitle}");
    }
    if let Some(description) = &part.description {
        let _ = writeln!(out, "\n{description}");
    }
    if let Some(text) = &part.reading_text {
        let _ = writeln!(out, "\n{}", render_gaps(text, answers));
    }
    write_ads(&mut out, part);
    write_word_bank(&mut out, part);
    if !part.options.is_empty() {
        let options: Vec<String> =
            part.options.iter().map(|option| format!("{}) {}", option.key, option.label)).collect();
        let _ = writeln!(out, "\nOptions: {}", options.join("   "));
    }

    let _ = writeln!(out);
    for question in &part.questions {
        let given = answers.get(&question.id).map(String::as_str).unwrap_or(UNANSWERED);
        let prompt = question.prompt.as_deref().or(question.text.as_deref()).unwrap_or_default();
        let _ = writeln!(out, "  [{}] {prompt}  -> {given}", question.id);
        if let (Some(_), Some(text)) = (&question.prompt, &question.text) {
            let _ = writeln!(out, "      {text}");
        }
        for choice in &question.choices {
            let _ = writeln!(out, "      {}) {}", choice.key, choice.label);
        }
    }
    out.trim_end().to_string()
}

fn write_ads(out: &mut String, part: &ExamPart) {
    if part.ads.is_empty() {
        return;
    }
    let _ = writeln!(out, "\nAds:");
    for ad in &part.ads {
        match &ad.title {
            Some(title) => {
                let _ = writeln!(out, "  {}) {title}: {}", ad.id, ad.text);
            }
            None => {
                let _ = writeln!(out, "  {}) {}", ad.id, ad.text);
            }
        }
    }
}

fn write_word_bank(out: &mut String, part: &ExamPart) {
    if part.word_bank.is_empty() {
        return;
    }
    let words: Vec<String> =
        part.word_bank.iter().map(|word| format!("{}) {}", word.key, word.word)).collect();
    let _ = writeln!(out, "\nWord bank: {}", words.join("   "));
}

/// Rewrites `__(21)__` gap markers (inner spaces allowed) as `[21: <answer>]`.
pub(crate) fn render_gaps(text: &str, answers: &AnswerMap) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(start) = rest.find("__(") {
        let after_open = &rest[start + 3..];
        let Some(end) = after_open.find(")__") else {
            break;
        };
        let question_id = after_open[..end].trim();
        if question_id.is_empty() || question_id.contains(char::is_whitespace) {
            out.push_str(&rest[..start + 3]);
            rest = after_open;
            continue;
        }

        out.push_str(&rest[..start]);
        let given = answers.get(question_id).map(String::as_str).unwrap_or(UNANSWERED);
        let _ = write!(out, "[{question_id}: {given}]");
        rest = &after_open[end + 3..];
    }

    out.push_str(rest);
    out
}

fn reason_label(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::ServerFinished => "closed by the proctor",
        FinishReason::TimeExpired => "time is up",
        FinishReason::StudentConfirmed => "handed in",
    }
}

pub(crate) fn submission_line(state: SubmissionState) -> &'static str {
    match state {
        SubmissionState::InFlight => "Sending your answers...",
        SubmissionState::Confirmed => "Your answers were received by the exam server.",
        SubmissionState::Queued => {
            "The exam server is unreachable. Your answers are saved and will be sent automatically."
        }
        SubmissionState::Failed => "The exam server refused the submission. Tell your proctor.",
    }
}

pub(crate) fn finished(view: &SessionView) -> String {
    let Some(outcome) = &view.outcome else {
        return "The exam is closed. No attempt was recorded for you.".to_string();
    };
    format!(
        "Exam finished ({}).\nScore: {} ({}%)\nTime: {}\n{}",
        reason_label(outcome.reason),
        outcome.score,
        outcome.score.percentage(),
        format_elapsed(outcome.time_taken),
        submission_line(outcome.submission)
    )
}

pub(crate) fn results(breakdown: &ResultsBreakdown) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Result: {} ({}%), {}",
        breakdown.score,
        breakdown.percentage,
        breakdown.level.label()
    );
    for (stats, (_, rows)) in breakdown.parts.iter().zip(&breakdown.review) {
        let _ = writeln!(
            out,
            "\n{}: {}/{} ({}%)",
            stats.title,
            stats.correct,
            stats.total,
            stats.percentage()
        );
        for row in rows {
            let mark = if row.correct { "ok" } else { "x " };
            let given = row.given.as_deref().unwrap_or("-");
            let _ = writeln!(
                out,
                "  {mark} [{}] yours: {given}  correct: {}",
                row.question_id, row.expected
            );
        }
    }
    out.trim_end().to_string()
}
