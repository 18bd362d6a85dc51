use chrono::NaiveDate;
use serde::Serialize;

use crate::dates::calendar_day;
use crate::models::StudySession;

/// Accuracy below which a freshly recorded session suggests a focus block.
pub const FOCUS_ALERT_ACCURACY: f64 = 60.0;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SubjectAccuracy {
    pub subject: String,
    pub accuracy: f64,
}

/// One session's accuracy on the day it was recorded.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AccuracyPoint {
    pub date: NaiveDate,
    pub accuracy: f64,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSummary {
    pub total_sessions: usize,
    pub total_questions: i64,
    pub total_correct: i64,
    pub total_errors: i64,
    pub accuracy: f64,
    pub by_subject: Vec<SubjectAccuracy>,
    /// Weakest subjects first.
    pub focus_areas: Vec<SubjectAccuracy>,
    /// Selected sessions oldest first.
    pub trend: Vec<AccuracyPoint>,
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn percent(correct: i64, questions: i64) -> f64 {
    if questions > 0 {
        correct as f64 / questions as f64 * 100.0
    } else {
        0.0
    }
}

/// Totals over the sessions matching `subject` (all when `None`).
/// Per-subject figures always cover every session.
pub fn summarize(sessions: &[StudySession], subject: Option<&str>) -> PerformanceSummary {
    let selected: Vec<&StudySession> = sessions
        .iter()
        .filter(|s| subject.map_or(true, |wanted| s.subject == wanted))
        .collect();

    let total_questions: i64 = selected.iter().map(|s| s.questions).sum();
    let total_correct: i64 = selected.iter().map(|s| s.correct).sum();

    let mut subjects: Vec<(String, i64, i64)> = Vec::new();
    for session in sessions {
        match subjects.iter_mut().find(|(name, _, _)| *name == session.subject) {
            Some((_, questions, correct)) => {
                *questions += session.questions;
                *correct += session.correct;
            }
            None => subjects.push((session.subject.clone(), session.questions, session.correct)),
        }
    }
    let by_subject: Vec<SubjectAccuracy> = subjects
        .into_iter()
        .map(|(subject, questions, correct)| SubjectAccuracy {
            subject,
            accuracy: round1(percent(correct, questions)),
        })
        .collect();

    let mut chronological = selected.clone();
    chronological.sort_by_key(|s| s.date);
    let trend = chronological
        .iter()
        .map(|s| AccuracyPoint { date: calendar_day(&s.date), accuracy: s.accuracy })
        .collect();

    let mut focus_areas = by_subject.clone();
    focus_areas.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));

    PerformanceSummary {
        total_sessions: selected.len(),
        total_questions,
        total_correct,
        total_errors: total_questions - total_correct,
        accuracy: round1(percent(total_correct, total_questions)),
        by_subject,
        focus_areas,
        trend,
    }
}

pub fn needs_focus_alert(session: &StudySession) -> bool {
    session.accuracy < FOCUS_ALERT_ACCURACY
}
