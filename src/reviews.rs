//! Topic review reminders derived from practice-session history.
//!
//! Two independent tier tables exist. The reviews view schedules up to three
//! steps per topic from the latest session on that topic; the dashboard
//! schedules one reminder per session. They are deliberately not unified.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::Serialize;

use crate::dates::{add_days, calendar_day, DueStatus};
use crate::models::{SessionError, StudySession};

/// Days after the session for each review step, by accuracy.
pub fn review_steps(accuracy: f64) -> &'static [i64] {
    if accuracy < 50.0 {
        &[2, 7, 15]
    } else if accuracy < 80.0 {
        &[7, 21]
    } else {
        &[30]
    }
}

/// Single reminder offset used by the dashboard summary.
pub fn dashboard_offset(accuracy: f64) -> i64 {
    if accuracy < 60.0 {
        1
    } else if accuracy < 80.0 {
        3
    } else if accuracy < 90.0 {
        7
    } else {
        30
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewReminder {
    pub id: String,
    pub session: StudySession,
    pub review_date: NaiveDate,
    pub review_step: usize,
    pub total_steps: usize,
}

impl ReviewReminder {
    pub fn status(&self, today: NaiveDate) -> DueStatus {
        DueStatus::classify(self.review_date, today)
    }

    /// "(2ª de 3 revisões)", empty for single-step schedules.
    pub fn step_label(&self) -> String {
        if self.total_steps > 1 {
            format!("({}ª de {} revisões)", self.review_step, self.total_steps)
        } else {
            String::new()
        }
    }

    pub fn tip(&self) -> &'static str {
        let accuracy = self.session.accuracy;
        let first = self.review_step == 1;
        if accuracy < 50.0 {
            if first {
                "Dica: Refaça a base! Releia a teoria com calma."
            } else {
                "Dica: Fixação! Tente explicar o tema em voz alta."
            }
        } else if accuracy < 80.0 {
            if first {
                "Dica: Pontos fracos. Refaça as questões que errou."
            } else {
                "Dica: Consolidação. Foque em velocidade e pegadinhas."
            }
        } else {
            "Dica: Manutenção. Leitura rápida de anotações."
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DashboardReminder {
    pub session: StudySession,
    pub review_date: NaiveDate,
}

/// Reminders split around today, each half ascending by date.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Partitioned<T> {
    pub due: Vec<T>,
    pub upcoming: Vec<T>,
}

pub type ReviewPlan = Partitioned<ReviewReminder>;
pub type DashboardPlan = Partitioned<DashboardReminder>;

trait Dated {
    fn date(&self) -> NaiveDate;
}

impl Dated for ReviewReminder {
    fn date(&self) -> NaiveDate {
        self.review_date
    }
}

impl Dated for DashboardReminder {
    fn date(&self) -> NaiveDate {
        self.review_date
    }
}

fn partition<T: Dated>(mut reminders: Vec<T>, today: NaiveDate) -> Partitioned<T> {
    // Stable: equal dates keep input order.
    reminders.sort_by_key(|r| r.date());
    let (due, upcoming): (Vec<T>, Vec<T>) = reminders.into_iter().partition(|r| r.date() <= today);
    Partitioned { due, upcoming }
}

fn validate_all(sessions: &[StudySession]) -> Result<(), SessionError> {
    sessions.iter().try_for_each(StudySession::validate)
}

/// Latest session per (subject, theme), in order of each topic's first
/// appearance. On equal dates the earlier entry wins.
pub fn latest_per_topic(sessions: &[StudySession]) -> Vec<&StudySession> {
    let mut slots: HashMap<(&str, &str), usize> = HashMap::new();
    let mut latest: Vec<&StudySession> = Vec::new();

    for session in sessions {
        let key = (session.subject.as_str(), session.topic_theme());
        match slots.get(&key) {
            Some(&slot) => {
                if session.date > latest[slot].date {
                    latest[slot] = session;
                }
            }
            None => {
                slots.insert(key, latest.len());
                latest.push(session);
            }
        }
    }
    latest
}

/// Every multi-step reminder, ascending by review date.
pub fn build_reminders(sessions: &[StudySession]) -> Result<Vec<ReviewReminder>, SessionError> {
    validate_all(sessions)?;

    let mut reminders = Vec::new();
    for session in latest_per_topic(sessions) {
        let steps = review_steps(session.accuracy);
        let base = calendar_day(&session.date);
        for (index, days) in steps.iter().enumerate() {
            reminders.push(ReviewReminder {
                id: format!("{}-review-{}", session.id, index),
                session: session.clone(),
                review_date: add_days(base, *days)?,
                review_step: index + 1,
                total_steps: steps.len(),
            });
        }
    }
    reminders.sort_by_key(|r| r.review_date);
    Ok(reminders)
}

pub fn review_plan(
    sessions: &[StudySession],
    today: NaiveDate,
) -> Result<ReviewPlan, SessionError> {
    Ok(partition(build_reminders(sessions)?, today))
}

/// Reminders keyed by review date, for a calendar view.
pub fn reminders_by_date(
    sessions: &[StudySession],
) -> Result<BTreeMap<NaiveDate, Vec<ReviewReminder>>, SessionError> {
    let mut by_date: BTreeMap<NaiveDate, Vec<ReviewReminder>> = BTreeMap::new();
    for reminder in build_reminders(sessions)? {
        by_date.entry(reminder.review_date).or_default().push(reminder);
    }
    Ok(by_date)
}

/// Reminders falling on one calendar day, in schedule order.
pub fn reminders_on(
    sessions: &[StudySession],
    date: NaiveDate,
) -> Result<Vec<ReviewReminder>, SessionError> {
    let mut reminders = build_reminders(sessions)?;
    reminders.retain(|r| r.review_date == date);
    Ok(reminders)
}

/// One reminder per session (no topic grouping), split around today.
pub fn dashboard_plan(
    sessions: &[StudySession],
    today: NaiveDate,
) -> Result<DashboardPlan, SessionError> {
    validate_all(sessions)?;

    let reminders = sessions
        .iter()
        .map(|session| -> Result<DashboardReminder, SessionError> {
            let review_date = add_days(calendar_day(&session.date), dashboard_offset(session.accuracy))?;
            Ok(DashboardReminder { session: session.clone(), review_date })
        })
        .collect::<Result<Vec<_>, _>>()?;
    Ok(partition(reminders, today))
}
