use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::dates::{add_days, DateOutOfRange};

/// Theme key used when a session has no theme.
pub const GENERAL_THEME: &str = "geral";

pub const INITIAL_EASE_FACTOR: f64 = 2.5;

#[derive(Debug, Error, PartialEq)]
pub enum SessionError {
    #[error("session {id}: questions must be positive, got {questions}")]
    NoQuestions { id: String, questions: i64 },
    #[error("session {id}: correct must be between 0 and {questions}, got {correct}")]
    CorrectOutOfRange { id: String, questions: i64, correct: i64 },
    #[error("session {id}: stored errors/accuracy do not match questions/correct")]
    Inconsistent { id: String },
    #[error(transparent)]
    Date(#[from] DateOutOfRange),
}

/// A scored block of practice questions on one topic.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StudySession {
    pub id: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<String>,
    // Signed so malformed stored values reach validation instead of
    // failing the whole document load.
    #[serde(default)]
    pub questions: i64,
    #[serde(default)]
    pub correct: i64,
    #[serde(default)]
    pub errors: i64,
    #[serde(default)]
    pub accuracy: f64,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// User-supplied fields of a session; everything else is derived.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInput {
    pub subject: String,
    #[serde(default)]
    pub theme: Option<String>,
    pub questions: i64,
    pub correct: i64,
    #[serde(default)]
    pub notes: Option<String>,
}

fn check_counts(id: &str, questions: i64, correct: i64) -> Result<(), SessionError> {
    if questions <= 0 {
        return Err(SessionError::NoQuestions { id: id.to_string(), questions });
    }
    if correct < 0 || correct > questions {
        return Err(SessionError::CorrectOutOfRange {
            id: id.to_string(),
            questions,
            correct,
        });
    }
    Ok(())
}

fn accuracy_of(questions: i64, correct: i64) -> f64 {
    correct as f64 / questions as f64 * 100.0
}

impl StudySession {
    /// Scores a new session, deriving `errors` and `accuracy`.
    pub fn record(
        id: String,
        input: SessionInput,
        date: DateTime<Utc>,
    ) -> Result<Self, SessionError> {
        check_counts(&id, input.questions, input.correct)?;
        Ok(Self {
            id,
            subject: input.subject,
            theme: input.theme,
            questions: input.questions,
            correct: input.correct,
            errors: input.questions - input.correct,
            accuracy: accuracy_of(input.questions, input.correct),
            date,
            notes: input.notes,
        })
    }

    /// Replaces the editable fields and re-derives the scores. Id and date stay.
    pub fn amend(&self, input: SessionInput) -> Result<Self, SessionError> {
        Self::record(self.id.clone(), input, self.date)
    }

    pub fn validate(&self) -> Result<(), SessionError> {
        check_counts(&self.id, self.questions, self.correct)?;
        let expected = accuracy_of(self.questions, self.correct);
        if self.errors != self.questions - self.correct || (self.accuracy - expected).abs() > 1e-6 {
            return Err(SessionError::Inconsistent { id: self.id.clone() });
        }
        Ok(())
    }

    /// Theme used for grouping; a missing or empty theme is the general topic.
    pub fn topic_theme(&self) -> &str {
        match self.theme.as_deref() {
            Some(theme) if !theme.is_empty() => theme,
            _ => GENERAL_THEME,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Flashcard {
    pub id: String,
    pub deck_id: String,
    pub front: String,
    pub back: String,
    pub repetition: u32,
    pub ease_factor: f64,
    pub interval: u32, // days
    pub due_date: NaiveDate,
}

impl Flashcard {
    pub fn new(id: String, deck_id: String, front: String, back: String, today: NaiveDate) -> Self {
        Self {
            id,
            deck_id,
            front,
            back,
            repetition: 0,
            ease_factor: INITIAL_EASE_FACTOR,
            interval: 0,
            due_date: today,
        }
    }
}

/// The per-user document. Fields the scheduler does not touch are carried
/// through untouched in `rest`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    #[serde(default)]
    pub sessions: Vec<StudySession>,
    #[serde(default)]
    pub decks: Vec<Deck>,
    #[serde(default)]
    pub flashcards: Vec<Flashcard>,
    #[serde(flatten)]
    pub rest: Map<String, Value>,
}

impl UserDocument {
    pub fn find_deck(&self, id: &str) -> Option<&Deck> {
        self.decks.iter().find(|d| d.id == id)
    }

    pub fn find_flashcard(&self, id: &str) -> Option<&Flashcard> {
        self.flashcards.iter().find(|c| c.id == id)
    }

    pub fn deck_cards<'a>(&'a self, deck_id: &'a str) -> impl Iterator<Item = &'a Flashcard> + 'a {
        self.flashcards.iter().filter(move |c| c.deck_id == deck_id)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewUser {
    pub name: String,
    pub email: String,
}

/// The document a freshly registered user starts with.
pub fn initial_document(user: &NewUser, today: NaiveDate) -> Result<Value, DateOutOfRange> {
    let goal = |name: &str, days: i64| -> Result<Value, DateOutOfRange> {
        Ok(json!({ "name": name, "date": add_days(today, days)? }))
    };
    let goals = vec![
        goal("Hospital Sírio-Libanês", 90)?,
        goal("Hospital Israelita Albert Einstein", 105)?,
        goal("Hospital das Clínicas da FMUSP", 120)?,
    ];

    Ok(json!({
        "profile": {
            "name": user.name,
            "email": user.email,
            "photoUrl": "https://avatar.iran.liara.run/public",
            "studyGoal": "Alcançar 85% de acertos em Ginecologia.",
            "residencyLocation": "Hospital das Clínicas - USP"
        },
        "sessions": [],
        "goals": goals,
        "events": [],
        "decks": [],
        "flashcards": [],
        "focusSessions": [],
        "portfolioItems": [],
        "studyPlanRotation": { "subject": null },
        "studyPlanProgress": {}
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn input(questions: i64, correct: i64) -> SessionInput {
        SessionInput {
            subject: "Cardiologia".to_string(),
            theme: Some("Arritmias".to_string()),
            questions,
            correct,
            notes: None,
        }
    }

    fn at(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, d, 14, 0, 0).unwrap()
    }

    #[test]
    fn test_record_derives_scores() {
        let session = StudySession::record("s1".into(), input(10, 3), at(1)).unwrap();
        assert_eq!(session.errors, 7);
        assert!((session.accuracy - 30.0).abs() < 1e-9);
        assert!(session.validate().is_ok());
    }

    #[test]
    fn test_record_rejects_bad_counts() {
        assert_eq!(
            StudySession::record("s1".into(), input(0, 0), at(1)),
            Err(SessionError::NoQuestions { id: "s1".into(), questions: 0 })
        );
        assert!(matches!(
            StudySession::record("s1".into(), input(10, 11), at(1)),
            Err(SessionError::CorrectOutOfRange { .. })
        ));
        assert!(matches!(
            StudySession::record("s1".into(), input(10, -1), at(1)),
            Err(SessionError::CorrectOutOfRange { .. })
        ));
    }

    #[test]
    fn test_amend_keeps_identity_and_rederives() {
        let session = StudySession::record("s1".into(), input(10, 3), at(1)).unwrap();
        let amended = session.amend(input(20, 15)).unwrap();
        assert_eq!(amended.id, "s1");
        assert_eq!(amended.date, at(1));
        assert_eq!(amended.errors, 5);
        assert!((amended.accuracy - 75.0).abs() < 1e-9);
    }

    #[test]
    fn test_validate_catches_stale_derived_fields() {
        let mut session = StudySession::record("s1".into(), input(10, 3), at(1)).unwrap();
        session.correct = 8;
        assert_eq!(session.validate(), Err(SessionError::Inconsistent { id: "s1".into() }));
    }

    #[test]
    fn test_missing_counts_deserialize_then_fail_validation() {
        let raw = json!({ "id": "legacy", "subject": "Pediatria", "date": "2024-05-01T10:00:00Z" });
        let session: StudySession = serde_json::from_value(raw).unwrap();
        assert!(matches!(session.validate(), Err(SessionError::NoQuestions { .. })));
    }

    #[test]
    fn test_topic_theme_defaults_to_general() {
        let mut session = StudySession::record("s1".into(), input(10, 3), at(1)).unwrap();
        assert_eq!(session.topic_theme(), "Arritmias");
        session.theme = Some(String::new());
        assert_eq!(session.topic_theme(), GENERAL_THEME);
        session.theme = None;
        assert_eq!(session.topic_theme(), GENERAL_THEME);
    }

    #[test]
    fn test_document_keeps_unknown_fields() {
        let raw = json!({
            "sessions": [],
            "profile": { "name": "Ana" },
            "events": [{ "id": "e1" }]
        });
        let doc: UserDocument = serde_json::from_value(raw).unwrap();
        assert!(doc.flashcards.is_empty());
        let back = serde_json::to_value(&doc).unwrap();
        assert_eq!(back["profile"]["name"], "Ana");
        assert_eq!(back["events"][0]["id"], "e1");
    }

    #[test]
    fn test_flashcard_wire_format() {
        let today = NaiveDate::from_ymd_opt(2024, 5, 10).unwrap();
        let card = Flashcard::new("c1".into(), "d1".into(), "Q".into(), "A".into(), today);
        let value = serde_json::to_value(&card).unwrap();
        assert_eq!(value["deckId"], "d1");
        assert_eq!(value["easeFactor"], 2.5);
        assert_eq!(value["dueDate"], "2024-05-10");
    }

    #[test]
    fn test_initial_document_goals() {
        let today = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let user = NewUser { name: "Ana".into(), email: "ana@example.com".into() };
        let doc = initial_document(&user, today).unwrap();
        assert_eq!(doc["profile"]["email"], "ana@example.com");
        assert_eq!(doc["goals"][0]["date"], "2024-03-31");
        assert_eq!(doc["goals"].as_array().unwrap().len(), 3);
        assert!(doc["studyPlanRotation"]["subject"].is_null());

        assert!(initial_document(&user, NaiveDate::MAX).is_err());
    }
}
