use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::db::{Db, StoreError};
use crate::error::{AppError, AppResult};
use crate::models::{
    initial_document, Deck, Flashcard, NewUser, SessionInput, StudySession, UserDocument,
};
use crate::reviews::{self, DashboardReminder, ReviewPlan, ReviewReminder};
use crate::srs::{self, DeckSummary, Quality};
use crate::stats::{self, PerformanceSummary};

/// Upcoming dashboard reminders listed before collapsing into a count.
pub const DASHBOARD_UPCOMING_LIMIT: usize = 5;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardInput {
    pub front: String,
    pub back: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedSession {
    pub session: StudySession,
    pub focus_alert: bool,
    pub version: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub performance: PerformanceSummary,
    pub due_reviews: Vec<DashboardReminder>,
    pub upcoming_reviews: Vec<DashboardReminder>,
    pub more_upcoming: usize,
}

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn required(field: &str, value: &str) -> AppResult<()> {
    if value.trim().is_empty() {
        return Err(AppError::InvalidInput(format!("{} must not be empty", field)));
    }
    Ok(())
}

fn parse_field<T: DeserializeOwned>(patch: &Map<String, Value>, key: &str) -> AppResult<Option<T>> {
    patch
        .get(key)
        .map(|value| {
            serde_json::from_value(value.clone())
                .map_err(|e| AppError::InvalidInput(format!("{}: {}", key, e)))
        })
        .transpose()
}

/// Raw patches may not put the fields the engines read into a shape they
/// cannot load.
fn check_modelled_fields(patch: &Map<String, Value>) -> AppResult<()> {
    if let Some(sessions) = parse_field::<Vec<StudySession>>(patch, "sessions")? {
        sessions.iter().try_for_each(StudySession::validate)?;
    }
    parse_field::<Vec<Deck>>(patch, "decks")?;
    if let Some(cards) = parse_field::<Vec<Flashcard>>(patch, "flashcards")? {
        cards.iter().try_for_each(srs::check_card)?;
    }
    Ok(())
}

/// Reads and writes a user's document on behalf of the scheduling engines.
///
/// Every mutation reads the document, changes one top-level field and writes
/// it back conditioned on the version it read, so concurrent writers cannot
/// silently overwrite each other.
pub struct App {
    pub db: Db,
}

impl App {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub async fn register(&self, user: NewUser, today: NaiveDate) -> AppResult<String> {
        required("name", &user.name)?;
        required("email", &user.email)?;
        let user_id = new_id();
        let initial =
            initial_document(&user, today).map_err(|e| AppError::InvalidInput(e.to_string()))?;
        self.db.create_document(&user_id, &initial).await?;
        Ok(user_id)
    }

    pub async fn document(&self, user_id: &str) -> AppResult<(UserDocument, i64)> {
        let stored = self.db.load(user_id).await?;
        let doc = serde_json::from_value(stored.data).map_err(StoreError::from)?;
        Ok((doc, stored.version))
    }

    async fn write<T: Serialize>(
        &self,
        user_id: &str,
        field: &str,
        value: &T,
        version: i64,
    ) -> AppResult<i64> {
        let mut patch = Map::new();
        patch.insert(field.to_string(), serde_json::to_value(value).map_err(StoreError::from)?);
        Ok(self.db.merge_update(user_id, patch, Some(version)).await?)
    }

    // Sessions

    pub async fn add_session(
        &self,
        user_id: &str,
        input: SessionInput,
        now: DateTime<Utc>,
    ) -> AppResult<RecordedSession> {
        required("subject", &input.subject)?;
        let session = StudySession::record(new_id(), input, now)?;
        let (mut doc, version) = self.document(user_id).await?;

        doc.sessions.push(session.clone());
        let version = self.write(user_id, "sessions", &doc.sessions, version).await?;

        log::info!("user {} recorded session {} ({:.0}%)", user_id, session.id, session.accuracy);
        Ok(RecordedSession {
            focus_alert: stats::needs_focus_alert(&session),
            session,
            version,
        })
    }

    pub async fn update_session(
        &self,
        user_id: &str,
        session_id: &str,
        input: SessionInput,
    ) -> AppResult<StudySession> {
        required("subject", &input.subject)?;
        let (mut doc, version) = self.document(user_id).await?;

        let slot = doc
            .sessions
            .iter_mut()
            .find(|s| s.id == session_id)
            .ok_or_else(|| AppError::not_found("session", session_id))?;
        *slot = slot.amend(input)?;
        let updated = slot.clone();

        self.write(user_id, "sessions", &doc.sessions, version).await?;
        Ok(updated)
    }

    pub async fn delete_session(&self, user_id: &str, session_id: &str) -> AppResult<()> {
        let (mut doc, version) = self.document(user_id).await?;
        let before = doc.sessions.len();
        doc.sessions.retain(|s| s.id != session_id);
        if doc.sessions.len() == before {
            return Err(AppError::not_found("session", session_id));
        }
        self.write(user_id, "sessions", &doc.sessions, version).await?;
        Ok(())
    }

    // Decks

    pub async fn add_deck(&self, user_id: &str, name: String) -> AppResult<Deck> {
        required("name", &name)?;
        let (mut doc, version) = self.document(user_id).await?;

        let deck = Deck { id: new_id(), name };
        doc.decks.push(deck.clone());
        self.write(user_id, "decks", &doc.decks, version).await?;
        Ok(deck)
    }

    pub async fn rename_deck(&self, user_id: &str, deck_id: &str, name: String) -> AppResult<Deck> {
        required("name", &name)?;
        let (mut doc, version) = self.document(user_id).await?;

        let deck = doc
            .decks
            .iter_mut()
            .find(|d| d.id == deck_id)
            .ok_or_else(|| AppError::not_found("deck", deck_id))?;
        deck.name = name;
        let renamed = deck.clone();

        self.write(user_id, "decks", &doc.decks, version).await?;
        Ok(renamed)
    }

    /// Deletes the deck and its cards, returning how many cards went with it.
    pub async fn delete_deck(&self, user_id: &str, deck_id: &str) -> AppResult<usize> {
        let (doc, version) = self.document(user_id).await?;
        if doc.find_deck(deck_id).is_none() {
            return Err(AppError::not_found("deck", deck_id));
        }

        let decks: Vec<&Deck> = doc.decks.iter().filter(|d| d.id != deck_id).collect();
        let cards: Vec<&Flashcard> =
            doc.flashcards.iter().filter(|c| c.deck_id != deck_id).collect();
        let removed = doc.flashcards.len() - cards.len();

        // Both fields in one write.
        let mut patch = Map::new();
        patch.insert("decks".to_string(), serde_json::to_value(&decks).map_err(StoreError::from)?);
        patch.insert(
            "flashcards".to_string(),
            serde_json::to_value(&cards).map_err(StoreError::from)?,
        );
        self.db.merge_update(user_id, patch, Some(version)).await?;

        log::info!("user {} deleted deck {} with {} cards", user_id, deck_id, removed);
        Ok(removed)
    }

    pub async fn deck_summaries(
        &self,
        user_id: &str,
        today: NaiveDate,
    ) -> AppResult<Vec<DeckSummary>> {
        let (doc, _) = self.document(user_id).await?;
        Ok(srs::summarize_decks(&doc.decks, &doc.flashcards, today))
    }

    // Flashcards

    pub async fn add_flashcard(
        &self,
        user_id: &str,
        deck_id: &str,
        input: CardInput,
        today: NaiveDate,
    ) -> AppResult<Flashcard> {
        required("front", &input.front)?;
        required("back", &input.back)?;
        let (mut doc, version) = self.document(user_id).await?;
        if doc.find_deck(deck_id).is_none() {
            return Err(AppError::not_found("deck", deck_id));
        }

        let card = Flashcard::new(new_id(), deck_id.to_string(), input.front, input.back, today);
        doc.flashcards.push(card.clone());
        self.write(user_id, "flashcards", &doc.flashcards, version).await?;
        Ok(card)
    }

    /// Changes the card's text; its scheduling state is left alone.
    pub async fn edit_flashcard(
        &self,
        user_id: &str,
        card_id: &str,
        input: CardInput,
    ) -> AppResult<Flashcard> {
        required("front", &input.front)?;
        required("back", &input.back)?;
        let (mut doc, version) = self.document(user_id).await?;

        let card = doc
            .flashcards
            .iter_mut()
            .find(|c| c.id == card_id)
            .ok_or_else(|| AppError::not_found("flashcard", card_id))?;
        card.front = input.front;
        card.back = input.back;
        let edited = card.clone();

        self.write(user_id, "flashcards", &doc.flashcards, version).await?;
        Ok(edited)
    }

    pub async fn delete_flashcard(&self, user_id: &str, card_id: &str) -> AppResult<()> {
        let (mut doc, version) = self.document(user_id).await?;
        let before = doc.flashcards.len();
        doc.flashcards.retain(|c| c.id != card_id);
        if doc.flashcards.len() == before {
            return Err(AppError::not_found("flashcard", card_id));
        }
        self.write(user_id, "flashcards", &doc.flashcards, version).await?;
        Ok(())
    }

    /// Applies one review to a card and persists its new schedule.
    pub async fn review_flashcard(
        &self,
        user_id: &str,
        card_id: &str,
        quality: Quality,
        today: NaiveDate,
    ) -> AppResult<Flashcard> {
        let (mut doc, version) = self.document(user_id).await?;

        let card = doc
            .flashcards
            .iter_mut()
            .find(|c| c.id == card_id)
            .ok_or_else(|| AppError::not_found("flashcard", card_id))?;
        *card = srs::schedule_next_review(card, quality, today)?;
        let reviewed = card.clone();

        self.write(user_id, "flashcards", &doc.flashcards, version).await?;
        log::info!(
            "user {} reviewed card {} q={} -> {} days",
            user_id,
            card_id,
            quality.value(),
            reviewed.interval
        );
        Ok(reviewed)
    }

    pub async fn due_flashcards(
        &self,
        user_id: &str,
        deck_id: &str,
        today: NaiveDate,
    ) -> AppResult<Vec<Flashcard>> {
        let (doc, _) = self.document(user_id).await?;
        if doc.find_deck(deck_id).is_none() {
            return Err(AppError::not_found("deck", deck_id));
        }
        Ok(doc.deck_cards(deck_id).filter(|c| srs::is_due(c, today)).cloned().collect())
    }

    // Read models

    pub async fn review_plan(&self, user_id: &str, today: NaiveDate) -> AppResult<ReviewPlan> {
        let (doc, _) = self.document(user_id).await?;
        Ok(reviews::review_plan(&doc.sessions, today)?)
    }

    pub async fn review_calendar(
        &self,
        user_id: &str,
    ) -> AppResult<BTreeMap<NaiveDate, Vec<ReviewReminder>>> {
        let (doc, _) = self.document(user_id).await?;
        Ok(reviews::reminders_by_date(&doc.sessions)?)
    }

    pub async fn reminders_on(
        &self,
        user_id: &str,
        date: NaiveDate,
    ) -> AppResult<Vec<ReviewReminder>> {
        let (doc, _) = self.document(user_id).await?;
        Ok(reviews::reminders_on(&doc.sessions, date)?)
    }

    pub async fn dashboard(
        &self,
        user_id: &str,
        subject: Option<&str>,
        today: NaiveDate,
    ) -> AppResult<Dashboard> {
        let (doc, _) = self.document(user_id).await?;
        let plan = reviews::dashboard_plan(&doc.sessions, today)?;

        let more_upcoming = plan.upcoming.len().saturating_sub(DASHBOARD_UPCOMING_LIMIT);
        let mut upcoming = plan.upcoming;
        upcoming.truncate(DASHBOARD_UPCOMING_LIMIT);

        Ok(Dashboard {
            performance: stats::summarize(&doc.sessions, subject),
            due_reviews: plan.due,
            upcoming_reviews: upcoming,
            more_upcoming,
        })
    }

    /// Merges a raw partial document, for clients that edit fields this
    /// service does not model (profile, goals, planner events, ...).
    pub async fn patch_document(
        &self,
        user_id: &str,
        patch: Value,
        expected_version: Option<i64>,
    ) -> AppResult<i64> {
        let patch = match patch {
            Value::Object(map) => map,
            _ => return Err(StoreError::InvalidPatch("update must be a JSON object").into()),
        };
        check_modelled_fields(&patch)?;
        Ok(self.db.merge_update(user_id, patch, expected_version).await?)
    }
}

#[cfg(test)]
#[path = "app_tests.rs"]
mod tests;
