use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dates::{add_days, DateOutOfRange};
use crate::models::{Deck, Flashcard};

pub const MIN_EASE_FACTOR: f64 = 1.3;
/// Longest gap between two reviews of a card, about a hundred years.
pub const MAX_INTERVAL_DAYS: u32 = 36500;

#[derive(Debug, Error, PartialEq)]
pub enum SrsError {
    #[error("quality must be between 0 and 5, got {0}")]
    QualityOutOfRange(u8),
    #[error("flashcard {id}: {reason}")]
    InvalidCard { id: String, reason: String },
    #[error(transparent)]
    Date(#[from] DateOutOfRange),
}

/// Self-assessed recall quality of a review.
///
/// 5 - Perfect response
/// 4 - Correct response after a hesitation
/// 3 - Correct response recalled with serious difficulty
/// 2 - Incorrect response; where the correct one seemed easy to recall
/// 1 - Incorrect response; the correct one remembered
/// 0 - Complete blackout.
///
/// Values above 5 are rejected, never clamped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quality(u8);

impl Quality {
    pub fn new(value: u8) -> Result<Self, SrsError> {
        if value > 5 {
            return Err(SrsError::QualityOutOfRange(value));
        }
        Ok(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_pass(self) -> bool {
        self.0 >= 3
    }
}

/// The four review buttons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Rating {
    /// "Errei"
    Again,
    /// "Difícil"
    Hard,
    /// "Bom"
    Good,
    /// "Fácil"
    Easy,
}

impl Rating {
    pub const ALL: [Rating; 4] = [Rating::Again, Rating::Hard, Rating::Good, Rating::Easy];

    pub fn quality(self) -> Quality {
        match self {
            Rating::Again => Quality(0),
            Rating::Hard => Quality(3),
            Rating::Good => Quality(4),
            Rating::Easy => Quality(5),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Rating::Again => "Errei",
            Rating::Hard => "Difícil",
            Rating::Good => "Bom",
            Rating::Easy => "Fácil",
        }
    }
}

/// Computes the card's next scheduling state after a review (SM-2).
///
/// The interval is grown with the ease factor the card had before this
/// review; the ease factor is then adjusted for every review, failed ones
/// included. Intervals stop growing at `MAX_INTERVAL_DAYS`.
pub fn schedule_next_review(
    card: &Flashcard,
    quality: Quality,
    today: NaiveDate,
) -> Result<Flashcard, SrsError> {
    let mut next = card.clone();

    if quality.is_pass() {
        next.interval = match card.repetition {
            0 => 1,
            1 => 6,
            _ => {
                let grown = (card.interval as f64 * card.ease_factor).round();
                grown.min(MAX_INTERVAL_DAYS as f64) as u32
            }
        };
        next.repetition = card.repetition.saturating_add(1);
    } else {
        next.repetition = 0;
        next.interval = 1;
    }

    // EF' = EF + (0.1 - (5 - q) * (0.08 + (5 - q) * 0.02))
    let miss = 5.0 - quality.value() as f64;
    let ease = card.ease_factor + (0.1 - miss * (0.08 + miss * 0.02));
    next.ease_factor = ease.max(MIN_EASE_FACTOR);

    next.due_date = add_days(today, next.interval as i64)?;
    Ok(next)
}

/// Rejects scheduling state the engine itself can never produce.
pub fn check_card(card: &Flashcard) -> Result<(), SrsError> {
    let reason = if !card.ease_factor.is_finite() || card.ease_factor < MIN_EASE_FACTOR {
        format!("ease factor must be a number of at least {}", MIN_EASE_FACTOR)
    } else if card.interval > MAX_INTERVAL_DAYS {
        format!("interval must be at most {} days", MAX_INTERVAL_DAYS)
    } else if card.repetition > MAX_INTERVAL_DAYS {
        format!("repetition must be at most {}", MAX_INTERVAL_DAYS)
    } else {
        return Ok(());
    };
    Err(SrsError::InvalidCard { id: card.id.clone(), reason })
}

pub fn is_due(card: &Flashcard, today: NaiveDate) -> bool {
    card.due_date <= today
}

/// Interval each review button would give, in `Rating::ALL` order.
pub fn preview_intervals(card: &Flashcard, today: NaiveDate) -> Result<[u32; 4], SrsError> {
    let mut intervals = [0; 4];
    for (slot, rating) in intervals.iter_mut().zip(Rating::ALL) {
        *slot = schedule_next_review(card, rating.quality(), today)?.interval;
    }
    Ok(intervals)
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeckSummary {
    pub deck_id: String,
    pub name: String,
    pub total_cards: usize,
    pub due_cards: usize,
}

pub fn summarize_decks(decks: &[Deck], cards: &[Flashcard], today: NaiveDate) -> Vec<DeckSummary> {
    decks
        .iter()
        .map(|deck| {
            let (total, due) = cards
                .iter()
                .filter(|c| c.deck_id == deck.id)
                .fold((0, 0), |(total, due), c| (total + 1, due + is_due(c, today) as usize));
            DeckSummary {
                deck_id: deck.id.clone(),
                name: deck.name.clone(),
                total_cards: total,
                due_cards: due,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 10).unwrap()
    }

    fn new_card() -> Flashcard {
        Flashcard::new("c1".into(), "d1".into(), "Front".into(), "Back".into(), today())
    }

    fn q(value: u8) -> Quality {
        Quality::new(value).unwrap()
    }

    #[test]
    fn test_pass_progression() {
        let first = schedule_next_review(&new_card(), q(4), today()).unwrap();
        assert_eq!(first.interval, 1);
        assert_eq!(first.repetition, 1);

        let second = schedule_next_review(&first, q(4), today()).unwrap();
        assert_eq!(second.interval, 6);
        assert_eq!(second.repetition, 2);

        let third = schedule_next_review(&second, q(4), today()).unwrap();
        assert_eq!(third.interval, (6.0 * second.ease_factor).round() as u32);
        assert_eq!(third.repetition, 3);
    }

    #[test]
    fn test_perfect_recall_after_second_step() {
        let mut card = new_card();
        card.repetition = 1;
        card.interval = 6;

        let next = schedule_next_review(&card, q(5), today()).unwrap();
        // Repetition 1 always gives 6 days; the ease factor still rises.
        assert_eq!(next.interval, 6);
        assert_eq!(next.repetition, 2);
        assert!((next.ease_factor - 2.6).abs() < 1e-9);

        card.repetition = 2;
        let grown = schedule_next_review(&card, q(5), today()).unwrap();
        // round(6 * 2.5) with the ease held before the review
        assert_eq!(grown.interval, 15);
        assert_eq!(grown.repetition, 3);
    }

    #[test]
    fn test_mature_card_uses_current_ease() {
        let mut card = new_card();
        card.repetition = 2;
        card.interval = 6;
        card.ease_factor = 2.6;

        let next = schedule_next_review(&card, q(5), today()).unwrap();
        assert_eq!(next.interval, 16);
        assert!((next.ease_factor - 2.7).abs() < 1e-9);
    }

    #[test]
    fn test_fail_resets_regardless_of_state() {
        let mut card = new_card();
        card.repetition = 7;
        card.interval = 120;
        card.ease_factor = 2.8;

        for quality in 0..3 {
            let next = schedule_next_review(&card, q(quality), today()).unwrap();
            assert_eq!(next.repetition, 0);
            assert_eq!(next.interval, 1);
            assert_eq!(next.due_date, NaiveDate::from_ymd_opt(2024, 5, 11).unwrap());
        }
    }

    #[test]
    fn test_fail_still_adjusts_ease() {
        let mut card = new_card();
        card.repetition = 3;
        card.interval = 15;

        let next = schedule_next_review(&card, q(0), today()).unwrap();
        // 2.5 + (0.1 - 5 * (0.08 + 5 * 0.02)) = 1.7
        assert!((next.ease_factor - 1.7).abs() < 1e-9);

        let next = schedule_next_review(&card, q(2), today()).unwrap();
        // 2.5 + (0.1 - 3 * (0.08 + 3 * 0.02)) = 2.18
        assert!((next.ease_factor - 2.18).abs() < 1e-9);
    }

    #[test]
    fn test_ease_never_below_floor() {
        let mut card = new_card();
        card.ease_factor = MIN_EASE_FACTOR;
        for quality in 0..=5 {
            for _ in 0..5 {
                card = schedule_next_review(&card, q(quality), today()).unwrap();
                assert!(card.ease_factor >= MIN_EASE_FACTOR);
            }
        }

        let mut card = new_card();
        for _ in 0..10 {
            card = schedule_next_review(&card, q(0), today()).unwrap();
        }
        assert_eq!(card.ease_factor, MIN_EASE_FACTOR);
    }

    #[test]
    fn test_due_date_follows_interval() {
        let mut card = new_card();
        for quality in [4, 5, 3, 4, 1, 4, 5] {
            card = schedule_next_review(&card, q(quality), today()).unwrap();
            assert_eq!(card.due_date, add_days(today(), card.interval as i64).unwrap());
        }
    }

    #[test]
    fn test_long_easy_streak_stays_on_the_calendar() {
        let mut card = new_card();
        for _ in 0..40 {
            let next = schedule_next_review(&card, q(5), today()).unwrap();
            assert!(next.interval >= card.interval);
            assert!(next.interval <= MAX_INTERVAL_DAYS);
            card = next;
        }
        assert_eq!(card.interval, MAX_INTERVAL_DAYS);
        assert_eq!(card.repetition, 40);
        assert_eq!(card.due_date, add_days(today(), MAX_INTERVAL_DAYS as i64).unwrap());
    }

    #[test]
    fn test_extreme_stored_state_does_not_overflow() {
        let mut card = new_card();
        card.repetition = u32::MAX;
        card.interval = MAX_INTERVAL_DAYS;
        card.ease_factor = 1e12;

        let next = schedule_next_review(&card, q(5), today()).unwrap();
        assert_eq!(next.repetition, u32::MAX);
        assert_eq!(next.interval, MAX_INTERVAL_DAYS);
    }

    #[test]
    fn test_review_at_calendar_end_is_an_error() {
        let card = new_card();
        let err = schedule_next_review(&card, q(4), NaiveDate::MAX).unwrap_err();
        assert!(matches!(err, SrsError::Date(_)));
        assert!(preview_intervals(&card, NaiveDate::MAX).is_err());
    }

    #[test]
    fn test_check_card_bounds() {
        let card = new_card();
        assert_eq!(check_card(&card), Ok(()));

        let mut at_cap = new_card();
        at_cap.interval = MAX_INTERVAL_DAYS;
        assert_eq!(check_card(&at_cap), Ok(()));

        let mut low_ease = new_card();
        low_ease.ease_factor = 1.2;
        let mut long = new_card();
        long.interval = MAX_INTERVAL_DAYS + 1;
        let mut many = new_card();
        many.repetition = u32::MAX;
        for bad in [low_ease, long, many] {
            assert!(matches!(check_card(&bad), Err(SrsError::InvalidCard { ref id, .. }) if id == "c1"));
        }
    }

    #[test]
    fn test_content_untouched() {
        let card = new_card();
        let next = schedule_next_review(&card, q(4), today()).unwrap();
        assert_eq!(next.id, card.id);
        assert_eq!(next.deck_id, card.deck_id);
        assert_eq!(next.front, card.front);
        assert_eq!(next.back, card.back);
    }

    #[test]
    fn test_quality_above_five_is_rejected() {
        assert_eq!(Quality::new(6), Err(SrsError::QualityOutOfRange(6)));
        assert_eq!(Quality::new(255), Err(SrsError::QualityOutOfRange(255)));
        assert_eq!(Quality::new(5).map(Quality::value), Ok(5));
        assert_eq!(Quality::new(0).map(Quality::value), Ok(0));
    }

    #[test]
    fn test_rating_mapping() {
        let values: Vec<u8> = Rating::ALL.iter().map(|r| r.quality().value()).collect();
        assert_eq!(values, vec![0, 3, 4, 5]);
        assert_eq!(Rating::Hard.label(), "Difícil");
    }

    #[test]
    fn test_preview_intervals() {
        let mut card = new_card();
        card.repetition = 2;
        card.interval = 10;
        assert_eq!(preview_intervals(&card, today()), Ok([1, 25, 25, 25]));
        assert_eq!(preview_intervals(&new_card(), today()), Ok([1, 1, 1, 1]));
    }

    #[test]
    fn test_deck_summary_counts_due() {
        let decks = vec![
            Deck { id: "d1".into(), name: "Cardio".into() },
            Deck { id: "d2".into(), name: "Pediatria".into() },
        ];
        let fresh = new_card();
        let later = schedule_next_review(&fresh, q(4), today()).unwrap();
        let mut other = new_card();
        other.deck_id = "d2".into();

        let summary = summarize_decks(&decks, &[fresh, later, other], today());
        assert_eq!(summary[0].total_cards, 2);
        assert_eq!(summary[0].due_cards, 1);
        assert_eq!(summary[1].total_cards, 1);
        assert_eq!(summary[1].due_cards, 1);
    }
}
