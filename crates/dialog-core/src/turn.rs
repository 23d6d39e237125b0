//! Rule-based turn analyzer
//!
//! Classifies a caller utterance relative to the kind of reply the
//! assistant's last question expects: a direct answer, a correction, a
//! yes/no confirmation, or noise. The tool router uses the classification
//! to reconcile model tool-call arguments before they reach the engine, so
//! a transcription like "yes please" still confirms a booking even when
//! the model forgot to set the intent.
//!
//! The contract deliberately permits swapping this for a small auxiliary
//! model later; everything downstream only sees [`TurnAssessment`].

use crate::engine::Stage;

/// How a caller utterance relates to the assistant's last question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnRelationship {
    /// The utterance answers the question asked
    DirectAnswer,
    /// The utterance corrects something previously given
    Correction,
    /// The utterance is an affirmative confirmation
    ConfirmationYes,
    /// The utterance is a negative confirmation
    ConfirmationNo,
    /// The utterance has nothing to do with the question
    Irrelevant,
    /// The utterance could not be classified
    Unclear,
}

/// The kind of reply the assistant's last question expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedReply {
    /// A pickup address
    Pickup,
    /// A destination address
    Destination,
    /// A passenger count
    Passengers,
    /// A pickup time
    PickupTime,
    /// A yes or no
    ConfirmationYesNo,
    /// No question is outstanding
    None,
}

impl ExpectedReply {
    /// Map the engine stage to the reply its question expects
    pub fn from_stage(stage: Stage) -> Self {
        match stage {
            Stage::CollectPickup | Stage::GeocodingPickup => ExpectedReply::Pickup,
            Stage::CollectDropoff | Stage::GeocodingDropoff => ExpectedReply::Destination,
            Stage::CollectPassengers => ExpectedReply::Passengers,
            Stage::CollectTime => ExpectedReply::PickupTime,
            Stage::ConfirmDetails => ExpectedReply::ConfirmationYesNo,
            _ => ExpectedReply::None,
        }
    }

    /// Booking slot field name this reply kind fills, if any
    pub fn slot_name(&self) -> Option<&'static str> {
        match self {
            ExpectedReply::Pickup => Some("pickup"),
            ExpectedReply::Destination => Some("destination"),
            ExpectedReply::Passengers => Some("passengers"),
            ExpectedReply::PickupTime => Some("pickup_time"),
            ExpectedReply::ConfirmationYesNo | ExpectedReply::None => None,
        }
    }
}

/// Result of analyzing one caller turn
#[derive(Debug, Clone, PartialEq)]
pub struct TurnAssessment {
    /// Classification of the utterance
    pub relationship: TurnRelationship,
    /// Slot field the utterance addresses, if identifiable
    pub slot: Option<String>,
    /// Value the utterance supplies for that slot
    pub value: Option<String>,
    /// Classifier confidence in [0, 1]
    pub confidence: f32,
}

impl TurnAssessment {
    fn new(relationship: TurnRelationship, confidence: f32) -> Self {
        Self {
            relationship,
            slot: None,
            value: None,
            confidence,
        }
    }

    fn with_slot(mut self, slot: &str, value: String) -> Self {
        self.slot = Some(slot.to_string());
        self.value = Some(value);
        self
    }
}

const YES_MARKERS: &[&str] = &[
    "yes", "yeah", "yep", "yup", "correct", "that's right", "thats right", "that is right",
    "sure", "aye", "perfect", "sounds good", "all good", "go ahead", "confirm",
];

const NO_MARKERS: &[&str] = &[
    "no", "nope", "nah", "that's wrong", "thats wrong", "not right", "incorrect", "not quite",
];

const CORRECTION_MARKERS: &[&str] = &["actually", "i said", "i meant", "sorry,", "change that"];

const ASAP_MARKERS: &[&str] = &[
    "asap", "right away", "straight away", "as soon as possible", "right now", "immediately",
];

const ADDRESS_MARKERS: &[&str] = &[
    "road", "street", "lane", "avenue", "drive", "close", "station", "airport", "hospital",
    "hotel", "square", "terrace", "court", "way", "crescent",
];

const NUMBER_WORDS: &[(&str, i64)] = &[
    ("one", 1),
    ("two", 2),
    ("three", 3),
    ("four", 4),
    ("five", 5),
    ("six", 6),
    ("seven", 7),
    ("eight", 8),
    ("just me", 1),
    ("only me", 1),
    ("myself", 1),
    ("a couple", 2),
];

/// Rule-based classifier over lowercased caller transcripts
#[derive(Debug, Default, Clone)]
pub struct TurnAnalyzer;

impl TurnAnalyzer {
    /// Create an analyzer
    pub fn new() -> Self {
        Self
    }

    /// Classify `utterance` against the question that expects `expected`.
    ///
    /// The rule set classifies from `expected` and the utterance text
    /// alone; the question wording itself is not consulted. The parameter
    /// stays in the signature so a model-backed analyzer can drop in
    /// behind the same call, and callers should keep passing the real
    /// question text.
    pub fn analyze(
        &self,
        _question: &str,
        expected: ExpectedReply,
        utterance: &str,
    ) -> TurnAssessment {
        let text = utterance.trim().to_ascii_lowercase();
        if text.is_empty() {
            return TurnAssessment::new(TurnRelationship::Unclear, 0.0);
        }

        // Yes/no first: a bare "yes" answers a confirmation and nothing else
        if expected == ExpectedReply::ConfirmationYesNo {
            if starts_with_any(&text, NO_MARKERS) {
                return TurnAssessment::new(TurnRelationship::ConfirmationNo, 0.9);
            }
            if contains_any(&text, YES_MARKERS) {
                return TurnAssessment::new(TurnRelationship::ConfirmationYes, 0.9);
            }
        }

        // Corrections: "no, 14 Spire View", "actually make it three"
        if let Some(corrected) = correction_remainder(&text) {
            if let Some(slot) = expected.slot_name() {
                if !corrected.is_empty() {
                    return TurnAssessment::new(TurnRelationship::Correction, 0.7)
                        .with_slot(slot, corrected);
                }
            }
            return TurnAssessment::new(TurnRelationship::Correction, 0.5);
        }

        match expected {
            ExpectedReply::Passengers => {
                if let Some(count) = extract_count(&text) {
                    return TurnAssessment::new(TurnRelationship::DirectAnswer, 0.85)
                        .with_slot("passengers", count.to_string());
                }
                TurnAssessment::new(TurnRelationship::Irrelevant, 0.4)
            }
            ExpectedReply::PickupTime => {
                if contains_any(&text, ASAP_MARKERS) {
                    return TurnAssessment::new(TurnRelationship::DirectAnswer, 0.85)
                        .with_slot("pickup_time", "ASAP".to_string());
                }
                if text.contains(':') || text.contains("o'clock") || text.contains("half past") {
                    return TurnAssessment::new(TurnRelationship::DirectAnswer, 0.6)
                        .with_slot("pickup_time", utterance.trim().to_string());
                }
                TurnAssessment::new(TurnRelationship::Irrelevant, 0.4)
            }
            ExpectedReply::Pickup | ExpectedReply::Destination => {
                if looks_like_address(&text) {
                    let slot = expected.slot_name().unwrap_or("pickup");
                    return TurnAssessment::new(TurnRelationship::DirectAnswer, 0.6)
                        .with_slot(slot, utterance.trim().to_string());
                }
                TurnAssessment::new(TurnRelationship::Irrelevant, 0.4)
            }
            ExpectedReply::ConfirmationYesNo => {
                TurnAssessment::new(TurnRelationship::Unclear, 0.3)
            }
            ExpectedReply::None => TurnAssessment::new(TurnRelationship::Irrelevant, 0.4),
        }
    }
}

fn contains_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.contains(m))
}

fn starts_with_any(text: &str, markers: &[&str]) -> bool {
    markers.iter().any(|m| text.starts_with(m))
}

/// If the text opens with a correction cue, return what follows it
fn correction_remainder(text: &str) -> Option<String> {
    if let Some(rest) = text.strip_prefix("no,") {
        return Some(rest.trim().to_string());
    }
    if let Some(rest) = text.strip_prefix("no ") {
        // "no 14 spire view" corrects; a bare "no" does not reach here
        if !rest.trim().is_empty() && !starts_with_any(rest.trim(), &["thanks", "thank you"]) {
            return Some(rest.trim().to_string());
        }
    }
    for marker in CORRECTION_MARKERS {
        if let Some(idx) = text.find(marker) {
            let rest = text[idx + marker.len()..].trim();
            return Some(rest.trim_start_matches("it's").trim().to_string());
        }
    }
    None
}

/// Extract a 1..=8 passenger count from digits or number words
fn extract_count(text: &str) -> Option<i64> {
    for token in text.split(|c: char| !c.is_ascii_digit()) {
        if token.is_empty() {
            continue;
        }
        if let Ok(n) = token.parse::<i64>() {
            if (1..=8).contains(&n) {
                return Some(n);
            }
        }
    }
    for (word, value) in NUMBER_WORDS {
        if text.contains(word) {
            return Some(*value);
        }
    }
    None
}

/// Cheap address heuristic: a house number or a street/place word
fn looks_like_address(text: &str) -> bool {
    let has_digit = text.chars().any(|c| c.is_ascii_digit());
    has_digit || contains_any(text, ADDRESS_MARKERS)
}
