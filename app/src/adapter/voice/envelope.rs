use std::collections::HashMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

const CARD_TITLE: &str = "My Room";

#[derive(Debug, Deserialize)]
pub struct RequestEnvelope {
    pub request: RequestBody,
}

#[derive(Debug, Deserialize)]
pub struct RequestBody {
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub kind: Request,
}

impl RequestBody {
    /// Requests without a timestamp never count as fresh.
    pub fn is_fresh(&self, now: DateTime<Utc>, tolerance: TimeDelta) -> bool {
        self.timestamp
            .is_some_and(|timestamp| (now - timestamp).abs() <= tolerance)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
    LaunchRequest,
    IntentRequest { intent: Intent },
    SessionEndedRequest,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
pub struct Intent {
    pub name: String,
    #[serde(default)]
    pub slots: HashMap<String, Slot>,
}

impl Intent {
    /// Slots the user actually filled, by name.
    pub fn slot_values(&self) -> HashMap<String, String> {
        self.slots
            .iter()
            .filter_map(|(name, slot)| slot.value.clone().map(|value| (name.clone(), value)))
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct Slot {
    #[serde(default)]
    pub value: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResponseEnvelope {
    version: &'static str,
    response: Response,
}

#[derive(Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    #[serde(skip_serializing_if = "Option::is_none")]
    output_speech: Option<OutputSpeech>,
    #[serde(skip_serializing_if = "Option::is_none")]
    card: Option<Card>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reprompt: Option<Reprompt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    should_end_session: Option<bool>,
}

#[derive(Debug, Serialize)]
struct OutputSpeech {
    #[serde(rename = "type")]
    kind: &'static str,
    ssml: String,
}

impl OutputSpeech {
    fn ssml(text: &str) -> Self {
        Self {
            kind: "SSML",
            ssml: format!("<speak>{}</speak>", text),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Reprompt {
    output_speech: OutputSpeech,
}

#[derive(Debug, Serialize)]
struct Card {
    #[serde(rename = "type")]
    kind: &'static str,
    title: &'static str,
    content: String,
}

impl ResponseEnvelope {
    pub fn empty() -> Self {
        Self {
            version: "1.0",
            response: Response::default(),
        }
    }

    /// Spoken answer with a card of the same text.
    pub fn speak(text: &str) -> Self {
        Self {
            version: "1.0",
            response: Response {
                output_speech: Some(OutputSpeech::ssml(text)),
                card: Some(Card {
                    kind: "Simple",
                    title: CARD_TITLE,
                    content: text.to_string(),
                }),
                ..Default::default()
            },
        }
    }

    /// Keeps the session open and asks again with the same text.
    pub fn with_reprompt(mut self, text: &str) -> Self {
        self.response.reprompt = Some(Reprompt {
            output_speech: OutputSpeech::ssml(text),
        });
        self.response.should_end_session = Some(false);
        self
    }

    pub fn end_session(mut self) -> Self {
        self.response.should_end_session = Some(true);
        self
    }

    /// Generic failure answer, without a card.
    pub fn not_recognized() -> Self {
        let mut envelope = Self::speak("Not recognized").end_session();
        envelope.response.card = None;
        envelope
    }
}
