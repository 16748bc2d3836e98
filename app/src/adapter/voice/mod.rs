mod envelope;

use actix_web::web::{self, Bytes};
use actix_web::{HttpResponse, Responder};
use chrono::{DateTime, TimeDelta, Utc};

use crate::home::Home;
use envelope::{Request, RequestEnvelope, ResponseEnvelope};

/// Largest clock difference accepted for a skill request, in seconds.
const TIMESTAMP_TOLERANCE_SECS: i64 = 150;

/// Alexa custom skill endpoint. Requests outside the timestamp tolerance are refused;
/// certificate signatures are checked by the proxy in front.
pub fn new_web_service(home: Home) -> actix_web::Scope {
    web::scope("")
        .route("/", web::post().to(handle_skill_request))
        .app_data(web::Data::new(home))
}

async fn handle_skill_request(home: web::Data<Home>, body: Bytes) -> impl Responder {
    match respond(&home, &body, Utc::now()) {
        Some(response) => HttpResponse::Ok().json(response),
        None => HttpResponse::BadRequest().finish(),
    }
}

/// Answer to a skill request, `None` if the request is refused as stale.
#[tracing::instrument(skip_all)]
fn respond(home: &Home, body: &[u8], now: DateTime<Utc>) -> Option<ResponseEnvelope> {
    let envelope: RequestEnvelope = match serde_json::from_slice(body) {
        Ok(envelope) => envelope,
        Err(e) => {
            tracing::warn!("Malformed skill request: {:?}", e);
            return Some(ResponseEnvelope::not_recognized());
        }
    };

    if !envelope
        .request
        .is_fresh(now, TimeDelta::seconds(TIMESTAMP_TOLERANCE_SECS))
    {
        tracing::warn!(
            "Refusing skill request with timestamp {:?} at {}",
            envelope.request.timestamp,
            now
        );
        return None;
    }

    let response = match envelope.request.kind {
        Request::LaunchRequest => {
            let text = "What do you need?";
            ResponseEnvelope::speak(text).with_reprompt(text)
        }

        Request::IntentRequest { intent } => {
            let slots = intent.slot_values();
            tracing::info!("Voice intent {} with slots {:?}", intent.name, slots);

            if let Some(scene) = home.match_voice_intent(&intent.name, &slots) {
                home.trigger_scene(&scene);
                return Some(ResponseEnvelope::speak("").end_session());
            }

            match intent.name.as_str() {
                "AMAZON.HelpIntent" => ResponseEnvelope::speak("Sorry, you're on your own!").end_session(),
                "AMAZON.CancelIntent" | "AMAZON.StopIntent" => ResponseEnvelope::speak("As you wish!").end_session(),
                _ => {
                    tracing::warn!("No scene for voice intent {}", intent.name);
                    ResponseEnvelope::not_recognized()
                }
            }
        }

        Request::SessionEndedRequest => ResponseEnvelope::empty(),

        Request::Other => {
            tracing::warn!("Unsupported skill request type");
            ResponseEnvelope::not_recognized()
        }
    };

    Some(response)
}
