//! Remote quiz-state wire shapes and the normalization boundary.
//!
//! The server payload tolerates partially absent fields, so every field of
//! [`RemoteQuizState`] is optional. [`to_stored_quiz_result`] is the single
//! place where that shape becomes a canonical [`QuizResult`]; it returns
//! `None` when the minimum required field (`travelType.travelTypeCode`) is
//! missing.

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::{Place, QuizResult, TravelType};

/// `GET` response body: `{ "quizState": RemoteQuizState | null }`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizStateResponse {
    #[serde(default)]
    pub quiz_state: Option<RemoteQuizState>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteTravelType {
    #[serde(default)]
    pub travel_type_code: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub emoji: Option<String>,
    #[serde(default)]
    pub short_description: Option<String>,
    #[serde(default)]
    pub long_description: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemotePlace {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub place_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, alias = "formattedAddress")]
    pub address: Option<String>,
    #[serde(default, alias = "latitude")]
    pub lat: Option<f64>,
    #[serde(default, alias = "longitude")]
    pub lng: Option<f64>,
    #[serde(default)]
    pub category: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecommendation {
    #[serde(default)]
    pub places: Option<Vec<RemotePlace>>,
}

/// Server-held quiz state. Every field may be absent.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteQuizState {
    #[serde(default)]
    pub travel_type: Option<RemoteTravelType>,
    #[serde(default)]
    pub recommendation: Option<RemoteRecommendation>,
    #[serde(default)]
    pub answers: Option<serde_json::Value>,
    /// Epoch milliseconds.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// RFC 3339; used only when `timestamp` is absent.
    #[serde(default)]
    pub updated_at: Option<String>,
}

fn non_blank(s: Option<&String>) -> Option<String> {
    s.map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Every remote place survives normalization so the place count used by the
/// merge tie-break matches the server's. Entries without an id fall back to
/// their name, then to a positional id.
fn to_place(index: usize, p: &RemotePlace) -> Place {
    let name = non_blank(p.name.as_ref());
    let id = non_blank(p.id.as_ref())
        .or_else(|| non_blank(p.place_id.as_ref()))
        .or_else(|| name.clone())
        .unwrap_or_else(|| format!("place-{index}"));
    Place {
        name: name
            .or_else(|| non_blank(p.address.as_ref()))
            .unwrap_or_else(|| id.clone()),
        id,
        address: p.address.clone(),
        latitude: p.lat,
        longitude: p.lng,
        category: p.category.clone(),
    }
}

fn remote_timestamp(state: &RemoteQuizState) -> i64 {
    if let Some(ts) = state.timestamp {
        return ts;
    }
    state
        .updated_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.timestamp_millis())
        .unwrap_or(0)
}

/// Normalize a remote quiz state into a canonical [`QuizResult`].
///
/// Returns `None` when `travelType.travelTypeCode` is absent or blank.
pub fn to_stored_quiz_result(state: &RemoteQuizState) -> Option<QuizResult> {
    let tt = state.travel_type.as_ref()?;
    let code = non_blank(tt.travel_type_code.as_ref())?;

    let travel_type = TravelType {
        name: non_blank(tt.name.as_ref()).unwrap_or_else(|| code.clone()),
        code,
        emoji: tt.emoji.clone(),
        short_description: tt.short_description.clone(),
        long_description: tt.long_description.clone(),
    };

    let places = state
        .recommendation
        .as_ref()
        .and_then(|r| r.places.as_ref())
        .map(|ps| ps.iter().enumerate().map(|(i, p)| to_place(i, p)).collect())
        .unwrap_or_default();

    Some(QuizResult {
        travel_type: Some(travel_type),
        places,
        answers: state.answers.clone(),
        timestamp: remote_timestamp(state),
    })
}

// ---------------------------------------------------------------------------
// Push payload
// ---------------------------------------------------------------------------

/// `POST` body: normalized travel type plus answers and places.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    pub travel_type: RemoteTravelType,
    pub answers: Option<serde_json::Value>,
    pub places: Vec<Place>,
    pub timestamp: i64,
}

/// Build the push body. `None` for incomplete results; the server would
/// reject them anyway.
pub fn to_push_payload(result: &QuizResult) -> Option<PushPayload> {
    let tt = result.travel_type.as_ref().filter(|t| t.has_code())?;
    Some(PushPayload {
        travel_type: RemoteTravelType {
            travel_type_code: Some(tt.code.trim().to_string()),
            name: Some(tt.name.clone()),
            emoji: tt.emoji.clone(),
            short_description: tt.short_description.clone(),
            long_description: tt.long_description.clone(),
        },
        answers: result.answers.clone(),
        places: result.places.clone(),
        timestamp: result.timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode(raw: &str) -> QuizStateResponse {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn null_quiz_state_decodes() {
        let r = decode(r#"{"quizState":null}"#);
        assert!(r.quiz_state.is_none());
        let r = decode(r#"{}"#);
        assert!(r.quiz_state.is_none());
    }

    #[test]
    fn missing_code_normalizes_to_none() {
        let r = decode(r#"{"quizState":{"travelType":{"name":"Nameless"},"timestamp":10}}"#);
        assert_eq!(to_stored_quiz_result(r.quiz_state.as_ref().unwrap()), None);

        let r = decode(r#"{"quizState":{"travelType":{"travelTypeCode":"  "},"timestamp":10}}"#);
        assert_eq!(to_stored_quiz_result(r.quiz_state.as_ref().unwrap()), None);

        let r = decode(r#"{"quizState":{"timestamp":10}}"#);
        assert_eq!(to_stored_quiz_result(r.quiz_state.as_ref().unwrap()), None);
    }

    #[test]
    fn full_state_normalizes() {
        let r = decode(
            r#"{"quizState":{
                "travelType":{"travelTypeCode":"ADV02","name":"Explorer","emoji":"🧭"},
                "recommendation":{"places":[
                    {"placeId":"gp-1","name":"Lisbon","lat":38.7,"lng":-9.1},
                    {"name":"Porto"},
                    {"address":"nowhere"}
                ]},
                "answers":{"q1":"a"},
                "timestamp":2000
            }}"#,
        );
        let res = to_stored_quiz_result(r.quiz_state.as_ref().unwrap()).unwrap();
        assert_eq!(res.travel_type_code(), Some("ADV02"));
        assert_eq!(res.travel_type.as_ref().unwrap().emoji.as_deref(), Some("🧭"));
        assert_eq!(res.places.len(), 3);
        assert_eq!(res.places[0].id, "gp-1");
        assert_eq!(res.places[0].latitude, Some(38.7));
        assert_eq!(res.places[1].id, "Porto");
        assert_eq!(res.places[2].id, "place-2");
        assert_eq!(res.places[2].name, "nowhere");
        assert_eq!(res.answers, Some(serde_json::json!({"q1":"a"})));
        assert_eq!(res.timestamp, 2000);
    }

    #[test]
    fn name_defaults_to_code_and_updated_at_fallback() {
        let r = decode(
            r#"{"quizState":{
                "travelType":{"travelTypeCode":"CUL03"},
                "updatedAt":"2024-01-01T00:00:01Z"
            }}"#,
        );
        let res = to_stored_quiz_result(r.quiz_state.as_ref().unwrap()).unwrap();
        assert_eq!(res.travel_type.as_ref().unwrap().name, "CUL03");
        assert_eq!(res.timestamp, 1_704_067_201_000);
        assert!(res.places.is_empty());
    }

    #[test]
    fn place_count_matches_server_payload() {
        let r = decode(
            r#"{"quizState":{
                "travelType":{"travelTypeCode":"ADV02"},
                "recommendation":{"places":[{"name":"Lisbon"},{"address":"Rua X"},{}]},
                "timestamp":5
            }}"#,
        );
        let res = to_stored_quiz_result(r.quiz_state.as_ref().unwrap()).unwrap();
        assert_eq!(res.places.len(), 3);
        assert_eq!(res.places[0].id, "Lisbon");
        assert_eq!(res.places[1].name, "Rua X");
        assert_eq!(res.places[2].id, "place-2");
        assert_eq!(res.places[2].name, "place-2");
    }

    #[test]
    fn push_payload_requires_complete_result() {
        let incomplete = QuizResult::new(None, vec![], 1);
        assert!(to_push_payload(&incomplete).is_none());

        let complete = QuizResult::new(
            Some(TravelType::new("ADV01", "Adventurer")),
            vec![Place::new("p1", "Lisbon")],
            7,
        );
        let payload = to_push_payload(&complete).unwrap();
        let v = serde_json::to_value(&payload).unwrap();
        assert_eq!(v["travelType"]["travelTypeCode"], "ADV01");
        assert_eq!(v["places"][0]["id"], "p1");
        assert_eq!(v["timestamp"], 7);
    }
}
