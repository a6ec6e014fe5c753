//! Normalizes raw upstream responses into caller-visible results
//!
//! This is the single place where an HTTP status becomes a typed error. The
//! original status travels with the error so route handlers can hand the same
//! status back to the browser.

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::client::{Attempt, UpstreamResponse};
use crate::error::{Error, Result};

/// Standard upstream response envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T = serde_json::Value> {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Convert an upstream response into a parsed body.
///
/// - 204 yields `Ok(None)`
/// - other 2xx must carry JSON deserializable as `T`, else `MalformedResponse`
/// - non-success yields a typed error carrying the upstream status
pub fn translate<T: DeserializeOwned>(response: UpstreamResponse) -> Result<Option<T>> {
    let status = response.status;

    if status.is_success() {
        if status == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        return serde_json::from_slice(&response.body)
            .map(Some)
            .map_err(|e| Error::MalformedResponse(format!("{status} body is not valid JSON: {e}")));
    }

    let message = error_message(&response.body)
        .unwrap_or_else(|| format!("upstream request failed with status {}", status.as_u16()));

    if status != StatusCode::UNAUTHORIZED {
        return Err(Error::Upstream {
            status: status.as_u16(),
            message,
        });
    }
    Err(match response.attempt {
        Attempt::RefreshFailed => Error::RefreshExhausted(message),
        Attempt::Initial | Attempt::Retried => Error::Unauthorized(message),
    })
}

/// Best-effort human readable message from an error body.
///
/// Looks for a string `message`, then a string `error`.
fn error_message(body: &[u8]) -> Option<String> {
    let value: serde_json::Value = serde_json::from_slice(body).ok()?;
    ["message", "error"]
        .iter()
        .find_map(|key| value.get(key).and_then(|v| v.as_str()))
        .filter(|msg| !msg.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use reqwest::header::HeaderMap;

    fn response(status: u16, body: &'static str, attempt: Attempt) -> UpstreamResponse {
        UpstreamResponse {
            status: StatusCode::from_u16(status).unwrap(),
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
            attempt,
        }
    }

    #[test]
    fn success_parses_envelope() {
        let parsed: Envelope = translate(response(
            200,
            r#"{"code":"OK","data":{"name":"ada"}}"#,
            Attempt::Initial,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(parsed.code, "OK");
        assert_eq!(parsed.data.unwrap()["name"], "ada");
        assert!(parsed.message.is_none());
    }

    #[test]
    fn no_content_is_empty_not_error() {
        let parsed: Option<Envelope> =
            translate(response(204, "", Attempt::Initial)).unwrap();
        assert!(parsed.is_none());
    }

    #[test]
    fn malformed_success_body_is_distinct_error() {
        let err = translate::<Envelope>(response(200, "{\"code\":", Attempt::Initial))
            .unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)), "got: {err:?}");
    }

    #[test]
    fn error_message_comes_from_body() {
        let err = translate::<Envelope>(response(
            404,
            r#"{"message":"no such thing"}"#,
            Attempt::Initial,
        ))
        .unwrap_err();
        match err {
            Error::Upstream { status, message } => {
                assert_eq!(status, 404);
                assert_eq!(message, "no such thing");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[test]
    fn error_field_used_when_message_missing() {
        let err = translate::<Envelope>(response(
            400,
            r#"{"error":"Login failed"}"#,
            Attempt::Initial,
        ))
        .unwrap_err();
        assert!(err.to_string().contains("Login failed"));
    }

    #[test]
    fn unparsable_error_body_falls_back_to_status() {
        let err = translate::<Envelope>(response(502, "<html>bad gateway</html>", Attempt::Initial))
            .unwrap_err();
        match err {
            Error::Upstream { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "upstream request failed with status 502");
            }
            other => panic!("expected Upstream, got {other:?}"),
        }
    }

    #[test]
    fn unauthorized_after_retry_is_unauthorized() {
        let err = translate::<Envelope>(response(401, "{}", Attempt::Retried)).unwrap_err();
        assert!(matches!(err, Error::Unauthorized(_)), "got: {err:?}");
        assert_eq!(err.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn unauthorized_after_failed_refresh_is_exhausted() {
        let err = translate::<Envelope>(response(
            401,
            r#"{"message":"token expired"}"#,
            Attempt::RefreshFailed,
        ))
        .unwrap_err();
        assert!(matches!(err, Error::RefreshExhausted(_)), "got: {err:?}");
        assert!(err.to_string().contains("token expired"));
    }

    #[test]
    fn typed_payloads_deserialize() {
        #[derive(Deserialize)]
        struct Profile {
            email: String,
        }
        let parsed: Envelope<Profile> = translate(response(
            200,
            r#"{"code":"OK","data":{"email":"a@b.com"}}"#,
            Attempt::Retried,
        ))
        .unwrap()
        .unwrap();
        assert_eq!(parsed.data.unwrap().email, "a@b.com");
    }

    #[test]
    fn typed_envelope_without_data_is_none() {
        #[derive(Debug, Deserialize)]
        struct Profile {
            #[allow(dead_code)]
            email: String,
        }
        let parsed: Envelope<Profile> = translate(response(
            200,
            r#"{"code":"OK","message":"nothing to show"}"#,
            Attempt::Initial,
        ))
        .unwrap()
        .unwrap();
        assert!(parsed.data.is_none());
        assert_eq!(parsed.message.as_deref(), Some("nothing to show"));
    }
}
