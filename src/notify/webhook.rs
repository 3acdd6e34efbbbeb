//! HTTP webhook alert delivery.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use super::{Notifier, PostError, PostedRef};

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    in_reply_to: Option<&'a str>,
}

/// Posts alerts as JSON to a webhook, optionally threaded under a previous post.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    reply_to: Option<String>,
}

impl WebhookNotifier {
    pub fn new(
        url: &str,
        token: Option<String>,
        reply_to: Option<String>,
        timeout: Duration,
    ) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.to_string(),
            token,
            reply_to,
        })
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn post(&self, message: &str) -> Result<PostedRef, PostError> {
        let payload = WebhookPayload {
            text: message,
            in_reply_to: self.reply_to.as_deref(),
        };
        let mut request = self.client.post(&self.url).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(PostError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(parse_posted_ref(&body))
    }
}

/// Pull `id` and `url` out of a response body; non-JSON bodies give neither.
fn parse_posted_ref(body: &str) -> PostedRef {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        return PostedRef::default();
    };
    // Some APIs wrap the post in a "data" object.
    let post = value.get("data").unwrap_or(&value);
    let field = |name: &str| match post.get(name) {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };
    PostedRef {
        id: field("id"),
        url: field("url"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::State, http::HeaderMap, http::StatusCode, routing::post, Json, Router};
    use std::sync::{Arc, Mutex};

    type Seen = Arc<Mutex<Vec<(Option<String>, Value)>>>;

    async fn spawn_hook(status: StatusCode, reply: &'static str) -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route(
                "/hook",
                post(
                    move |State(seen): State<Seen>, headers: HeaderMap, Json(body): Json<Value>| async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_string);
                        seen.lock().unwrap().push((auth, body));
                        (status, reply)
                    },
                ),
            )
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{}/hook", addr), seen)
    }

    #[tokio::test]
    async fn test_posts_message_with_thread_and_token() {
        let (url, seen) = spawn_hook(StatusCode::OK, r#"{"id": 42, "url": "https://example.org/42"}"#).await;
        let notifier = WebhookNotifier::new(
            &url,
            Some("secret".to_string()),
            Some("1234".to_string()),
            Duration::from_secs(5),
        )
        .unwrap();

        let posted = notifier.post("Internet was down for 2m").await.unwrap();
        assert_eq!(posted.id.as_deref(), Some("42"));
        assert_eq!(posted.url.as_deref(), Some("https://example.org/42"));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0.as_deref(), Some("Bearer secret"));
        assert_eq!(seen[0].1["text"], "Internet was down for 2m");
        assert_eq!(seen[0].1["in_reply_to"], "1234");
    }

    #[tokio::test]
    async fn test_rejected_post_is_an_error() {
        let (url, _seen) = spawn_hook(StatusCode::FORBIDDEN, "nope").await;
        let notifier = WebhookNotifier::new(&url, None, None, Duration::from_secs(5)).unwrap();

        match notifier.post("hi").await {
            Err(PostError::Rejected { status, body }) => {
                assert_eq!(status, 403);
                assert_eq!(body, "nope");
            }
            other => panic!("unexpected result {:?}", other),
        }
    }

    #[test]
    fn test_parse_posted_ref() {
        assert_eq!(
            parse_posted_ref(r#"{"data": {"id": "99"}}"#),
            PostedRef {
                id: Some("99".to_string()),
                url: None
            }
        );
        assert_eq!(parse_posted_ref("ok"), PostedRef::default());
    }

    #[test]
    fn test_payload_omits_missing_thread() {
        let payload = WebhookPayload {
            text: "hi",
            in_reply_to: None,
        };
        assert_eq!(serde_json::to_string(&payload).unwrap(), r#"{"text":"hi"}"#);
    }
}
