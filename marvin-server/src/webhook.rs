use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::Response,
    routing::post,
    Router,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use marvin_core::{handle_comment, CommentEvent, CorrelationId, IssueRecord, User};

use crate::triage_loop::trigger_triage;
use crate::AppState;

const EVENT_HEADER: &str = "x-github-event";
const DELIVERY_HEADER: &str = "x-github-delivery";
const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// The subset of `issue_comment` and `pull_request_review_comment` payloads we act on.
#[derive(Debug, Deserialize)]
pub struct CommentPayload {
    pub action: Option<String>,
    pub comment: Comment,
    pub issue: Option<IssueRecord>,
    pub pull_request: Option<IssueRecord>,
    pub installation: Option<Installation>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Comment {
    pub id: u64,
    pub body: String,
    pub user: User,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Installation {
    pub id: u64,
}

/// Comment events we react to, keyed by the `X-GitHub-Event` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommentKind {
    IssueComment,
    ReviewComment,
}

impl CommentKind {
    pub fn from_event(event: &str) -> Option<Self> {
        match event {
            "issue_comment" => Some(CommentKind::IssueComment),
            "pull_request_review_comment" => Some(CommentKind::ReviewComment),
            _ => None,
        }
    }
}

impl CommentPayload {
    /// The issue or pull request the comment was left on.
    pub fn parent(&self, kind: CommentKind) -> Option<&IssueRecord> {
        match kind {
            CommentKind::IssueComment => self.issue.as_ref(),
            CommentKind::ReviewComment => self.pull_request.as_ref(),
        }
    }
}

type HmacSha256 = Hmac<Sha256>;

fn verify_github_signature(secret: &str, payload: &[u8], signature: &str) -> bool {
    let Some(signature_hex) = signature.strip_prefix("sha256=") else {
        return false;
    };

    let signature_bytes = match hex::decode(signature_hex) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };

    mac.update(payload);

    // Constant-time comparison
    mac.verify_slice(&signature_bytes).is_ok()
}

async fn verify_webhook_signature(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    let signature = parts
        .headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_github_signature(&state.webhook_secret, &bytes, signature) {
        error!("Invalid webhook signature");
        return Err(StatusCode::UNAUTHORIZED);
    }

    // GitHub's delivery id doubles as the correlation id for our outgoing calls.
    let correlation_id = parts
        .headers
        .get(DELIVERY_HEADER)
        .and_then(|h| h.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let mut request = Request::from_parts(parts, axum::body::Body::from(bytes));
    request.extensions_mut().insert(CorrelationId(correlation_id));

    Ok(next.run(request).await)
}

pub async fn github_webhook_handler(
    State(state): State<Arc<AppState>>,
    request: Request,
) -> StatusCode {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map(|id| id.0.clone())
        .unwrap_or_default();
    let event = request
        .headers()
        .get(EVENT_HEADER)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();

    let span = info_span!("webhook", event = %event, delivery = %correlation_id);
    async move {
        let Some(kind) = CommentKind::from_event(&event) else {
            info!("Ignoring {} event", event);
            return StatusCode::OK;
        };

        let bytes = match axum::body::to_bytes(request.into_body(), usize::MAX).await {
            Ok(bytes) => bytes,
            Err(_) => return StatusCode::BAD_REQUEST,
        };
        let payload: CommentPayload = match serde_json::from_slice(&bytes) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Unparseable {} payload: {}", event, e);
                return StatusCode::BAD_REQUEST;
            }
        };

        if payload.action.as_deref() != Some("created") {
            info!("Ignoring {:?} action", payload.action);
            return StatusCode::OK;
        }

        let (Some(issue), Some(installation)) = (payload.parent(kind), &payload.installation)
        else {
            warn!("Comment payload without parent or installation");
            return StatusCode::BAD_REQUEST;
        };

        info!(
            "Comment {} on #{} by {}",
            payload.comment.id, issue.number, payload.comment.user.login
        );

        let api = state
            .github_client
            .installation(installation.id)
            .with_correlation_id(correlation_id.clone());
        let comment = CommentEvent {
            body: &payload.comment.body,
            author: &payload.comment.user,
            issue,
        };

        match handle_comment(&api, &state.workflow, &comment).await {
            Ok(reaction) => {
                if reaction.triage_requested() {
                    tokio::spawn(trigger_triage(state.clone()));
                }
                StatusCode::OK
            }
            Err(e) => {
                error!("Failed to handle comment on #{}: {:#}", issue.number, e);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
    .instrument(span)
    .await
}

pub fn webhook_router(middleware_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route("/webhook", post(github_webhook_handler))
        .route_layer(middleware::from_fn_with_state(
            middleware_state,
            verify_webhook_signature,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::triage_loop::TriageRunner;
    use axum::body::Body;
    use marvin_core::{GitHubClient, RosterSelector, WorkflowConfig};
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt;

    const SECRET: &str = "It's a secret to everybody";

    fn sign(body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(SECRET.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn app() -> Router {
        let state = Arc::new(AppState {
            // Unusable key, so anything needing GitHub fails before sending a request.
            github_client: GitHubClient::with_api_base(1, "not a key".into(), "http://127.0.0.1:9")
                .unwrap(),
            workflow: WorkflowConfig::default(),
            selector: Arc::new(RosterSelector::default()),
            webhook_secret: SECRET.to_string(),
            triage: TriageRunner::new(Duration::from_secs(1)),
        });
        webhook_router(state.clone()).with_state(state)
    }

    fn issue_json(labels: &[&str]) -> serde_json::Value {
        json!({
            "id": 1,
            "number": 7,
            "title": "Fix the thing",
            "user": { "id": 100, "login": "author" },
            "labels": labels.iter().map(|l| json!({ "name": l })).collect::<Vec<_>>(),
            "created_at": "2020-06-01T12:00:00Z",
            "updated_at": "2020-06-01T12:00:00Z",
            "url": "https://api.github.com/repos/o/r/issues/7",
            "comments_url": "https://api.github.com/repos/o/r/issues/7/comments",
            "pull_request": { "url": "https://api.github.com/repos/o/r/pulls/7" }
        })
    }

    fn comment_payload(action: &str, login: &str, body: &str) -> serde_json::Value {
        json!({
            "action": action,
            "comment": { "id": 99, "body": body, "user": { "id": 200, "login": login } },
            "issue": issue_json(&[]),
            "installation": { "id": 5 }
        })
    }

    async fn deliver(event: &str, body: Vec<u8>, signature: Option<String>) -> StatusCode {
        let mut request = axum::http::Request::builder()
            .method("POST")
            .uri("/webhook")
            .header(EVENT_HEADER, event)
            .header(DELIVERY_HEADER, "delivery-1");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }
        let response = app()
            .oneshot(request.body(Body::from(body)).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[test]
    fn test_verify_github_signature() {
        let body = b"{\"zen\":\"Keep it logically awesome.\"}";
        assert!(verify_github_signature(SECRET, body, &sign(body)));
        assert!(!verify_github_signature("other", body, &sign(body)));
        assert!(!verify_github_signature(SECRET, b"tampered", &sign(body)));
        assert!(!verify_github_signature(SECRET, body, "sha1=abcdef"));
        assert!(!verify_github_signature(SECRET, body, "sha256=not-hex"));
    }

    #[test]
    fn test_comment_payload_parent() {
        let payload: CommentPayload =
            serde_json::from_value(comment_payload("created", "someone", "/status wip")).unwrap();
        assert_eq!(payload.comment.body, "/status wip");
        assert_eq!(
            payload.parent(CommentKind::IssueComment).map(|i| i.number),
            Some(7)
        );
        assert!(payload.parent(CommentKind::ReviewComment).is_none());

        let mut review = json!({
            "action": "created",
            "comment": { "id": 1, "body": "/status wip", "user": { "id": 2, "login": "x" } },
            "pull_request": issue_json(&["marvin"]),
            "installation": { "id": 5 }
        });
        review["pull_request"]["issue_url"] = json!("https://api.github.com/repos/o/r/issues/7");
        let payload: CommentPayload = serde_json::from_value(review).unwrap();
        let parent = payload.parent(CommentKind::ReviewComment).unwrap();
        assert_eq!(parent.labels_target(), "https://api.github.com/repos/o/r/issues/7");
    }

    #[test]
    fn test_comment_kind_from_event() {
        assert_eq!(
            CommentKind::from_event("issue_comment"),
            Some(CommentKind::IssueComment)
        );
        assert_eq!(
            CommentKind::from_event("pull_request_review_comment"),
            Some(CommentKind::ReviewComment)
        );
        assert_eq!(CommentKind::from_event("pull_request"), None);
    }

    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let body = b"{}".to_vec();
        assert_eq!(
            deliver("issue_comment", body, None).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_bad_signature_is_unauthorized() {
        let body = b"{}".to_vec();
        let signature = sign(b"something else");
        assert_eq!(
            deliver("issue_comment", body, Some(signature)).await,
            StatusCode::UNAUTHORIZED
        );
    }

    #[tokio::test]
    async fn test_unrelated_event_is_acknowledged() {
        let body = b"{\"zen\":\"Design for failure.\"}".to_vec();
        let signature = sign(&body);
        assert_eq!(deliver("ping", body, Some(signature)).await, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unparseable_comment_is_bad_request() {
        let body = b"{\"action\":\"created\"}".to_vec();
        let signature = sign(&body);
        assert_eq!(
            deliver("issue_comment", body, Some(signature)).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn test_edited_comment_is_ignored() {
        let body = serde_json::to_vec(&comment_payload("edited", "author", "/marvin opt-in"))
            .unwrap();
        let signature = sign(&body);
        assert_eq!(
            deliver("issue_comment", body, Some(signature)).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_own_comment_is_acknowledged() {
        let body = serde_json::to_vec(&comment_payload(
            "created",
            "marvin-mk2[bot]",
            "/marvin opt-in",
        ))
        .unwrap();
        let signature = sign(&body);
        assert_eq!(
            deliver("issue_comment", body, Some(signature)).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_comment_on_opted_out_pr_is_acknowledged() {
        let body =
            serde_json::to_vec(&comment_payload("created", "someone", "/status needs_work"))
                .unwrap();
        let signature = sign(&body);
        assert_eq!(
            deliver("issue_comment", body, Some(signature)).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn test_remote_failure_is_internal_error() {
        // The author opting in needs the (unreachable) API, so handling fails.
        let body = serde_json::to_vec(&json!({
            "action": "created",
            "comment": { "id": 99, "body": "/marvin opt-in", "user": { "id": 100, "login": "author" } },
            "issue": issue_json(&[]),
            "installation": { "id": 5 }
        }))
        .unwrap();
        let signature = sign(&body);
        assert_eq!(
            deliver("issue_comment", body, Some(signature)).await,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
