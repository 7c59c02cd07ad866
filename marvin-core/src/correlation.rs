//! Correlation IDs for outgoing GitHub requests.

use http::Extensions;
use reqwest::{Request, Response};
use reqwest_middleware::{Middleware, Next, Result as MiddlewareResult};
use std::time::Instant;
use tracing::debug;
use uuid::Uuid;

// Header name for correlation ID propagation
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Correlation ID carried in request extensions, e.g. from an inbound webhook.
#[derive(Clone, Debug)]
pub struct CorrelationId(pub String);

/// Tags every request with a correlation ID and logs its outcome.
pub struct CorrelationMiddleware;

#[async_trait::async_trait]
impl Middleware for CorrelationMiddleware {
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut Extensions,
        next: Next<'_>,
    ) -> MiddlewareResult<Response> {
        if !req.headers().contains_key(CORRELATION_ID_HEADER) {
            let correlation_id = extensions
                .get::<CorrelationId>()
                .map(|id| id.0.clone())
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            // A uuid or an id we minted ourselves is always a valid header value.
            if let Ok(value) = correlation_id.parse() {
                req.headers_mut().insert(CORRELATION_ID_HEADER, value);
            }
        }

        let method = req.method().clone();
        let url = req.url().clone();
        let started = Instant::now();

        let response = next.run(req, extensions).await;

        match &response {
            Ok(resp) => debug!(
                "{} {} -> {} ({} ms)",
                method,
                url,
                resp.status(),
                started.elapsed().as_millis()
            ),
            Err(e) => debug!("{} {} failed: {}", method, url, e),
        }

        response
    }
}
