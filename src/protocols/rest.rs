use std::time::Instant;

use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Body, Request, Response, StatusCode};
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::error::UpdateError;
use crate::middleware::observability::Metrics;
use crate::store::SharedTwinStore;
use crate::update::{require_store, update_desired};

const ROUTE: &str = "update_twin";

/// Handles one desired-properties update: credential check, body parsing, conditioned write.
pub async fn handle_update(
    req: Request<Body>,
    store: SharedTwinStore,
    metrics: Metrics,
) -> Result<Response<Body>, hyper::Error> {
    let span = info_span!("update_twin", invocation_id = %Uuid::new_v4());
    async move {
        let started = Instant::now();
        info!("update device twin triggered");

        let result = match require_store(&store) {
            Ok(store) => match hyper::body::to_bytes(req.into_body()).await {
                Ok(body) => update_desired(store.as_ref(), &body).await,
                Err(e) => Err(UpdateError::Body(e)),
            },
            Err(e) => Err(e),
        };

        let resp = match result {
            Ok(outcome) => text(StatusCode::OK, outcome.message()),
            Err(e) => {
                log_failure(&e);
                text(e.status(), e.response_body())
            }
        };

        metrics.inc_requests(ROUTE, resp.status());
        metrics.observe_latency(ROUTE, started.elapsed().as_secs_f64());
        Ok::<_, hyper::Error>(resp)
    }
    .instrument(span)
    .await
}

fn log_failure(e: &UpdateError) {
    match e {
        UpdateError::Configuration => error!("IOTHUB_CONNECTION_STRING is not set"),
        UpdateError::Validation(_) | UpdateError::Coercion(_) => {
            warn!(kind = e.kind(), error = %e, "rejected request")
        }
        UpdateError::Store(_) => error!(kind = e.kind(), error = %e, "twin update failed"),
        UpdateError::Body(_) => warn!(kind = e.kind(), error = %e, "request body unreadable"),
    }
}

pub fn text(status: StatusCode, msg: impl Into<String>) -> Response<Body> {
    let mut resp = Response::new(Body::from(msg.into()));
    *resp.status_mut() = status;
    resp.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    resp
}
