//! Ordered request-processing steps in front of a handler.
//!
//! Each protected route gets a [`Pipeline`]: a route key plus a list of
//! [`RequestStep`]s run in order. A step either lets the request continue
//! or short-circuits with its own response. Whatever response comes back,
//! from a step or from the handler, the pipeline attaches the rate limit
//! metadata recorded in the [`RequestContext`].

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::Response;
use tracing::{debug, instrument, Span};
use uuid::Uuid;

use super::response::{apply_rate_headers, X_REQUEST_ID};
use crate::ratelimit::Decision;

/// What a step wants done with the request.
pub enum Flow {
    /// Hand the request to the next step, or the handler
    Continue,
    /// Stop here and send this response
    Respond(Response),
}

/// State shared by the steps of one request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Key of the protected operation
    pub route_key: Arc<str>,
    /// Correlation id echoed as `x-request-id`
    pub request_id: Uuid,
    /// Rate limit decision, once a limiter step has run
    pub decision: Option<Decision>,
    /// Whether the decision should be exposed as headers
    pub send_rate_headers: bool,
}

impl RequestContext {
    pub fn new(route_key: Arc<str>) -> Self {
        Self {
            route_key,
            request_id: Uuid::new_v4(),
            decision: None,
            send_rate_headers: true,
        }
    }

    /// Attach the context's metadata to an outgoing response.
    pub fn finish(&self, mut response: Response) -> Response {
        let headers = response.headers_mut();

        if let (Some(decision), true) = (self.decision.as_ref(), self.send_rate_headers) {
            apply_rate_headers(headers, decision);
        }
        if let Ok(value) = HeaderValue::from_str(&self.request_id.to_string()) {
            headers.insert(X_REQUEST_ID, value);
        }

        response
    }
}

/// One stage of the request pipeline.
#[async_trait]
pub trait RequestStep: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Inspect or annotate the request, then continue or short-circuit.
    async fn on_request(&self, ctx: &mut RequestContext, request: &mut Request) -> Flow;
}

/// A route key bound to its ordered steps.
#[derive(Clone)]
pub struct Pipeline {
    route_key: Arc<str>,
    steps: Arc<[Arc<dyn RequestStep>]>,
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let steps: Vec<&str> = self.steps.iter().map(|s| s.name()).collect();
        f.debug_struct("Pipeline")
            .field("route_key", &self.route_key)
            .field("steps", &steps)
            .finish()
    }
}

impl Pipeline {
    /// Start building a pipeline for `route_key`.
    pub fn builder(route_key: impl Into<Arc<str>>) -> PipelineBuilder {
        PipelineBuilder {
            route_key: route_key.into(),
            steps: Vec::new(),
        }
    }

    /// Names of the steps, in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Run every step, then the handler unless a step responded.
    #[instrument(
        name = "pipeline",
        skip_all,
        fields(route = %self.route_key, request_id = tracing::field::Empty)
    )]
    pub async fn run(&self, mut request: Request, next: Next) -> Response {
        let mut ctx = RequestContext::new(self.route_key.clone());
        Span::current().record("request_id", tracing::field::display(ctx.request_id));

        for step in self.steps.iter() {
            if let Flow::Respond(response) = step.on_request(&mut ctx, &mut request).await {
                debug!(
                    step = step.name(),
                    status = response.status().as_u16(),
                    "Request short-circuited"
                );
                return ctx.finish(response);
            }
        }

        let response = next.run(request).await;
        ctx.finish(response)
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    route_key: Arc<str>,
    steps: Vec<Arc<dyn RequestStep>>,
}

impl PipelineBuilder {
    /// Append a step; steps run in the order they are added.
    pub fn step<S: RequestStep + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            route_key: self.route_key,
            steps: self.steps.into(),
        }
    }
}

/// Axum middleware entry point for a [`Pipeline`].
pub async fn run_pipeline(
    State(pipeline): State<Pipeline>,
    request: Request,
    next: Next,
) -> Response {
    pipeline.run(request, next).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;
    use parking_lot::Mutex;
    use tower::ServiceExt;

    struct Recorder {
        name: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
        respond: Option<StatusCode>,
    }

    #[async_trait]
    impl RequestStep for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn on_request(&self, ctx: &mut RequestContext, _request: &mut Request) -> Flow {
            self.log.lock().push(self.name);
            ctx.decision = Some(Decision {
                allowed: true,
                remaining: 4,
                limit: 5,
                reset_at: 60,
            });
            match self.respond {
                Some(status) => Flow::Respond(status.into_response()),
                None => Flow::Continue,
            }
        }
    }

    fn app(pipeline: Pipeline, log: Arc<Mutex<Vec<&'static str>>>) -> Router {
        let handler = move || {
            let log = log.clone();
            async move {
                log.lock().push("handler");
                "ok"
            }
        };
        Router::new().route(
            "/",
            get(handler).route_layer(axum::middleware::from_fn_with_state(pipeline, run_pipeline)),
        )
    }

    fn recorder(
        name: &'static str,
        log: &Arc<Mutex<Vec<&'static str>>>,
        respond: Option<StatusCode>,
    ) -> Recorder {
        Recorder {
            name,
            log: log.clone(),
            respond,
        }
    }

    #[tokio::test]
    async fn test_steps_run_in_order_then_handler() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder("index")
            .step(recorder("first", &log, None))
            .step(recorder("second", &log, None))
            .build();
        assert_eq!(pipeline.step_names(), vec!["first", "second"]);

        let response = app(pipeline, log.clone())
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(*log.lock(), vec!["first", "second", "handler"]);
        assert_eq!(response.headers()["x-ratelimit-remaining"], "4");
        assert!(response.headers().contains_key("x-request-id"));
    }

    #[tokio::test]
    async fn test_short_circuit_skips_rest_and_keeps_headers() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let pipeline = Pipeline::builder("index")
            .step(recorder("gate", &log, Some(StatusCode::TOO_MANY_REQUESTS)))
            .step(recorder("after", &log, None))
            .build();

        let response = app(pipeline, log.clone())
            .oneshot(HttpRequest::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(*log.lock(), vec!["gate"]);
        assert_eq!(response.headers()["x-ratelimit-limit"], "5");
    }

    #[test]
    fn test_finish_respects_send_headers() {
        let mut ctx = RequestContext::new(Arc::from("index"));
        ctx.decision = Some(Decision {
            allowed: true,
            remaining: 1,
            limit: 2,
            reset_at: 30,
        });
        ctx.send_rate_headers = false;

        let response = ctx.finish(StatusCode::OK.into_response());
        assert!(!response.headers().contains_key("x-ratelimit-limit"));
        assert!(response.headers().contains_key("x-request-id"));
    }
}
