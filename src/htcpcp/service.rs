//! HTCPCP request handling on top of the teapot.

use std::sync::Arc;

use bytes::Bytes;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::Body;
use hyper::header::{ALLOW, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use super::request::{
    alternates, BrewAction, MessageType, PotMethod, Target, ALLOWED_METHODS, ALTERNATES,
};
use crate::brewing::{BrewError, ClientId, Teapot};

/// Largest control message body accepted.
const MAX_BODY_BYTES: usize = 1024;

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const APPLICATION_JSON: &str = "application/json";

/// Translates HTCPCP requests into teapot operations and teapot results into
/// HTTP responses.
#[derive(Debug, Clone)]
pub struct HtcpcpService {
    teapot: Arc<Teapot>,
    alternates: Arc<str>,
}

impl HtcpcpService {
    pub fn new(teapot: Arc<Teapot>) -> Self {
        let alternates = Arc::from(alternates(teapot.menu()));
        Self { teapot, alternates }
    }

    /// Handle a single request from `client`.
    #[instrument(
        skip(self, request, client),
        fields(
            method = %request.method(),
            path = %request.uri().path(),
            client = %client
        )
    )]
    pub async fn handle<B>(&self, request: Request<B>, client: ClientId) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let Some(method) = PotMethod::from_method(request.method()) else {
            debug!("Rejected method");
            return self.method_not_allowed();
        };

        let path = request.uri().path().to_string();
        let response = match (method, Target::from_path(&path)) {
            (PotMethod::Brew, Target::Pot) => self.choices(),
            (PotMethod::Brew, Target::Variant(variant)) => {
                self.brew(request, &client, variant).await
            }
            (PotMethod::Propfind, Target::Pot) => self.json(&self.teapot.pots(&client)),
            (PotMethod::Propfind, Target::Variant(variant)) => {
                match self.teapot.status(&client, variant) {
                    Ok(status) => self.json(&status),
                    Err(err) => self.brew_error(&err),
                }
            }
        };

        info!(status = response.status().as_u16(), "Request handled");
        response
    }

    async fn brew<B>(&self, request: Request<B>, client: &ClientId, variant: &str) -> Response<Full<Bytes>>
    where
        B: Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.teapot.menu().get(variant).is_none() {
            return self.brew_error(&BrewError::UnknownResource(variant.to_string()));
        }

        match MessageType::from_headers(request.headers()) {
            MessageType::Tea => {}
            MessageType::Coffee => {
                return self.text(
                    StatusCode::IM_A_TEAPOT,
                    format!("I'm a teapot, \"{}\" is tea", variant),
                );
            }
            MessageType::Other(content_type) => {
                return self.text(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    format!("Expected Content-Type message/teapot, got {}", content_type),
                );
            }
            MessageType::Missing => {
                return self.text(
                    StatusCode::UNSUPPORTED_MEDIA_TYPE,
                    "Expected Content-Type message/teapot".to_string(),
                );
            }
        }

        let body = match Limited::new(request.into_body(), MAX_BODY_BYTES).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "Failed to read request body");
                return self.text(StatusCode::BAD_REQUEST, "Unreadable message body".to_string());
            }
        };

        let action = match std::str::from_utf8(&body)
            .map_err(|e| e.to_string())
            .and_then(str::parse::<BrewAction>)
        {
            Ok(action) => action,
            Err(reason) => return self.text(StatusCode::BAD_REQUEST, reason),
        };

        let outcome = match action {
            BrewAction::Start => self.teapot.start(client, variant),
            BrewAction::Stop => self.teapot.stop(client, variant),
        };

        match (action, outcome) {
            (BrewAction::Start, Ok(_)) => {
                self.text(StatusCode::OK, format!("Brewing \"{}\" tea", variant))
            }
            (BrewAction::Stop, Ok(_)) => {
                self.text(StatusCode::OK, format!("Stopped brewing \"{}\" tea", variant))
            }
            (_, Err(err)) => self.brew_error(&err),
        }
    }

    fn choices(&self) -> Response<Full<Bytes>> {
        let builder = Response::builder()
            .status(StatusCode::MULTIPLE_CHOICES)
            .header(ALTERNATES, self.alternates.as_ref())
            .header(CONTENT_TYPE, TEXT_PLAIN);
        finish(builder, Bytes::new())
    }

    fn method_not_allowed(&self) -> Response<Full<Bytes>> {
        let builder = Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .header(ALLOW, ALLOWED_METHODS)
            .header(CONTENT_TYPE, TEXT_PLAIN);
        finish(builder, Bytes::from_static(b"Method not allowed for a teapot"))
    }

    fn brew_error(&self, err: &BrewError) -> Response<Full<Bytes>> {
        let status = match err {
            BrewError::UnknownResource(_) => StatusCode::SERVICE_UNAVAILABLE,
            BrewError::Busy(_) | BrewError::NotBrewing(_) => StatusCode::CONFLICT,
            BrewError::InsufficientTraffic { .. } => StatusCode::FAILED_DEPENDENCY,
        };
        self.text(status, err.to_string())
    }

    fn text(&self, status: StatusCode, body: String) -> Response<Full<Bytes>> {
        let builder = Response::builder()
            .status(status)
            .header(CONTENT_TYPE, TEXT_PLAIN);
        finish(builder, Bytes::from(body))
    }

    fn json<T: Serialize>(&self, value: &T) -> Response<Full<Bytes>> {
        match serde_json::to_vec(value) {
            Ok(body) => {
                let builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(CONTENT_TYPE, APPLICATION_JSON);
                finish(builder, Bytes::from(body))
            }
            Err(e) => {
                error!(error = %e, "Failed to serialize pot status");
                internal_error()
            }
        }
    }
}

fn finish(builder: http::response::Builder, body: Bytes) -> Response<Full<Bytes>> {
    builder.body(Full::new(body)).unwrap_or_else(|e| {
        error!(error = %e, "Failed to build response");
        internal_error()
    })
}

fn internal_error() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::new()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::brewing::ManualClock;
    use crate::config::PotConfig;
    use hyper::Method;

    fn service(threshold: u64) -> HtcpcpService {
        let config = PotConfig {
            min_requests_count: threshold,
            ..PotConfig::default()
        };
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let teapot = Teapot::with_clock(&config, clock).unwrap();
        HtcpcpService::new(Arc::new(teapot))
    }

    fn request(method: &str, path: &str, content_type: Option<&str>, body: &str) -> Request<Full<Bytes>> {
        let mut builder = Request::builder()
            .method(Method::from_bytes(method.as_bytes()).unwrap())
            .uri(path);
        if let Some(content_type) = content_type {
            builder = builder.header(CONTENT_TYPE, content_type);
        }
        builder.body(Full::new(Bytes::from(body.to_string()))).unwrap()
    }

    fn brew(path: &str, body: &str) -> Request<Full<Bytes>> {
        request("BREW", path, Some("message/teapot"), body)
    }

    async fn body_text(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn client() -> ClientId {
        ClientId::from("127.0.0.1")
    }

    #[tokio::test]
    async fn test_invalid_methods_rejected() {
        let service = service(20);

        for method in ["GET", "PUT", "HEAD", "DELETE", "OPTIONS", "PATCH", "TRACE", "WHEN"] {
            let response = service.handle(request(method, "/", None, ""), client()).await;
            assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED, "{}", method);
            assert_eq!(response.headers()[ALLOW], ALLOWED_METHODS);
        }
    }

    #[tokio::test]
    async fn test_brew_without_pot_lists_alternates() {
        let service = service(20);

        let response = service
            .handle(request("BREW", "/", None, "start"), client())
            .await;

        assert_eq!(response.status(), StatusCode::MULTIPLE_CHOICES);
        assert_eq!(
            response.headers()[ALTERNATES],
            "{\"/english-breakfast\" {type message/teapot}}, \
             {\"/earl-grey\" {type message/teapot}}"
        );
    }

    #[tokio::test]
    async fn test_unsupported_tea() {
        let service = service(20);

        let response = service.handle(brew("/unsupported-tea", "start"), client()).await;

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_text(response).await,
            "\"unsupported-tea\" is not supported for this pot"
        );
    }

    #[tokio::test]
    async fn test_too_little_traffic() {
        let service = service(20);

        let response = service.handle(brew("/earl-grey", "start"), client()).await;

        assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(
            body_text(response).await,
            "Traffic too low to brew \"earl-grey\" tea: 1/20"
        );
    }

    #[tokio::test]
    async fn test_enough_traffic_brews_gated_tea() {
        let service = service(3);

        for _ in 0..2 {
            let response = service.handle(brew("/earl-grey", "start"), client()).await;
            assert_eq!(response.status(), StatusCode::FAILED_DEPENDENCY);
        }

        let response = service.handle(brew("/earl-grey", "start"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, "Brewing \"earl-grey\" tea");
    }

    #[tokio::test]
    async fn test_start_stop_cycle() {
        let service = service(20);

        let response = service.handle(brew("/english-breakfast", "start"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = service.handle(brew("/english-breakfast", "start"), client()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_text(response).await,
            "\"english-breakfast\" tea is already brewing"
        );

        let response = service.handle(brew("/english-breakfast", "stop"), client()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            body_text(response).await,
            "Stopped brewing \"english-breakfast\" tea"
        );

        let response = service.handle(brew("/english-breakfast", "stop"), client()).await;
        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(body_text(response).await, "\"english-breakfast\" tea is not brewing");
    }

    #[tokio::test]
    async fn test_post_is_accepted_as_brew() {
        let service = service(20);

        let response = service
            .handle(
                request("POST", "/english-breakfast", Some("message/teapot"), "start"),
                client(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_coffee_is_refused() {
        let service = service(20);

        let response = service
            .handle(
                request("BREW", "/english-breakfast", Some("message/coffeepot"), "start"),
                client(),
            )
            .await;

        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    }

    #[tokio::test]
    async fn test_wrong_content_type_does_not_count_traffic() {
        let service = service(20);

        for content_type in [None, Some("text/plain")] {
            let response = service
                .handle(request("BREW", "/earl-grey", content_type, "start"), client())
                .await;
            assert_eq!(response.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
        }

        let response = service.handle(brew("/earl-grey", "start"), client()).await;
        assert_eq!(
            body_text(response).await,
            "Traffic too low to brew \"earl-grey\" tea: 1/20"
        );
    }

    #[tokio::test]
    async fn test_unknown_action_is_bad_request() {
        let service = service(20);

        for body in ["", "pour", "start please"] {
            let response = service.handle(brew("/english-breakfast", body), client()).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{:?}", body);
        }
    }

    #[tokio::test]
    async fn test_oversized_body_is_bad_request() {
        let service = service(20);
        let body = "s".repeat(MAX_BODY_BYTES + 1);

        let response = service.handle(brew("/english-breakfast", &body), client()).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_propfind_reports_pots() {
        let service = service(20);
        service.handle(brew("/earl-grey", "start"), client()).await;
        service.handle(brew("/english-breakfast", "start"), client()).await;

        let response = service
            .handle(request("PROPFIND", "/", None, ""), client())
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], APPLICATION_JSON);

        let pots: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(
            pots,
            serde_json::json!([
                {"variant": "english-breakfast", "state": "brewing", "gated": false},
                {"variant": "earl-grey", "state": "idle", "gated": true,
                 "threshold": 20, "admission_count": 1}
            ])
        );
    }

    #[tokio::test]
    async fn test_propfind_single_pot() {
        let service = service(20);

        let response = service
            .handle(request("PROPFIND", "/earl-grey", None, ""), client())
            .await;
        assert_eq!(response.status(), StatusCode::OK);

        let pot: serde_json::Value = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(pot["state"], "idle");
        assert_eq!(pot["admission_count"], 0);

        let response = service
            .handle(request("PROPFIND", "/rooibos", None, ""), client())
            .await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
