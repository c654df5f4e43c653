use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body;
use http::{Request, Response, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use tower::Layer;

/// Paths that never require the proxy key.
const OPEN_PATHS: &[&str] = &["/", "/health"];

/// Pre-filter checking the configured proxy key.
///
/// When no key is configured every request passes. Otherwise the request
/// must carry the exact key as `Authorization: Bearer <key>`, a bare
/// `Authorization: <key>`, or `x-api-key: <key>`.
pub(crate) struct AuthLayer(Arc<Option<SecretString>>);

impl AuthLayer {
    pub fn new(proxy_key: Option<SecretString>) -> Self {
        Self(Arc::new(proxy_key))
    }
}

impl Clone for AuthLayer {
    fn clone(&self) -> Self {
        AuthLayer(self.0.clone())
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, next: S) -> Self::Service {
        AuthService {
            next,
            proxy_key: self.0.clone(),
        }
    }
}

pub(crate) struct AuthService<S> {
    next: S,
    proxy_key: Arc<Option<SecretString>>,
}

impl<S: Clone> Clone for AuthService<S> {
    fn clone(&self) -> Self {
        AuthService {
            next: self.next.clone(),
            proxy_key: self.proxy_key.clone(),
        }
    }
}

impl<S, ReqBody> tower::Service<Request<ReqBody>> for AuthService<S>
where
    S: tower::Service<Request<ReqBody>, Response = Response<Body>> + Send + Clone + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Response<Body>, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.next.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let authorized = is_authorized(self.proxy_key.as_ref().as_ref(), &req);
        let mut next = self.next.clone();

        Box::pin(async move {
            if authorized {
                next.call(req).await
            } else {
                Ok(unauthorized())
            }
        })
    }
}

fn is_authorized<B>(proxy_key: Option<&SecretString>, req: &Request<B>) -> bool {
    let Some(proxy_key) = proxy_key else {
        return true;
    };

    if OPEN_PATHS.contains(&req.uri().path()) {
        return true;
    }

    let expected = proxy_key.expose_secret();
    let headers = req.headers();

    if let Some(value) = headers.get(http::header::AUTHORIZATION).and_then(|value| value.to_str().ok()) {
        if value == expected {
            return true;
        }

        if let Some(token) = value.strip_prefix("Bearer ")
            && token == expected
        {
            return true;
        }
    }

    headers
        .get("x-api-key")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value == expected)
}

fn unauthorized() -> Response<Body> {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(http::header::CONTENT_TYPE, "text/plain")
        .body(Body::from("Unauthorized"))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, routing::get};
    use tower::util::ServiceExt;

    fn app(proxy_key: Option<&str>) -> Router {
        Router::new()
            .route("/health", get(|| async { "OK" }))
            .route("/v1/messages", get(|| async { "proxied" }))
            .layer(AuthLayer::new(proxy_key.map(|key| SecretString::from(key.to_string()))))
    }

    fn request(path: &str, header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().uri(path);

        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }

        builder.body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn no_key_configured_passes_everything() {
        let response = app(None).oneshot(request("/v1/messages", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn health_is_exempt_from_auth() {
        let response = app(Some("secret")).oneshot(request("/health", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_key_is_rejected() {
        let response = app(Some("secret")).oneshot(request("/v1/messages", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn bearer_token_is_accepted() {
        let response = app(Some("secret"))
            .oneshot(request("/v1/messages", Some(("authorization", "Bearer secret"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bare_authorization_is_accepted() {
        let response = app(Some("secret"))
            .oneshot(request("/v1/messages", Some(("authorization", "secret"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn x_api_key_is_accepted() {
        let response = app(Some("secret"))
            .oneshot(request("/v1/messages", Some(("x-api-key", "secret"))))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn near_matches_are_rejected() {
        for value in ["Bearer secrets", "Bearer secre", "secrets", "Bearer  secret"] {
            let response = app(Some("secret"))
                .oneshot(request("/v1/messages", Some(("authorization", value))))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "value: {value}");
        }
    }

    #[tokio::test]
    async fn rejection_body_is_plain_text() {
        let response = app(Some("secret")).oneshot(request("/v1/messages", None)).await.unwrap();

        assert_eq!(response.headers()[http::header::CONTENT_TYPE], "text/plain");

        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"Unauthorized");
    }
}
