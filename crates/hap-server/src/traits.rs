//! Seam between the transport and the accessory data model.

use crate::{HttpRequest, HttpResponse, StatusCode};
use async_trait::async_trait;
use std::net::SocketAddr;
use uuid::Uuid;

/// Who sent a routed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RouteContext {
    pub peer: SocketAddr,
    /// Controller that completed pair-verify on this connection.
    pub controller_id: Uuid,
}

/// Handles requests on verified sessions (`/accessories`,
/// `/characteristics` and the like).
///
/// Pairing endpoints never reach the router.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RequestRouter: Send + Sync {
    async fn route(&self, context: RouteContext, request: HttpRequest) -> HttpResponse;
}

/// Router with no accessory database: every request is a 404.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundRouter;

#[async_trait]
impl RequestRouter for NotFoundRouter {
    async fn route(&self, context: RouteContext, request: HttpRequest) -> HttpResponse {
        tracing::debug!(peer = %context.peer, uri = %request.uri, "no route");
        HttpResponse::new(StatusCode::NOT_FOUND)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Method;

    fn context() -> RouteContext {
        RouteContext {
            peer: "192.168.1.20:50123".parse().unwrap(),
            controller_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn mock_router_returns_configured_response() {
        let mut mock = MockRequestRouter::new();
        mock.expect_route()
            .withf(|_, request| request.path() == "/accessories")
            .returning(|_, _| HttpResponse::json(StatusCode::OK, r#"{"accessories":[]}"#));

        let response = mock
            .route(context(), HttpRequest::new(Method::Get, "/accessories"))
            .await;
        assert_eq!(response.status, StatusCode::OK);
        assert_eq!(response.body, br#"{"accessories":[]}"#);
    }

    #[tokio::test]
    async fn not_found_router() {
        let response = NotFoundRouter
            .route(context(), HttpRequest::new(Method::Get, "/characteristics?id=1.9"))
            .await;
        assert_eq!(response.status, StatusCode::NOT_FOUND);
    }
}
