//! Authenticated-principal extraction at the WebSocket upgrade boundary.
//!
//! JWT validation and session extension are out of scope for the Hub (§1):
//! a real deployment puts an authentication middleware in front of this
//! binary (or ahead of it in the same process, layered with
//! [`axum::middleware`]) that validates credentials and populates a
//! request-scoped context with `{principal-id, email, display-name,
//! username}`. This extractor only reads that already-validated context
//! back out of the request; it performs no validation of its own. The
//! default wiring here reads plain headers so the binary is runnable
//! standalone — swap `AuthenticatedPrincipal::from_request_parts` for a
//! real extractor (e.g. one backed by `jsonwebtoken`) to integrate an
//! actual identity provider.

use axum::{
    extract::FromRequestParts,
    http::{StatusCode, request::Parts},
};

pub const PRINCIPAL_ID_HEADER: &str = "x-fanhub-principal-id";
pub const EMAIL_HEADER: &str = "x-fanhub-email";
pub const DISPLAY_NAME_HEADER: &str = "x-fanhub-display-name";
pub const USERNAME_HEADER: &str = "x-fanhub-username";

/// The identity an upstream auth layer has already resolved for this
/// connection.
#[derive(Debug, Clone)]
pub struct AuthenticatedPrincipal {
    pub principal_id: String,
    pub email: Option<String>,
    pub display_name: String,
    pub username: Option<String>,
}

impl<S> FromRequestParts<S> for AuthenticatedPrincipal
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let header = |name: &str| -> Option<String> {
            parts
                .headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let Some(principal_id) = header(PRINCIPAL_ID_HEADER) else {
            return Err((StatusCode::UNAUTHORIZED, "missing authenticated principal"));
        };

        let display_name = header(DISPLAY_NAME_HEADER).unwrap_or_else(|| principal_id.clone());

        Ok(AuthenticatedPrincipal {
            principal_id,
            email: header(EMAIL_HEADER),
            display_name,
            username: header(USERNAME_HEADER),
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<AuthenticatedPrincipal, (StatusCode, &'static str)> {
        let (mut parts, _) = req.into_parts();
        AuthenticatedPrincipal::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn missing_principal_header_is_unauthorized() {
        let req = Request::builder().body(()).expect("request");
        let result = extract(req).await;
        assert_eq!(result.unwrap_err().0, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn present_headers_populate_the_principal() {
        let req = Request::builder()
            .header(PRINCIPAL_ID_HEADER, "u-42")
            .header(DISPLAY_NAME_HEADER, "Ada")
            .body(())
            .expect("request");
        let principal = extract(req).await.expect("authenticated");
        assert_eq!(principal.principal_id, "u-42");
        assert_eq!(principal.display_name, "Ada");
    }

    #[tokio::test]
    async fn display_name_falls_back_to_principal_id() {
        let req = Request::builder()
            .header(PRINCIPAL_ID_HEADER, "u-42")
            .body(())
            .expect("request");
        let principal = extract(req).await.expect("authenticated");
        assert_eq!(principal.display_name, "u-42");
    }
}
