use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;

use crate::auth::AppState;
use crate::error::ApiError;
use crate::sessions::SESSION_COOKIE;

/// The authenticated user, attached as a request extension once the
/// session has been validated.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub id: i64,
    pub username: String,
}

/// Resolve the session from the `Cookie` header (browsers) or a bearer
/// token (tray apps and the CLI, which keep the cookie value themselves).
/// Everything behind this layer sees a `CurrentUser`; without a valid
/// session the request ends here with a 401.
pub async fn require_session(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let value = session_value(req.headers()).ok_or(ApiError::Unauthorized)?;
    let session = state.sessions.validate(&value).ok_or(ApiError::Unauthorized)?;

    req.extensions_mut().insert(CurrentUser {
        id: session.user_id,
        username: session.username,
    });
    Ok(next.run(req).await)
}

pub(crate) fn session_value(headers: &HeaderMap) -> Option<String> {
    if let Some(cookies) = headers.get(header::COOKIE).and_then(|v| v.to_str().ok()) {
        for pair in cookies.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                if name == SESSION_COOKIE {
                    return Some(value.to_string());
                }
            }
        }
    }

    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn reads_session_cookie_among_others() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; session=abc.def; lang=en"),
        );
        assert_eq!(session_value(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn falls_back_to_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def"),
        );
        assert_eq!(session_value(&headers).as_deref(), Some("abc.def"));
    }

    #[test]
    fn missing_headers_yield_none() {
        assert!(session_value(&HeaderMap::new()).is_none());
    }
}
