// Copyright (C) 2026 Fred Clausen
// Use of this source code is governed by an MIT-style
// license that can be found in the LICENSE file or at
// https://opensource.org/licenses/MIT.

//! Admin credential extraction for the configuration surface.
//!
//! The credential is a single shared secret, presented either in an
//! `X-Admin-Secret` header or as an `Authorization: Bearer` token, and
//! compared in constant time. There are no per-user accounts.

use axum::extract::FromRequestParts;
use axum::http::{StatusCode, header, request::Parts};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::{debug, warn};

use crate::AppState;

/// Extractor gating admin endpoints behind the shared secret.
pub struct AdminGate;

impl FromRequestParts<AppState> for AdminGate {
    type Rejection = AdminError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_secret: Option<&str> = parts
            .headers
            .get("x-admin-secret")
            .and_then(|v| v.to_str().ok());
        let bearer_secret: Option<&str> = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "));

        let Some(presented) = header_secret.or(bearer_secret) else {
            debug!("Missing admin credential");
            return Err(AdminError::MissingCredential);
        };

        if state.admin.verify(presented) {
            Ok(Self)
        } else {
            warn!("Rejected admin credential");
            Err(AdminError::WrongCredential)
        }
    }
}

/// Admin gate rejections; both map to 401 with the gateway's error shape.
#[derive(Debug)]
pub enum AdminError {
    /// No credential was presented.
    MissingCredential,
    /// A credential was presented but did not match.
    WrongCredential,
}

#[derive(Debug, Serialize)]
struct UnauthorizedBody {
    success: bool,
    error: &'static str,
    message: &'static str,
}

impl IntoResponse for AdminError {
    fn into_response(self) -> Response {
        let message: &'static str = match self {
            Self::MissingCredential => "Missing admin credential",
            Self::WrongCredential => "Invalid admin credential",
        };
        (
            StatusCode::UNAUTHORIZED,
            axum::Json(UnauthorizedBody {
                success: false,
                error: "Unauthorized",
                message,
            }),
        )
            .into_response()
    }
}
