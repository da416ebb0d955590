//! HTTP endpoints the provider redirects to after the user authorizes the
//! bridge, plus a small status page.

use crate::{
    auth::{AuthorizationError, AuthorizationFlow, AuthorizationStatus},
    display::SeverityBand,
    poll::SharedReading,
};
use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Path of the authorization callback. The configured callback URL must
/// point here.
pub const CALLBACK_PATH: &str = "/dexcom";

/// Path of the status endpoint.
pub const STATUS_PATH: &str = "/status";

#[derive(Debug, Clone)]
struct CallbackState {
    flow: Arc<AuthorizationFlow>,
    reading: SharedReading,
}

/// Build the router serving [`CALLBACK_PATH`] and [`STATUS_PATH`].
pub fn router(flow: Arc<AuthorizationFlow>, reading: SharedReading) -> Router {
    Router::new()
        .route(CALLBACK_PATH, get(callback))
        .route(STATUS_PATH, get(status))
        .with_state(CallbackState { flow, reading })
}

impl IntoResponse for AuthorizationError {
    fn into_response(self) -> Response {
        match self {
            Self::MissingCode => {
                (StatusCode::BAD_REQUEST, "Authorization code is required").into_response()
            }
            Self::Denied(_) | Self::NotAwaiting | Self::StateMismatch => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
            Self::Exchange(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Error fetching token").into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

#[instrument(skip_all)]
async fn callback(
    State(state): State<CallbackState>,
    Query(params): Query<CallbackParams>,
) -> Result<&'static str, AuthorizationError> {
    let Some(code) = params.code.filter(|code| !code.is_empty()) else {
        return Err(match params.error {
            Some(error) => AuthorizationError::Denied(error),
            None => AuthorizationError::MissingCode,
        });
    };

    info!("authorization callback received");
    state.flow.complete(&code, params.state.as_deref()).await?;
    Ok("Token received and stored")
}

#[derive(Debug, Serialize)]
struct StatusBody {
    authorization: AuthorizationStatus,
    latest: Option<LatestReading>,
}

#[derive(Debug, Serialize)]
struct LatestReading {
    value: i64,
    timestamp: chrono::DateTime<chrono::Utc>,
    band: SeverityBand,
}

async fn status(State(state): State<CallbackState>) -> Json<StatusBody> {
    let latest = state.reading.get().map(|reading| LatestReading {
        value: reading.value,
        timestamp: reading.timestamp,
        band: SeverityBand::classify(reading.value),
    });
    Json(StatusBody {
        authorization: state.flow.status().await,
        latest,
    })
}
