use axum::{extract::State, Form};
use std::collections::HashMap;

use super::AppState;
use crate::error::AppResult;

/// PayTR server-to-server notification. The gateway keeps retrying until it
/// reads a plain `OK`, so duplicates answer `OK` as well.
pub async fn paytr_callback(
    State(state): State<AppState>,
    Form(fields): Form<HashMap<String, String>>,
) -> AppResult<&'static str> {
    state.orchestrator.process_callback(&fields).await?;
    Ok("OK")
}
