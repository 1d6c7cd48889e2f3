use std::sync::Arc;
use axum::{routing::post, Router, Json};
use tower_http::cors::{CorsLayer, Any};
use serde::{Deserialize, Serialize};
use axum::http::StatusCode;
use tracing::{info, warn};
use crate::interface::RuleInterface;
use crate::result::{RuleQueryResult, RuleStatus};
use crate::rule::RuleDescription;
use crate::validate::ValidationDiagnostic;

#[derive(Deserialize)]
pub struct RulesRequest {
    pub rules: Vec<RuleDescription>,
}

#[derive(Serialize)]
pub struct RulesResponse {
    pub status: String,
    pub elapsed_ms: f64,
    pub rule_count: usize,
    pub results: Vec<RuleQueryResult>,
}

#[derive(Deserialize)]
pub struct ValidateRequest {
    pub sql: String,
}

#[derive(Serialize)]
pub struct ValidateResponse {
    pub status: String,
    pub elapsed_ms: f64,
    pub diagnostic: ValidationDiagnostic,
}

pub fn router(interface: Arc<RuleInterface>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([axum::http::Method::POST])
        .allow_headers(Any);
    let for_validate = Arc::clone(&interface);
    Router::new()
        .route("/v1/rules", post(move |Json(req): Json<RulesRequest>| {
        let iface = Arc::clone(&interface);
        async move {
            // rule processing is synchronous and may hit the store, keep it off the runtime
            let started = std::time::Instant::now();
            let rules = req.rules;
            let rule_count = rules.len();
            let results = tokio::task::spawn_blocking(move || iface.run_sync(&rules))
                .await
                .map_err(|e| {
                    warn!(error=%e, "Join error");
                    (StatusCode::INTERNAL_SERVER_ERROR, "Join error")
                })?;
            let elapsed_ms_f64 = started.elapsed().as_secs_f64() * 1000.0;
            let executed = results.iter().filter(|r| r.status() == RuleStatus::Executed).count();
            info!(ms=elapsed_ms_f64, rules=rule_count, executed, "rules complete");
            let body = RulesResponse { status: "ok".into(), elapsed_ms: elapsed_ms_f64, rule_count, results };
            Ok::<_, (StatusCode, &'static str)>((StatusCode::OK, Json(body)))
        }
    }))
        .route("/v1/validate", post(move |Json(req): Json<ValidateRequest>| {
        let iface = Arc::clone(&for_validate);
        async move {
            let started = std::time::Instant::now();
            let diagnostic = iface.engine().validate(&req.sql);
            let elapsed_ms_f64 = started.elapsed().as_secs_f64() * 1000.0;
            info!(ms=elapsed_ms_f64, valid=diagnostic.is_valid(), issues=diagnostic.issues().len(), "validation complete");
            let status = if diagnostic.is_valid() { "ok" } else { "invalid" };
            (StatusCode::OK, Json(ValidateResponse { status: status.into(), elapsed_ms: elapsed_ms_f64, diagnostic }))
        }
    }))
    .layer(cors)
}
