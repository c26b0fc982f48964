use actix_web::{HttpResponse, Responder, post, web};
use serde::Deserialize;

use super::ErrorResponseWithMessage;
use crate::language::Language;
use crate::sandbox::{
    DEFAULT_MEMORY_LIMIT_MB, DEFAULT_TIME_LIMIT_MS, ExecutionRequest, SandboxExecutor,
};
use crate::security::SecurityAnalyzer;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteBody {
    pub language: Language,
    pub code: String,
    #[serde(default)]
    pub input: String,
}

/// Ad-hoc execution against caller-supplied input, outside any challenge.
/// The same security screen applies; a violation is a 400, never a run.
/// Resource limits are always the platform defaults: callers cannot raise
/// or disable them.
#[post("/execute")]
pub async fn post_execute_handler(
    analyzer: web::Data<SecurityAnalyzer>,
    executor: web::Data<SandboxExecutor>,
    body: web::Json<ExecuteBody>,
) -> impl Responder {
    let screened = analyzer.analyze(&body.code, body.language);
    if !screened.clean {
        let reason = screened
            .reason
            .unwrap_or_else(|| "Security violation".to_string());
        log::info!("Ad-hoc execution rejected by security screen: {reason}");
        return HttpResponse::BadRequest().json(ErrorResponseWithMessage {
            reason: "ERR_INVALID_ARGUMENT",
            code: 1,
            message: reason,
        });
    }

    let request = ExecutionRequest {
        language: body.language,
        source_code: body.code.clone(),
        input: body.input.clone(),
        time_limit_ms: DEFAULT_TIME_LIMIT_MS as u64,
        memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB as u64,
    };

    let result = executor.execute(&request).await;
    HttpResponse::Ok().json(result)
}
