use actix_web::{HttpResponse, Responder, post, web};
use serde::Deserialize;
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::database as db;
use crate::evaluator;
use crate::language::Language;
use crate::sandbox::SandboxExecutor;
use crate::security::SecurityAnalyzer;

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionBody {
    pub user_id: i64,
    pub challenge_id: i64,
    pub language: Language,
    pub code: String,
}

#[post("/submissions")]
pub async fn post_submission_handler(
    pool: web::Data<SqlitePool>,
    analyzer: web::Data<SecurityAnalyzer>,
    executor: web::Data<SandboxExecutor>,
    body: web::Json<SubmissionBody>,
) -> impl Responder {
    let user_exists = match db::find_user(&pool, body.user_id).await {
        Ok(exists) => exists,
        Err(e) => {
            log::error!("Failed to check user existence: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };
    if !user_exists {
        return HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        });
    }

    let challenge = match db::fetch_challenge(&pool, body.challenge_id).await {
        Ok(Some(challenge)) => challenge,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            });
        }
        Err(e) => {
            log::error!("Failed to fetch challenge {}: {e}", body.challenge_id);
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    match evaluator::evaluate_submission(
        &pool,
        &analyzer,
        &executor,
        &challenge,
        body.user_id,
        body.language,
        &body.code,
    )
    .await
    {
        Ok(result) => {
            log::info!(
                "Submission {} finished with status {} and score {}",
                result.submission_id,
                result.status.as_str(),
                result.score
            );
            HttpResponse::Ok().json(result)
        }
        Err(e) => {
            log::error!("Evaluation failed: {e:#}");
            HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_INTERNAL",
                code: 6,
            })
        }
    }
}
