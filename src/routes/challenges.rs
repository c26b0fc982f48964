use actix_web::{HttpResponse, Responder, get, web};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqlitePool;

use super::ErrorResponse;
use crate::database as db;
use crate::evaluator::HIDDEN_PLACEHOLDER;

#[derive(Deserialize)]
pub struct ChallengeQueryParams {
    pub user_id: Option<i64>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseView {
    pub id: i64,
    pub input: String,
    pub expected_output: String,
    pub is_hidden: bool,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeView {
    pub id: i64,
    pub title: String,
    pub instructions: String,
    pub difficulty: String,
    pub category: String,
    pub xp_reward: i64,
    pub coin_reward: i64,
    pub success_rate: i64,
    pub completed: bool,
    pub test_cases: Vec<TestCaseView>,
}

/// Challenge detail with its test cases. Hidden cases stay listed so the
/// client can show how many there are, but their payloads are replaced by a
/// placeholder until the requesting user has completed the challenge.
#[get("/challenges/{id}")]
pub async fn get_challenge_handler(
    pool: web::Data<SqlitePool>,
    path: web::Path<i64>,
    query: web::Query<ChallengeQueryParams>,
) -> impl Responder {
    let challenge_id = path.into_inner();

    let challenge = match db::fetch_challenge(&pool, challenge_id).await {
        Ok(Some(challenge)) => challenge,
        Ok(None) => {
            return HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            });
        }
        Err(e) => {
            log::error!("Failed to fetch challenge {challenge_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let completed = match query.user_id {
        Some(user_id) => match db::has_completed(&pool, user_id, challenge_id).await {
            Ok(completed) => completed,
            Err(e) => {
                log::error!("Failed to check completion state: {e}");
                return HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_EXTERNAL",
                    code: 5,
                });
            }
        },
        None => false,
    };

    let cases = match db::fetch_test_cases(&pool, challenge_id).await {
        Ok(cases) => cases,
        Err(e) => {
            log::error!("Failed to fetch test cases for challenge {challenge_id}: {e}");
            return HttpResponse::InternalServerError().json(ErrorResponse {
                reason: "ERR_EXTERNAL",
                code: 5,
            });
        }
    };

    let test_cases = cases
        .into_iter()
        .map(|case| {
            let redact = case.hidden && !completed;
            TestCaseView {
                id: case.id,
                input: if redact {
                    HIDDEN_PLACEHOLDER.to_string()
                } else {
                    case.input
                },
                expected_output: if redact {
                    HIDDEN_PLACEHOLDER.to_string()
                } else {
                    case.expected_output
                },
                is_hidden: case.hidden,
            }
        })
        .collect();

    HttpResponse::Ok().json(ChallengeView {
        id: challenge.id,
        title: challenge.title,
        instructions: challenge.instructions,
        difficulty: challenge.difficulty,
        category: challenge.category,
        xp_reward: challenge.xp_reward,
        coin_reward: challenge.coin_reward,
        success_rate: challenge.success_rate,
        completed,
        test_cases,
    })
}
