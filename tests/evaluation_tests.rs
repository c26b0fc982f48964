use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};

use actix_web::{App, test, web};
use pretty_assertions::assert_eq;
use sqlx::sqlite::SqlitePool;

use codequest::config::{CaseSeed, ChallengeSeed, SandboxConfig};
use codequest::database as db;
use codequest::evaluator::{self, HIDDEN_PLACEHOLDER, SubmissionStatus};
use codequest::language::Language;
use codequest::routes::{get_challenge_handler, post_execute_handler, post_submission_handler};
use codequest::sandbox::SandboxExecutor;
use codequest::security::SecurityAnalyzer;

// Global counter to ensure unique test database names
static TEST_DB_COUNTER: AtomicU32 = AtomicU32::new(0);

// Test guard that ensures cleanup on drop
struct TestDbGuard {
    db_path: PathBuf,
}

impl Drop for TestDbGuard {
    fn drop(&mut self) {
        let _ = fs::remove_file(format!("{}-wal", self.db_path.display()));
        let _ = fs::remove_file(format!("{}-shm", self.db_path.display()));
        if let Err(e) = fs::remove_file(&self.db_path) {
            eprintln!(
                "Warning: Failed to remove test database {}: {e}",
                self.db_path.display()
            );
        }
    }
}

async fn create_test_db() -> (SqlitePool, TestDbGuard) {
    let test_id = TEST_DB_COUNTER.fetch_add(1, Ordering::SeqCst);
    let db_path = std::env::temp_dir().join(format!(
        "test_codequest_{}_{}.db",
        std::process::id(),
        test_id
    ));
    let _ = fs::remove_file(&db_path);

    let pool = db::init_db(&db_path)
        .await
        .expect("Failed to initialize test database");

    (pool, TestDbGuard { db_path })
}

fn seed(id: i64, xp: i64, coins: i64, cases: Vec<CaseSeed>) -> ChallengeSeed {
    ChallengeSeed {
        id,
        title: format!("Challenge {id}"),
        instructions: "Read each line and echo it back.".to_string(),
        difficulty: "easy".to_string(),
        category: "general".to_string(),
        xp_reward: xp,
        coin_reward: coins,
        time_limit_ms: None,
        memory_limit_mb: None,
        cases,
    }
}

fn case(input: &str, expected: &str) -> CaseSeed {
    CaseSeed {
        input: input.to_string(),
        expected_output: expected.to_string(),
        hidden: false,
        time_limit_ms: None,
        memory_limit_mb: None,
    }
}

fn hidden_case(input: &str, expected: &str) -> CaseSeed {
    CaseSeed {
        hidden: true,
        ..case(input, expected)
    }
}

async fn setup_challenge(pool: &SqlitePool, seed: &ChallengeSeed) -> db::ChallengeRecord {
    db::upsert_challenge(pool, seed)
        .await
        .expect("Failed to seed challenge");
    db::fetch_challenge(pool, seed.id)
        .await
        .expect("Failed to fetch challenge")
        .expect("Seeded challenge missing")
}

fn executor() -> SandboxExecutor {
    SandboxExecutor::new(SandboxConfig::default())
}

const ECHO_CODE: &str = r#"
    let line;
    while ((line = readLine()) !== null && line !== undefined) {
        console.log(line);
    }
"#;

#[actix_web::test]
async fn full_pass_completes_and_grants_rewards_once() {
    let (pool, _guard) = create_test_db().await;
    let challenge = setup_challenge(
        &pool,
        &seed(1, 50, 10, vec![case("hello", "hello"), case("world", "world")]),
    )
    .await;
    let analyzer = SecurityAnalyzer::new();
    let learner = db::create_user(&pool, "learner")
        .await
        .expect("Failed to create user");
    assert_eq!(learner.xp, 0);

    let result = evaluator::evaluate_submission(
        &pool,
        &analyzer,
        &executor(),
        &challenge,
        learner.id,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");

    assert_eq!(result.status, SubmissionStatus::Completed);
    assert_eq!(result.score, 100);
    assert!(result.success);
    assert_eq!(result.feedback, "All tests passed");
    assert_eq!(result.xp_earned, 50);
    assert_eq!(result.coins_earned, 10);

    let user = db::fetch_user(&pool, learner.id).await.unwrap().unwrap();
    assert_eq!(user.xp, 50);
    assert_eq!(user.coins, 10);

    // A second passing submission must not grant rewards again
    let again = evaluator::evaluate_submission(
        &pool,
        &analyzer,
        &executor(),
        &challenge,
        learner.id,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");

    assert!(again.success);
    assert_eq!(again.xp_earned, 0);
    assert_eq!(again.coins_earned, 0);

    let user = db::fetch_user(&pool, learner.id).await.unwrap().unwrap();
    assert_eq!(user.xp, 50);
    assert_eq!(user.coins, 10);
}

#[actix_web::test]
async fn partial_pass_scores_proportionally() {
    let (pool, _guard) = create_test_db().await;
    // The echo program fails the third case, whose expected output differs
    let challenge = setup_challenge(
        &pool,
        &seed(
            2,
            50,
            10,
            vec![
                case("a", "a"),
                case("b", "b"),
                case("c", "something else"),
            ],
        ),
    )
    .await;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");

    assert_eq!(result.status, SubmissionStatus::Completed);
    assert_eq!(result.score, 67); // round(100 * 2/3)
    assert!(!result.success);
    assert_eq!(result.feedback, "2 of 3 tests passed");
    assert_eq!(result.xp_earned, 0);
    assert_eq!(result.results.len(), 3);
    assert!(result.results[0].passed);
    assert!(result.results[1].passed);
    assert!(!result.results[2].passed);
}

#[actix_web::test]
async fn whitespace_differences_do_not_fail_a_case() {
    let (pool, _guard) = create_test_db().await;
    // Expected output uses different line breaks and padding than the program
    let challenge = setup_challenge(
        &pool,
        &seed(3, 0, 0, vec![case("x\ny", "  x   y \n")]),
    )
    .await;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");

    assert_eq!(result.score, 100);
    assert!(result.success);
}

#[actix_web::test]
async fn hidden_expected_output_is_redacted_until_completion() {
    let (pool, _guard) = create_test_db().await;
    let challenge = setup_challenge(
        &pool,
        &seed(
            4,
            0,
            0,
            vec![case("a", "a"), hidden_case("secret", "never shown")],
        ),
    )
    .await;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");

    assert!(!result.success);
    assert_eq!(result.results[0].expected_output, "a");
    assert!(result.results[1].is_hidden);
    assert_eq!(result.results[1].expected_output, HIDDEN_PLACEHOLDER);

    // The persisted verdict keeps the true expected output
    let stored = db::fetch_submission(&pool, result.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.cases[1].expected_output, "never shown");
}

#[actix_web::test]
async fn hidden_expected_output_is_visible_after_completion() {
    let (pool, _guard) = create_test_db().await;
    let challenge = setup_challenge(
        &pool,
        &seed(5, 0, 0, vec![hidden_case("secret", "secret")]),
    )
    .await;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");

    // The passing submission itself already sees the real expected output
    assert!(result.success);
    assert_eq!(result.results[0].expected_output, "secret");
}

#[actix_web::test]
async fn security_violation_fails_without_running_anything() {
    let (pool, _guard) = create_test_db().await;
    let challenge = setup_challenge(&pool, &seed(6, 50, 10, vec![case("a", "a")])).await;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        "eval('1 + 1');",
    )
    .await
    .expect("Evaluation failed");

    assert_eq!(result.status, SubmissionStatus::Failed);
    assert_eq!(result.score, 0);
    assert!(result.results.is_empty());
    assert_eq!(result.feedback, "Banned function used: eval");
    assert_eq!(result.xp_earned, 0);

    let stored = db::fetch_submission(&pool, result.submission_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, "failed");
    assert!(stored.cases.is_empty());
}

#[actix_web::test]
async fn timeout_on_any_case_dominates_the_submission_status() {
    let (pool, _guard) = create_test_db().await;
    let mut spin = case("spin", "unreachable");
    spin.time_limit_ms = Some(200);
    let challenge = setup_challenge(&pool, &seed(7, 0, 0, vec![case("a", "a"), spin])).await;

    // Echoes its input unless told to spin forever
    let code = r#"
        const line = readLine();
        if (line === "spin") {
            while (true) {}
        }
        console.log(line);
    "#;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        code,
    )
    .await
    .expect("Evaluation failed");

    assert_eq!(result.status, SubmissionStatus::Timeout);
    assert_eq!(result.score, 50);
    assert!(result.results[0].passed);
    assert!(!result.results[1].passed);
    assert!(
        result.results[1]
            .error
            .as_deref()
            .unwrap()
            .contains("Time limit exceeded")
    );
}

#[actix_web::test]
async fn runtime_error_in_one_case_does_not_stop_the_rest() {
    let (pool, _guard) = create_test_db().await;
    let challenge = setup_challenge(
        &pool,
        &seed(8, 0, 0, vec![case("boom", "unreachable"), case("ok", "ok")]),
    )
    .await;

    let code = r#"
        const line = readLine();
        if (line === "boom") {
            throw new Error("exploded");
        }
        console.log(line);
    "#;

    let result = evaluator::evaluate_submission(
        &pool,
        &SecurityAnalyzer::new(),
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        code,
    )
    .await
    .expect("Evaluation failed");

    assert_eq!(result.status, SubmissionStatus::Failed);
    assert_eq!(result.score, 50);
    assert!(!result.results[0].passed);
    assert!(result.results[1].passed);
}

#[actix_web::test]
async fn challenge_route_redacts_hidden_cases() {
    let (pool, _guard) = create_test_db().await;
    setup_challenge(
        &pool,
        &seed(9, 0, 0, vec![case("a", "a"), hidden_case("secret", "secret")]),
    )
    .await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .service(get_challenge_handler),
    )
    .await;

    let req = test::TestRequest::get()
        .uri("/challenges/9?user_id=0")
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["id"], 9);
    assert_eq!(body["testCases"][0]["expectedOutput"], "a");
    assert_eq!(body["testCases"][1]["input"], HIDDEN_PLACEHOLDER);
    assert_eq!(body["testCases"][1]["expectedOutput"], HIDDEN_PLACEHOLDER);
    assert_eq!(body["testCases"][1]["isHidden"], true);
}

#[actix_web::test]
async fn submission_route_rejects_unknown_challenge() {
    let (pool, _guard) = create_test_db().await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(SecurityAnalyzer::new()))
            .app_data(web::Data::new(executor()))
            .service(post_submission_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(serde_json::json!({
            "userId": 0,
            "challengeId": 999,
            "language": "javascript",
            "code": "console.log('hi');"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
async fn submission_route_returns_the_full_verdict() {
    let (pool, _guard) = create_test_db().await;
    setup_challenge(&pool, &seed(10, 25, 5, vec![case("hi", "hi")])).await;

    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(pool.clone()))
            .app_data(web::Data::new(SecurityAnalyzer::new()))
            .app_data(web::Data::new(executor()))
            .service(post_submission_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/submissions")
        .set_json(serde_json::json!({
            "userId": 0,
            "challengeId": 10,
            "language": "javascript",
            "code": ECHO_CODE
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "completed");
    assert_eq!(body["score"], 100);
    assert_eq!(body["success"], true);
    assert_eq!(body["xpEarned"], 25);
    assert_eq!(body["coinsEarned"], 5);
    assert_eq!(body["results"][0]["passed"], true);
}

#[actix_web::test]
async fn success_rate_reflects_terminal_submissions() {
    let (pool, _guard) = create_test_db().await;
    let challenge = setup_challenge(&pool, &seed(11, 0, 0, vec![case("a", "a")])).await;
    let analyzer = SecurityAnalyzer::new();

    // One pass, one fail
    evaluator::evaluate_submission(
        &pool,
        &analyzer,
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        ECHO_CODE,
    )
    .await
    .expect("Evaluation failed");
    evaluator::evaluate_submission(
        &pool,
        &analyzer,
        &executor(),
        &challenge,
        0,
        Language::JavaScript,
        "console.log('wrong');",
    )
    .await
    .expect("Evaluation failed");

    let updated = db::fetch_challenge(&pool, 11).await.unwrap().unwrap();
    assert_eq!(updated.success_rate, 50);
}

#[actix_web::test]
async fn execute_route_runs_code_against_supplied_input() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(SecurityAnalyzer::new()))
            .app_data(web::Data::new(executor()))
            .service(post_execute_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(serde_json::json!({
            "language": "javascript",
            "code": "console.log(readLine());",
            "input": "hi"
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "completed");
    assert_eq!(body["output"], "hi\n");
}

#[actix_web::test]
async fn execute_route_screens_code_before_running() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(SecurityAnalyzer::new()))
            .app_data(web::Data::new(executor()))
            .service(post_execute_handler),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(serde_json::json!({
            "language": "javascript",
            "code": "eval('1');"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), 400);
}

#[actix_web::test]
async fn execute_route_limits_cannot_be_overridden_by_the_caller() {
    let app = test::init_service(
        App::new()
            .app_data(web::Data::new(SecurityAnalyzer::new()))
            .app_data(web::Data::new(executor()))
            .service(post_execute_handler),
    )
    .await;

    // Extra limit fields in the payload are ignored; a busy loop is still
    // aborted at the platform default, never left running.
    let req = test::TestRequest::post()
        .uri("/execute")
        .set_json(serde_json::json!({
            "language": "javascript",
            "code": "while (true) {}",
            "timeLimitMs": -1,
            "memoryLimitMb": -1
        }))
        .to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;

    assert_eq!(body["status"], "timeout");
    assert!(
        body["error"]
            .as_str()
            .unwrap()
            .contains("Time limit exceeded after 5000ms")
    );
}
