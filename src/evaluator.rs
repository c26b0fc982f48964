//! Evaluation orchestration: security screen, per-case execution, comparison,
//! aggregation into a scored verdict, and post-verdict side effects
//!
//! Every submission is evaluated synchronously within its request. Faults
//! local to a single test case (runtime error, timeout) are folded into that
//! case's result and never abort the remaining cases; a security violation
//! short-circuits the whole submission before any code runs. Reward granting,
//! the completion notification and the success-rate recompute run only after
//! the verdict is durably written, each isolated so a failure is logged
//! without disturbing the verdict.

use serde::Serialize;
use sqlx::SqlitePool;

use crate::comparator::outputs_match;
use crate::database::{self as db, ChallengeRecord, SubmissionCaseRow, TestCaseRecord};
use crate::language::Language;
use crate::sandbox::{
    DEFAULT_MEMORY_LIMIT_MB, DEFAULT_TIME_LIMIT_MS, ExecStatus, ExecutionRequest, SandboxExecutor,
    resolve_limit,
};
use crate::security::SecurityAnalyzer;

/// Placeholder substituted for a hidden case's expected output in responses
pub const HIDDEN_PLACEHOLDER: &str = "<hidden>";

/// Terminal status of a whole submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    Completed,
    Failed,
    Timeout,
    SystemError,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::SystemError => "system_error",
        }
    }
}

/// Per-case verdict as returned to the caller
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestCaseVerdict {
    pub test_case_id: i64,
    pub passed: bool,
    pub output: String,
    pub expected_output: String,
    pub execution_time: u64,
    pub error: Option<String>,
    pub is_hidden: bool,
}

/// The aggregated, scored result of one submission
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeEvaluationResult {
    pub submission_id: i64,
    pub status: SubmissionStatus,
    pub results: Vec<TestCaseVerdict>,
    pub score: i64,
    pub execution_time: u64,
    pub feedback: String,
    pub xp_earned: i64,
    pub coins_earned: i64,
    pub success: bool,
}

/// Internal per-case outcome, kept alongside the verdict for aggregation
struct CaseOutcome {
    status: ExecStatus,
    verdict: TestCaseVerdict,
}

/// Evaluates one submission end to end
///
/// The caller has already resolved the challenge and verified the user, so
/// the only error path out of here is an infrastructure fault; the submission
/// is finalized as `system_error` before the error is re-raised.
pub async fn evaluate_submission(
    pool: &SqlitePool,
    analyzer: &SecurityAnalyzer,
    executor: &SandboxExecutor,
    challenge: &ChallengeRecord,
    user_id: i64,
    language: Language,
    code: &str,
) -> anyhow::Result<ChallengeEvaluationResult> {
    let already_completed = db::has_completed(pool, user_id, challenge.id).await?;
    let submission_id =
        db::create_submission(pool, user_id, challenge.id, language.as_str(), code).await?;

    let evaluated = run_evaluation(pool, analyzer, executor, challenge, language, code).await;

    let verdict = match evaluated {
        Ok(verdict) => verdict,
        Err(e) => {
            if let Err(mark_err) = db::mark_system_error(pool, submission_id, &format!("{e:#}")).await
            {
                log::error!("Failed to finalize submission {submission_id} as system_error: {mark_err}");
            }
            return Err(e);
        }
    };

    let case_rows: Vec<SubmissionCaseRow> = verdict
        .outcomes
        .iter()
        .enumerate()
        .map(|(index, outcome)| SubmissionCaseRow {
            case_index: index as i64,
            test_case_id: outcome.verdict.test_case_id,
            passed: outcome.verdict.passed,
            output: outcome.verdict.output.clone(),
            // persisted rows always keep the true expected output
            expected_output: outcome.verdict.expected_output.clone(),
            execution_time_ms: outcome.verdict.execution_time as i64,
            error: outcome.verdict.error.clone(),
            hidden: outcome.verdict.is_hidden,
        })
        .collect();

    db::save_verdict(
        pool,
        submission_id,
        verdict.status.as_str(),
        verdict.score,
        verdict.execution_time as i64,
        verdict.error.as_deref(),
        &case_rows,
    )
    .await?;

    // Post-verdict hooks: each failure is logged, never rolled back into the
    // already-persisted verdict.
    let mut rewards_granted = false;
    if verdict.passed {
        rewards_granted = run_completion_hooks(pool, challenge, user_id).await;
    }
    if let Err(e) = db::bump_challenge_stats(pool, challenge.id, verdict.passed).await {
        log::warn!(
            "Failed to recompute success rate for challenge {}: {e}",
            challenge.id
        );
    }

    let completed = already_completed || verdict.passed;
    let results = verdict
        .outcomes
        .into_iter()
        .map(|outcome| {
            let mut v = outcome.verdict;
            if v.is_hidden && !completed {
                v.expected_output = HIDDEN_PLACEHOLDER.to_string();
            }
            v
        })
        .collect();

    Ok(ChallengeEvaluationResult {
        submission_id,
        status: verdict.status,
        results,
        score: verdict.score,
        execution_time: verdict.execution_time,
        feedback: verdict.feedback,
        xp_earned: if rewards_granted { challenge.xp_reward } else { 0 },
        coins_earned: if rewards_granted { challenge.coin_reward } else { 0 },
        success: verdict.passed,
    })
}

/// Runs the reward/notification side effects; returns whether this submission
/// was the first completion and therefore granted rewards
async fn run_completion_hooks(pool: &SqlitePool, challenge: &ChallengeRecord, user_id: i64) -> bool {
    let granted = match db::record_completion(pool, user_id, challenge.id).await {
        Ok(granted) => granted,
        Err(e) => {
            log::warn!(
                "Failed to record completion of challenge {} for user {user_id}: {e}",
                challenge.id
            );
            return false;
        }
    };

    if !granted {
        log::debug!(
            "User {user_id} already completed challenge {}, rewards not re-granted",
            challenge.id
        );
        return false;
    }

    if let Err(e) = db::grant_rewards(pool, user_id, challenge.xp_reward, challenge.coin_reward).await
    {
        log::warn!("Failed to grant rewards to user {user_id}: {e}");
    }

    let message = format!(
        "Challenge '{}' completed: +{} XP, +{} coins",
        challenge.title, challenge.xp_reward, challenge.coin_reward
    );
    if let Err(e) = db::record_notification(pool, user_id, &message).await {
        log::warn!("Failed to record completion notification for user {user_id}: {e}");
    }

    granted
}

/// The orchestration result before redaction and persistence bookkeeping
struct EvaluatedSubmission {
    status: SubmissionStatus,
    outcomes: Vec<CaseOutcome>,
    score: i64,
    passed: bool,
    execution_time: u64,
    feedback: String,
    error: Option<String>,
}

async fn run_evaluation(
    pool: &SqlitePool,
    analyzer: &SecurityAnalyzer,
    executor: &SandboxExecutor,
    challenge: &ChallengeRecord,
    language: Language,
    code: &str,
) -> anyhow::Result<EvaluatedSubmission> {
    // One security screen for the whole submission; a violation aborts before
    // any sandboxed execution.
    let screened = analyzer.analyze(code, language);
    if !screened.clean {
        let reason = screened
            .reason
            .unwrap_or_else(|| "Security violation".to_string());
        log::info!("Submission rejected by security screen: {reason}");
        return Ok(EvaluatedSubmission {
            status: SubmissionStatus::Failed,
            outcomes: Vec::new(),
            score: 0,
            passed: false,
            execution_time: 0,
            feedback: reason.clone(),
            error: Some(reason),
        });
    }

    let cases = db::fetch_test_cases(pool, challenge.id).await?;

    let mut outcomes = Vec::with_capacity(cases.len());
    let mut max_time: u64 = 0;
    for case in &cases {
        let outcome = evaluate_case(executor, challenge, case, language, code).await;
        max_time = max_time.max(outcome.verdict.execution_time);
        outcomes.push(outcome);
    }

    let (score, passed, status) = aggregate(&outcomes);
    let passed_count = outcomes.iter().filter(|o| o.verdict.passed).count();
    let feedback = if passed {
        "All tests passed".to_string()
    } else {
        format!("{} of {} tests passed", passed_count, outcomes.len())
    };

    Ok(EvaluatedSubmission {
        status,
        outcomes,
        score,
        passed,
        execution_time: max_time,
        feedback,
        error: None,
    })
}

async fn evaluate_case(
    executor: &SandboxExecutor,
    challenge: &ChallengeRecord,
    case: &TestCaseRecord,
    language: Language,
    code: &str,
) -> CaseOutcome {
    let request = ExecutionRequest {
        language,
        source_code: code.to_string(),
        input: case.input.clone(),
        time_limit_ms: resolve_limit(
            case.time_limit_ms,
            challenge.time_limit_ms,
            DEFAULT_TIME_LIMIT_MS,
        ) as u64,
        memory_limit_mb: resolve_limit(
            case.memory_limit_mb,
            challenge.memory_limit_mb,
            DEFAULT_MEMORY_LIMIT_MB,
        ) as u64,
    };

    let result = executor.execute(&request).await;

    // The comparator only runs on a completed execution; any other terminal
    // status is an immediate fail for this case.
    let passed = result.status == ExecStatus::Completed
        && outputs_match(&result.output, &case.expected_output);

    CaseOutcome {
        status: result.status,
        verdict: TestCaseVerdict {
            test_case_id: case.id,
            passed,
            output: result.output,
            expected_output: case.expected_output.clone(),
            execution_time: result.execution_time_ms,
            error: result.error,
            is_hidden: case.hidden,
        },
    }
}

/// Aggregates ordered case outcomes into (score, passed, status)
///
/// The status scan is deterministic in case order regardless of how the
/// executions completed: timeout outranks system error outranks any other
/// error, and a clean run with mere mismatches is still COMPLETED.
fn aggregate(outcomes: &[CaseOutcome]) -> (i64, bool, SubmissionStatus) {
    let total = outcomes.len();
    if total == 0 {
        return (0, false, SubmissionStatus::Completed);
    }

    let passed_count = outcomes.iter().filter(|o| o.verdict.passed).count();
    let score = (100.0 * passed_count as f64 / total as f64).round() as i64;
    let passed = score >= 100;

    let status = if outcomes.iter().any(|o| o.status == ExecStatus::Timeout) {
        SubmissionStatus::Timeout
    } else if outcomes.iter().any(|o| o.status == ExecStatus::SystemError) {
        SubmissionStatus::SystemError
    } else if outcomes.iter().any(|o| o.verdict.error.is_some()) {
        SubmissionStatus::Failed
    } else {
        SubmissionStatus::Completed
    };

    (score, passed, status)
}
