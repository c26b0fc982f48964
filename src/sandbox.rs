//! Sandboxed execution of untrusted submissions
//!
//! Two isolation strategies, selected by the submission's language:
//! an in-process QuickJS interpreter sandbox for script languages and a
//! disposable Docker container for compiled/system languages. Both fail
//! closed: every path out of [`SandboxExecutor::execute`] yields a populated
//! [`ExecutionResult`] instead of an error.

mod container;
mod interpreter;

use serde::Serialize;

use crate::config::SandboxConfig;
use crate::language::{ExecutionStrategy, Language};

/// Platform default wall-clock limit, applied when neither the test case nor
/// the challenge sets one
pub const DEFAULT_TIME_LIMIT_MS: i64 = 5000;
/// Platform default memory ceiling in MB
pub const DEFAULT_MEMORY_LIMIT_MB: i64 = 50;

/// Resolves the three-level limit fallback: per-case override, then challenge
/// default, then platform default
pub fn resolve_limit(case_override: Option<i64>, challenge_default: Option<i64>, platform: i64) -> i64 {
    case_override.or(challenge_default).unwrap_or(platform)
}

/// One code + input pair to run; constructed fresh per test case
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub language: Language,
    pub source_code: String,
    pub input: String,
    pub time_limit_ms: u64,
    pub memory_limit_mb: u64,
}

/// Terminal state of one execution
///
/// The lifecycle is PENDING -> RUNNING -> one of these; no state is ever
/// revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecStatus {
    Completed,
    RuntimeError,
    Timeout,
    SystemError,
}

/// Outcome of a single sandboxed run, owned by the caller that requested it
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub output: String,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    pub memory_used_kb: Option<u64>,
    pub status: ExecStatus,
}

impl ExecutionResult {
    pub(crate) fn system_error(message: String, execution_time_ms: u64) -> Self {
        Self {
            output: String::new(),
            error: Some(message),
            execution_time_ms,
            memory_used_kb: None,
            status: ExecStatus::SystemError,
        }
    }

    pub(crate) fn timeout(time_limit_ms: u64, execution_time_ms: u64) -> Self {
        Self {
            output: String::new(),
            error: Some(format!("Time limit exceeded after {time_limit_ms}ms")),
            execution_time_ms,
            memory_used_kb: None,
            status: ExecStatus::Timeout,
        }
    }
}

/// Runs execution requests under the strategy their language declares
#[derive(Clone)]
pub struct SandboxExecutor {
    sandbox: SandboxConfig,
}

impl SandboxExecutor {
    pub fn new(sandbox: SandboxConfig) -> Self {
        Self { sandbox }
    }

    /// Executes one request to completion or failure
    ///
    /// Never propagates an error: runtime faults, timeouts and infrastructure
    /// failures all come back as a terminal [`ExecStatus`].
    pub async fn execute(&self, request: &ExecutionRequest) -> ExecutionResult {
        log::debug!(
            "Executing {} submission ({} ms / {} MB)",
            request.language.as_str(),
            request.time_limit_ms,
            request.memory_limit_mb
        );

        let result = match request.language.strategy() {
            ExecutionStrategy::Interpreter => interpreter::execute(request).await,
            ExecutionStrategy::Container => container::execute(&self.sandbox, request).await,
        };

        log::debug!(
            "Execution finished with status {:?} in {} ms",
            result.status,
            result.execution_time_ms
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_fallback_prefers_case_then_challenge_then_platform() {
        assert_eq!(resolve_limit(Some(100), Some(2000), 5000), 100);
        assert_eq!(resolve_limit(None, Some(2000), 5000), 2000);
        assert_eq!(resolve_limit(None, None, 5000), 5000);
    }
}
