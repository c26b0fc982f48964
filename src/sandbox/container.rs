//! Disposable-container strategy for compiled and system languages
//!
//! Every execution gets a fresh working directory holding the source and
//! input files, bind-mounted into a network-disabled container with memory
//! and swap capped at the requested limit, a pids ceiling and a read-only
//! root filesystem. The container command compiles (where applicable) and
//! runs the program with stdin/stdout/stderr redirected to files inside the
//! working directory. Completion is raced against an external timer; the
//! container and the working directory are removed on every exit path.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result, bail};
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, RemoveContainerOptions,
    StartContainerOptions, WaitContainerOptions,
};
use bollard::models::HostConfig;
use futures_util::StreamExt;
use uuid::Uuid;

use crate::config::SandboxConfig;
use crate::language::Language;

use super::{ExecStatus, ExecutionRequest, ExecutionResult};

/// Extra race-timer budget for languages that compile inside the container
const COMPILE_TIME_ALLOWANCE_MS: u64 = 30_000;
const CONTAINER_PIDS_LIMIT: i64 = 64;
const MOUNT_POINT: &str = "/box";

pub(super) async fn execute(sandbox: &SandboxConfig, request: &ExecutionRequest) -> ExecutionResult {
    let started = Instant::now();
    match run_container(sandbox, request).await {
        Ok(result) => result,
        Err(e) => ExecutionResult::system_error(
            format!("Container execution failed: {e:#}"),
            started.elapsed().as_millis() as u64,
        ),
    }
}

/// Per-execution working directory, removed unconditionally on drop
struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    fn create(root: &Path) -> Result<Self> {
        let dir = root.join(format!("codequest-box-{}", Uuid::new_v4()));
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create working directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path(&self) -> &Path {
        &self.dir
    }

    fn read_file(&self, name: &str) -> String {
        fs::read_to_string(self.dir.join(name)).unwrap_or_default()
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.dir.exists() {
            if let Err(e) = fs::remove_dir_all(&self.dir) {
                log::warn!(
                    "Failed to remove working directory {}: {e}",
                    self.dir.display()
                );
            }
        }
    }
}

/// Shell command run inside the container for each container language
fn run_script(language: Language) -> Result<String> {
    let script = match language {
        Language::Python => {
            "python3 /box/main.py < /box/input.txt > /box/stdout.txt 2> /box/stderr.txt"
        }
        Language::Java => {
            "cd /box && javac Main.java > compile.txt 2>&1 \
             && java Main < input.txt > stdout.txt 2> stderr.txt"
        }
        Language::Cpp => {
            "cd /box && g++ -O2 -std=c++17 -o main main.cpp > compile.txt 2>&1 \
             && ./main < input.txt > stdout.txt 2> stderr.txt"
        }
        Language::JavaScript | Language::TypeScript => {
            bail!("language {language:?} is not handled by the container strategy")
        }
    };
    Ok(script.to_string())
}

fn compiles_in_container(language: Language) -> bool {
    matches!(language, Language::Java | Language::Cpp)
}

async fn run_container(sandbox: &SandboxConfig, request: &ExecutionRequest) -> Result<ExecutionResult> {
    let script = run_script(request.language)?;

    let root = sandbox
        .workspace_root
        .clone()
        .unwrap_or_else(std::env::temp_dir);
    let workspace = Workspace::create(&root)?;

    fs::write(
        workspace.path().join(request.language.source_file_name()),
        format!("{}\n", request.source_code),
    )?;
    fs::write(workspace.path().join("input.txt"), &request.input)?;

    let docker =
        Docker::connect_with_local_defaults().context("Failed to connect to container runtime")?;

    let memory_bytes = request.memory_limit_mb as i64 * 1024 * 1024;
    let image = sandbox.images.resolve(request.language);
    let bind = format!("{}:{}", workspace.path().display(), MOUNT_POINT);

    let config = Config {
        image: Some(image),
        cmd: Some(vec!["/bin/sh".to_string(), "-c".to_string(), script]),
        network_disabled: Some(true),
        host_config: Some(HostConfig {
            binds: Some(vec![bind]),
            // memory and swap capped to the same value: no swap headroom
            memory: Some(memory_bytes),
            memory_swap: Some(memory_bytes),
            pids_limit: Some(CONTAINER_PIDS_LIMIT),
            readonly_rootfs: Some(true),
            tmpfs: Some(HashMap::from([(
                "/tmp".to_string(),
                "rw,size=16m".to_string(),
            )])),
            ..Default::default()
        }),
        ..Default::default()
    };

    let name = format!("codequest-{}", Uuid::new_v4());
    let create_options = CreateContainerOptions {
        name: name.as_str(),
        platform: None,
    };
    let container = docker
        .create_container(Some(create_options), config)
        .await
        .context("Failed to create container")?;

    let result = drive_container(&docker, &container.id, request, &workspace).await;

    // Removal must run on every path; failures are logged, never surfaced,
    // since the verdict is already decided by now.
    let remove_options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    if let Err(e) = docker.remove_container(&container.id, Some(remove_options)).await {
        log::warn!("Failed to remove container {name}: {e}");
    }

    result
}

/// Starts the container and races its completion against the wall-clock limit
async fn drive_container(
    docker: &Docker,
    container_id: &str,
    request: &ExecutionRequest,
    workspace: &Workspace,
) -> Result<ExecutionResult> {
    let started = Instant::now();
    docker
        .start_container(container_id, None::<StartContainerOptions<String>>)
        .await
        .context("Failed to start container")?;

    let mut budget_ms = request.time_limit_ms;
    if compiles_in_container(request.language) {
        budget_ms += COMPILE_TIME_ALLOWANCE_MS;
    }

    let wait_options = WaitContainerOptions {
        condition: "not-running",
    };
    let mut wait_stream = docker.wait_container(container_id, Some(wait_options));

    let waited = tokio::time::timeout(Duration::from_millis(budget_ms), wait_stream.next()).await;
    let execution_time_ms = started.elapsed().as_millis() as u64;

    let status_code = match waited {
        Err(_) => {
            // External timer won the race; tear the container down before
            // reporting so nothing keeps running.
            if let Err(e) = docker
                .kill_container(container_id, None::<KillContainerOptions<String>>)
                .await
            {
                log::warn!("Failed to kill timed-out container: {e}");
            }
            return Ok(ExecutionResult::timeout(request.time_limit_ms, execution_time_ms));
        }
        Ok(None) => bail!("Container wait stream ended without a response"),
        Ok(Some(Ok(response))) => response.status_code,
        // bollard reports a non-zero exit as a wait error carrying the code
        Ok(Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. }))) => code,
        Ok(Some(Err(e))) => return Err(e).context("Failed to wait for container completion"),
    };

    let output = workspace.read_file("stdout.txt");

    if status_code != 0 {
        let stderr = workspace.read_file("stderr.txt");
        let compile = workspace.read_file("compile.txt");
        let error = if !stderr.trim().is_empty() {
            stderr.trim_end().to_string()
        } else if !compile.trim().is_empty() {
            format!("Compilation failed:\n{}", compile.trim_end())
        } else {
            format!("Process exited with status {status_code}")
        };
        return Ok(ExecutionResult {
            output,
            error: Some(error),
            execution_time_ms,
            memory_used_kb: None,
            status: ExecStatus::RuntimeError,
        });
    }

    Ok(ExecutionResult {
        output,
        error: None,
        execution_time_ms,
        memory_used_kb: None,
        status: ExecStatus::Completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workspace_is_removed_on_drop() {
        let root = std::env::temp_dir();
        let path;
        {
            let workspace = Workspace::create(&root).unwrap();
            path = workspace.path().to_path_buf();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn run_scripts_redirect_all_streams() {
        for lang in [Language::Python, Language::Java, Language::Cpp] {
            let script = run_script(lang).unwrap();
            assert!(script.contains("input.txt"));
            assert!(script.contains("stdout.txt"));
            assert!(script.contains("stderr.txt"));
        }
    }

    #[test]
    fn interpreter_languages_are_rejected() {
        assert!(run_script(Language::JavaScript).is_err());
        assert!(run_script(Language::TypeScript).is_err());
    }
}
