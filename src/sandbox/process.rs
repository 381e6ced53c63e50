use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::time::timeout;

use super::{
    CheckerOutput, CheckerRequest, CompileOutput, CompileRequest, InteractiveOutput,
    InteractiveProcessResult, InteractiveRequest, InteractiveVerdict, InteractiveVerdictRecord,
    ProcessStatus, RunOutput, RunRequest, SandboxRuntime, status,
};

const COMPILE_TIME_LIMIT: Duration = Duration::from_secs(30);
const CHECKER_TIME_LIMIT: Duration = Duration::from_secs(10);

/// A sandbox runtime that supervises plain OS processes.
///
/// ProcessSandbox provides compilation and execution with wall-clock
/// timeout enforcement but no memory, file system, or permission controls,
/// so it never reports a memory-limit status on its own. This is intended
/// for trusted environments; a fully isolating runtime can be swapped in
/// through the [`SandboxRuntime`] trait.
pub struct ProcessSandbox {
    /// Parent of the per-compilation temp directories.
    build_root: PathBuf,
    /// Vendored built-in checker sources (`<name>.cpp`, plus `testlib.h`
    /// for checkers that want it).
    checker_dir: PathBuf,
    /// Compiled built-in checkers, one binary per name.
    checker_bin_dir: PathBuf,
    /// Memoized checker builds; the lock also serializes compilation so a
    /// popular checker is built once, not once per queued task.
    compiled_checkers: tokio::sync::Mutex<HashMap<String, PathBuf>>,
}

impl ProcessSandbox {
    pub fn build(checker_dir: PathBuf) -> Result<Self> {
        let build_root = std::env::temp_dir().join("judge-build");
        // One bin dir per instance so concurrent runtimes never race on
        // the same checker binary.
        let checker_bin_dir = std::env::temp_dir().join(format!(
            "judge-checker-bin-{}",
            uuid::Uuid::new_v4()
        ));
        std::fs::create_dir_all(&build_root)?;
        std::fs::create_dir_all(&checker_bin_dir)?;

        log::warn!("ProcessSandbox provides NO security isolation - use only in trusted environments");

        Ok(Self {
            build_root,
            checker_dir,
            checker_bin_dir,
            compiled_checkers: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    fn toolchain(language: &str) -> Result<(&'static str, &'static str, &'static [&'static str])> {
        const CPP_FLAGS: &[&str] = &["-O2", "-std=c++17"];
        const C_FLAGS: &[&str] = &["-O2", "-std=c11"];
        match language {
            "cpp" => Ok(("g++", "main.cpp", CPP_FLAGS)),
            "c" => Ok(("gcc", "main.c", C_FLAGS)),
            other => bail!("unsupported language {other}"),
        }
    }

    /// Runs a compiler command and returns (success, combined output).
    async fn run_compiler(&self, mut cmd: Command, executable: &Path) -> Result<(bool, String)> {
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let compiled = timeout(COMPILE_TIME_LIMIT, cmd.output()).await;
        match compiled {
            Ok(Ok(output)) => {
                let mut info = String::from_utf8_lossy(&output.stderr).into_owned();
                if !output.stdout.is_empty() {
                    info.push_str(&String::from_utf8_lossy(&output.stdout));
                }
                let success = output.status.success() && executable.is_file();
                Ok((success, info))
            }
            Ok(Err(e)) => Err(anyhow!(e).context("failed to spawn compiler")),
            Err(_) => Ok((
                false,
                format!(
                    "compilation timed out after {}s",
                    COMPILE_TIME_LIMIT.as_secs()
                ),
            )),
        }
    }
}

#[async_trait]
impl SandboxRuntime for ProcessSandbox {
    async fn compile(&self, req: CompileRequest<'_>) -> Result<CompileOutput> {
        let (compiler, source_name, flags) = Self::toolchain(req.language)?;

        let temp_dir = self.build_root.join(format!(
            "judge-build-{}-{}",
            Utc::now().timestamp_millis(),
            req.submission_id
        ));
        tokio::fs::create_dir_all(&temp_dir).await?;
        tokio::fs::write(temp_dir.join(source_name), req.source_code).await?;

        let executable = temp_dir.join("program");
        let mut cmd = Command::new(compiler);
        cmd.args(flags);
        if req.is_checker {
            cmd.arg("-I").arg(&self.checker_dir);
        }
        cmd.arg("-o").arg(&executable).arg(source_name);
        cmd.current_dir(&temp_dir);

        match self.run_compiler(cmd, &executable).await {
            Ok((success, compile_info)) => Ok(CompileOutput {
                success,
                compile_info,
                executable_path: success.then(|| executable),
                temp_dir: Some(temp_dir),
            }),
            Err(e) => {
                // Spawn failures leave nothing worth keeping.
                let _ = tokio::fs::remove_dir_all(&temp_dir).await;
                Err(e)
            }
        }
    }

    async fn compile_checker(&self, name: &str) -> Result<PathBuf> {
        if !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            bail!("invalid built-in checker name {name:?}");
        }

        let mut compiled = self.compiled_checkers.lock().await;
        if let Some(path) = compiled.get(name) {
            if path.is_file() {
                return Ok(path.clone());
            }
        }

        let source = self.checker_dir.join(format!("{name}.cpp"));
        if !source.is_file() {
            bail!(
                "built-in checker {name} has no vendored source under {}",
                self.checker_dir.display()
            );
        }

        let executable = self.checker_bin_dir.join(name);
        let mut cmd = Command::new("g++");
        cmd.args(["-O2", "-std=c++17"])
            .arg("-I")
            .arg(&self.checker_dir)
            .arg("-o")
            .arg(&executable)
            .arg(&source);

        let (success, info) = self.run_compiler(cmd, &executable).await?;
        if !success {
            bail!("failed to compile built-in checker {name}: {info}");
        }

        log::info!("compiled built-in checker {name}");
        compiled.insert(name.to_string(), executable.clone());
        Ok(executable)
    }

    async fn run_program(&self, req: RunRequest<'_>) -> Result<RunOutput> {
        let work_dir = req
            .executable_path
            .parent()
            .context("executable has no parent directory")?;

        if req.is_file_input {
            let staged = work_dir.join(req.input_file_name);
            if staged != req.input_path {
                tokio::fs::copy(req.input_path, &staged).await?;
            }
        }

        let mut cmd = Command::new(req.executable_path);
        cmd.current_dir(work_dir)
            .stdin(if req.is_file_input {
                Stdio::null()
            } else {
                Stdio::piped()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().context("failed to spawn program")?;

        if !req.is_file_input {
            let input = tokio::fs::read(req.input_path).await?;
            if let Some(mut stdin) = child.stdin.take() {
                // The program may exit without draining stdin; that is not
                // an execution failure.
                tokio::spawn(async move {
                    let _ = stdin.write_all(&input).await;
                    let _ = stdin.shutdown().await;
                });
            }
        }

        let stdout_task = drain_pipe(child.stdout.take());
        let stderr_task = drain_pipe(child.stderr.take());

        let limit = Duration::from_millis(req.time_limit_ms);
        let outcome = wait_limited(&mut child, limit).await?;

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();

        let output = if req.is_file_input {
            tokio::fs::read_to_string(work_dir.join(req.output_file_name))
                .await
                .unwrap_or_default()
        } else {
            String::from_utf8_lossy(&stdout).into_owned()
        };

        // memory_kb stays 0: a plain process supervisor cannot attribute
        // peak usage reliably, so the memory limit is not enforced here.
        let _ = req.memory_limit_kb;

        Ok(RunOutput {
            result: outcome,
            output,
            error: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }

    async fn run_checker(&self, req: CheckerRequest<'_>) -> Result<CheckerOutput> {
        let work_dir = req
            .output_path
            .parent()
            .context("output file has no parent directory")?;

        let mut cmd = Command::new(req.checker_path);
        cmd.arg(req.input_path)
            .arg(req.output_path)
            .arg(req.answer_path)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match timeout(CHECKER_TIME_LIMIT, cmd.output()).await {
            Ok(result) => result.context("failed to run checker")?,
            Err(_) => bail!(
                "checker timed out after {}s",
                CHECKER_TIME_LIMIT.as_secs()
            ),
        };

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();

        let score = if req.use_testlib {
            score_from_testlib_exit(&output.status, &stderr)?
        } else {
            // Plain checkers print a 0-100 score on stdout; fall back to the
            // exit code when they do not.
            match stdout.lines().next().and_then(|l| l.trim().parse::<f64>().ok()) {
                Some(score) => score.clamp(0.0, 100.0),
                None if output.status.success() => 100.0,
                None => 0.0,
            }
        };

        Ok(CheckerOutput {
            score,
            normalized_score: score / 100.0,
            message: if stderr.is_empty() { stdout } else { stderr },
        })
    }

    async fn run_interactive(&self, req: InteractiveRequest<'_>) -> Result<InteractiveOutput> {
        let work_dir = req
            .interactor_executable_path
            .parent()
            .context("interactor executable has no parent directory")?;

        if let Some(input) = req.interactor_input_path {
            let staged = work_dir.join("input.txt");
            if staged != input {
                tokio::fs::copy(input, &staged).await?;
            }
        }

        let spawn = |path: &Path| -> Result<Child> {
            let mut cmd = Command::new(path);
            cmd.current_dir(work_dir)
                .stdin(Stdio::piped())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true);
            cmd.spawn()
                .with_context(|| format!("failed to spawn {}", path.display()))
        };

        let mut user = spawn(req.user_executable_path)?;
        let mut interactor = spawn(req.interactor_executable_path)?;

        // Cross-wire the two processes: user stdout feeds interactor stdin
        // and vice versa. When one side exits, its pipe closes and the pump
        // ends, which unblocks the other side's reads.
        pump(user.stdout.take(), interactor.stdin.take());
        pump(interactor.stdout.take(), user.stdin.take());

        let user_err = drain_pipe(user.stderr.take());
        let interactor_err = drain_pipe(interactor.stderr.take());

        let (user_status, interactor_status) = tokio::join!(
            wait_limited(&mut user, Duration::from_millis(req.time_limit_ms)),
            wait_limited(
                &mut interactor,
                Duration::from_millis(req.interactor_time_limit_ms)
            ),
        );
        let user_status = user_status?;
        let interactor_status = interactor_status?;
        let _ = (req.memory_limit_kb, req.interactor_memory_limit_kb);

        let user_result = InteractiveProcessResult {
            result: user_status,
            stderr: String::from_utf8_lossy(&user_err.await.unwrap_or_default()).into_owned(),
        };
        let interactor_result = InteractiveProcessResult {
            result: interactor_status,
            stderr: String::from_utf8_lossy(&interactor_err.await.unwrap_or_default())
                .into_owned(),
        };

        let score = read_score_file(&work_dir.join(req.score_file_name)).await;
        let message = tokio::fs::read_to_string(work_dir.join(req.message_file_name))
            .await
            .map(|m| m.trim().to_string())
            .unwrap_or_default();

        let verdict = classify_interaction(&user_status, &interactor_status, score, message);

        Ok(InteractiveOutput {
            verdict,
            user_result,
            interactor_result,
        })
    }

    async fn cleanup_temp_dir(&self, path: &Path) {
        if let Err(e) = tokio::fs::remove_dir_all(path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to clean up temp dir {}: {e}", path.display());
            }
        }
    }
}

/// Waits for a child under a wall-clock limit; on timeout the child is
/// killed and status 2 is reported.
async fn wait_limited(child: &mut Child, limit: Duration) -> Result<ProcessStatus> {
    let started = Instant::now();
    let (code, timed_out) = match timeout(limit, child.wait()).await {
        Ok(result) => (result.context("failed to wait on child")?.code(), false),
        Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
            (None, true)
        }
    };

    Ok(ProcessStatus {
        status: if timed_out {
            status::TIME_LIMIT
        } else {
            status::EXITED
        },
        code,
        time_ms: started.elapsed().as_millis() as u64,
        memory_kb: 0,
    })
}

/// Collects a child's output pipe in the background so a full pipe buffer
/// never stalls the program.
fn drain_pipe<R>(pipe: Option<R>) -> tokio::task::JoinHandle<Vec<u8>>
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut pipe) = pipe {
            let _ = pipe.read_to_end(&mut buf).await;
        }
        buf
    })
}

/// Copies one process's stdout into the other's stdin, closing the write
/// end at EOF.
fn pump<R, W>(from: Option<R>, to: Option<W>)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
    W: tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        if let (Some(mut from), Some(mut to)) = (from, to) {
            let _ = tokio::io::copy(&mut from, &mut to).await;
            let _ = to.shutdown().await;
        }
    });
}

enum ScoreFile {
    Missing,
    Unreadable(String),
    Value(f64),
}

async fn read_score_file(path: &Path) -> ScoreFile {
    match tokio::fs::read_to_string(path).await {
        Ok(contents) => match contents.trim().parse::<f64>() {
            Ok(value) => ScoreFile::Value(value),
            Err(_) => ScoreFile::Unreadable(format!(
                "score file holds {:?}, expected a number",
                contents.trim()
            )),
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => ScoreFile::Missing,
        Err(e) => ScoreFile::Unreadable(e.to_string()),
    }
}

fn process_failure(outcome: &ProcessStatus) -> Option<String> {
    if outcome.status == status::TIME_LIMIT {
        Some("time-limit-exceeded".to_string())
    } else if outcome.status == status::MEMORY_LIMIT {
        Some("memory-limit-exceeded".to_string())
    } else if outcome.code != Some(0) {
        Some(match outcome.code {
            Some(code) => format!("exited with code {code}"),
            None => "killed by signal".to_string(),
        })
    } else {
        None
    }
}

/// Turns the raw process outcomes and score file into a verdict.
///
/// An interactor-written score wins over a user-process failure: the
/// interactor observed the whole dialog, the exit code only its aftermath.
fn classify_interaction(
    user: &ProcessStatus,
    interactor: &ProcessStatus,
    score: ScoreFile,
    message: String,
) -> InteractiveVerdictRecord {
    let mut record = InteractiveVerdictRecord {
        verdict: InteractiveVerdict::InvalidInteraction,
        score: 0.0,
        normalized_score: 0.0,
        message,
        reason: None,
    };

    if let Some(failure) = process_failure(interactor) {
        record.verdict = InteractiveVerdict::InteractorError;
        record.reason = Some(format!("interactor {failure}"));
        return record;
    }

    match score {
        ScoreFile::Value(value) => {
            record.score = value;
            record.normalized_score = value / 100.0;
            record.verdict = if record.normalized_score >= 1.0 {
                InteractiveVerdict::Accepted
            } else if record.normalized_score > 0.0 {
                InteractiveVerdict::Partial
            } else {
                InteractiveVerdict::WrongAnswer
            };
        }
        ScoreFile::Missing => match process_failure(user) {
            Some(failure) => {
                record.verdict = InteractiveVerdict::UserError;
                record.reason = Some(format!("user program {failure}"));
            }
            None => {
                record.reason = Some("interactor exited without writing a score".to_string());
            }
        },
        ScoreFile::Unreadable(detail) => {
            record.verdict = InteractiveVerdict::JudgementFailed;
            record.reason = Some(detail);
        }
    }

    record
}

/// Maps a testlib checker exit into a score.
///
/// testlib exit codes: 0 ok, 1 wa, 2 pe, 3 fail, 4 dirt, 7 points,
/// 8 unexpected eof. `_fail` means the checker itself broke and is
/// surfaced as an error rather than a verdict.
fn score_from_testlib_exit(exit: &std::process::ExitStatus, stderr: &str) -> Result<f64> {
    match exit.code() {
        Some(0) => Ok(100.0),
        Some(7) => {
            // Partial scoring: the message is "points X ..."
            let points = stderr
                .strip_prefix("points ")
                .and_then(|rest| rest.split_whitespace().next())
                .and_then(|token| token.parse::<f64>().ok());
            match points {
                Some(value) => Ok(value.clamp(0.0, 100.0)),
                None => bail!("checker reported points without a value: {stderr}"),
            }
        }
        Some(3) => bail!("checker failed: {stderr}"),
        Some(_) => Ok(0.0),
        None => bail!("checker killed by signal: {stderr}"),
    }
}
