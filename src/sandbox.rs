mod process;

pub use process::ProcessSandbox;

use std::path::{Path, PathBuf};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

/// Status codes reported by the sandbox for a supervised process.
///
/// Anything outside this set is a sandbox-level fault.
pub mod status {
    pub const EXITED: i32 = 1;
    pub const TIME_LIMIT: i32 = 2;
    pub const MEMORY_LIMIT: i32 = 3;
}

#[derive(Debug)]
pub struct CompileRequest<'a> {
    pub source_code: &'a [u8],
    pub language: &'a str,
    pub submission_id: Uuid,
    /// Checker builds get the testlib header on the include path.
    pub is_checker: bool,
}

#[derive(Debug)]
pub struct CompileOutput {
    pub success: bool,
    pub compile_info: String,
    pub executable_path: Option<PathBuf>,
    /// Build directory owned by the caller; release it with `cleanup_temp_dir`.
    pub temp_dir: Option<PathBuf>,
}

#[derive(Debug)]
pub struct RunRequest<'a> {
    pub executable_path: &'a Path,
    pub input_path: &'a Path,
    pub language: &'a str,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    /// File-input mode: the program reads `input_file_name` from its working
    /// directory and writes `output_file_name`, instead of using stdio.
    pub is_file_input: bool,
    pub input_file_name: &'a str,
    pub output_file_name: &'a str,
}

/// Outcome of one supervised process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessStatus {
    /// See [`status`].
    pub status: i32,
    /// Exit code when the process exited on its own; `None` when it was
    /// killed by a signal or by the supervisor.
    pub code: Option<i32>,
    pub time_ms: u64,
    pub memory_kb: u64,
}

#[derive(Debug)]
pub struct RunOutput {
    pub result: ProcessStatus,
    /// Captured stdout, or the named output file in file-input mode.
    pub output: String,
    /// Captured stderr.
    pub error: String,
}

#[derive(Debug)]
pub struct CheckerRequest<'a> {
    pub checker_path: &'a Path,
    pub input_path: &'a Path,
    pub output_path: &'a Path,
    pub answer_path: &'a Path,
    /// testlib convention: verdict via exit code, message on stderr.
    /// Otherwise the checker prints a 0-100 score on stdout.
    pub use_testlib: bool,
}

#[derive(Debug)]
pub struct CheckerOutput {
    /// Raw score on the checker's own 0-100 scale.
    pub score: f64,
    /// Score normalized into [0, 1].
    pub normalized_score: f64,
    pub message: String,
}

#[derive(Debug)]
pub struct InteractiveRequest<'a> {
    pub user_executable_path: &'a Path,
    pub interactor_executable_path: &'a Path,
    pub time_limit_ms: u64,
    pub memory_limit_kb: u64,
    pub interactor_time_limit_ms: u64,
    pub interactor_memory_limit_kb: u64,
    /// Staged as `input.txt` in the working directory when present.
    pub interactor_input_path: Option<&'a Path>,
    pub score_file_name: &'a str,
    pub message_file_name: &'a str,
}

/// Classified outcome of an interactive session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InteractiveVerdict {
    Accepted,
    Partial,
    WrongAnswer,
    UserError,
    InteractorError,
    InvalidInteraction,
    JudgementFailed,
}

#[derive(Debug)]
pub struct InteractiveVerdictRecord {
    pub verdict: InteractiveVerdict,
    pub score: f64,
    pub normalized_score: f64,
    /// Contents of the interactor's message file.
    pub message: String,
    pub reason: Option<String>,
}

#[derive(Debug)]
pub struct InteractiveProcessResult {
    pub result: ProcessStatus,
    pub stderr: String,
}

#[derive(Debug)]
pub struct InteractiveOutput {
    pub verdict: InteractiveVerdictRecord,
    pub user_result: InteractiveProcessResult,
    pub interactor_result: InteractiveProcessResult,
}

/// The operations the evaluation core consumes from the sandbox runtime.
///
/// Any runtime satisfying this contract can be substituted; the bundled
/// [`ProcessSandbox`] supervises plain OS processes with timeout
/// enforcement only.
#[async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Compiles a submission (or checker) into an executable inside a fresh
    /// temp directory owned by the caller.
    async fn compile(&self, req: CompileRequest<'_>) -> Result<CompileOutput>;

    /// Materializes a bundled built-in checker, compiling it on first use.
    async fn compile_checker(&self, name: &str) -> Result<PathBuf>;

    /// Runs a contestant program under resource limits.
    async fn run_program(&self, req: RunRequest<'_>) -> Result<RunOutput>;

    /// Runs a checker over (input, output, answer).
    async fn run_checker(&self, req: CheckerRequest<'_>) -> Result<CheckerOutput>;

    /// Runs user and interactor with their stdio cross-wired and reads the
    /// interactor-written score/message files into a verdict.
    async fn run_interactive(&self, req: InteractiveRequest<'_>) -> Result<InteractiveOutput>;

    /// Best-effort removal of a temp directory returned by `compile`.
    async fn cleanup_temp_dir(&self, path: &Path);
}
