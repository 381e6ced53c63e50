use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::sandbox::InteractiveVerdict;

/// Built-in checker names recognized as testlib-style.
pub const TESTLIB_BUILTINS: &[&str] = &[
    "icmp", "ncmp", "wcmp", "rcmp", "dcmp", "fcmp", "hcmp", "lcmp", "uncmp", "caseicmp",
    "casencmp", "casewcmp", "yesno", "nyesno", "rcmp4", "rcmp6", "rcmp9", "rncmp", "acmp",
];

fn default_language() -> String {
    "cpp".to_string()
}

fn default_time_limit() -> u64 {
    1000
}

fn default_memory_limit() -> u64 {
    131072
}

fn default_interactor_time_limit() -> u64 {
    5000
}

fn default_input_file() -> String {
    "input.txt".to_string()
}

fn default_output_file() -> String {
    "output.txt".to_string()
}

fn default_score_file() -> String {
    "score.txt".to_string()
}

fn default_message_file() -> String {
    "message.txt".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileData {
    pub source_cache_id: Uuid,
    #[serde(default = "default_language")]
    pub language: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeData {
    pub binary_cache_id: Uuid,
    pub input_cache_id: Uuid,
    pub output_cache_id: Uuid,
    /// Either a built-in checker name or the handle of a compiled custom
    /// checker; see [`Checker::parse`].
    pub checker_name: String,
    /// Milliseconds
    #[serde(default = "default_time_limit")]
    pub time_limit: u64,
    /// Kilobytes
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    #[serde(default)]
    pub is_file_input: bool,
    #[serde(default = "default_input_file")]
    pub input_file_name: String,
    #[serde(default = "default_output_file")]
    pub output_file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunData {
    pub binary_cache_id: Uuid,
    pub input_cache_id: Uuid,
    #[serde(default = "default_time_limit")]
    pub time_limit: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    #[serde(default)]
    pub is_file_input: bool,
    #[serde(default = "default_input_file")]
    pub input_file_name: String,
    #[serde(default = "default_output_file")]
    pub output_file_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveData {
    pub user_binary_cache_id: Uuid,
    pub interactor_binary_cache_id: Uuid,
    #[serde(default = "default_time_limit")]
    pub time_limit: u64,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: u64,
    #[serde(default = "default_interactor_time_limit")]
    pub interactor_time_limit: u64,
    #[serde(default = "default_memory_limit")]
    pub interactor_memory_limit: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_cache_id: Option<Uuid>,
    #[serde(default = "default_score_file")]
    pub score_file_name: String,
    #[serde(default = "default_message_file")]
    pub message_file_name: String,
}

/// Per-type task parameters; the discriminant is the task type.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskData {
    Compile(CompileData),
    CompileChecker(CompileData),
    Judge(JudgeData),
    Run(RunData),
    Interactive(InteractiveData),
}

impl TaskData {
    pub fn kind(&self) -> TaskKind {
        match self {
            Self::Compile(_) => TaskKind::Compile,
            Self::CompileChecker(_) => TaskKind::CompileChecker,
            Self::Judge(_) => TaskKind::Judge,
            Self::Run(_) => TaskKind::Run,
            Self::Interactive(_) => TaskKind::Interactive,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskKind {
    Compile,
    CompileChecker,
    Judge,
    Run,
    Interactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Registry record for a submitted task. `result` and `error` are mutually
/// exclusive and only ever set on the terminal transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRecord {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub data: TaskData,
    pub priority: i32,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum TaskResult {
    Compile(CompileOutcome),
    CompileChecker(CheckerCompileOutcome),
    Judge(JudgeOutcome),
    Run(RunOutcome),
    Interactive(InteractiveOutcome),
}

/// A compile verdict is a completed result even when compilation failed;
/// only tool-level faults fail the task.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompileOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_cache_id: Option<Uuid>,
    pub compile_info: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckerCompileOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checker_cache_id: Option<Uuid>,
    pub compile_info: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum JudgeVerdict {
    Accepted,
    PartialAccepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JudgeOutcome {
    pub status: JudgeVerdict,
    pub score: f64,
    pub normalized_score: f64,
    /// Milliseconds
    pub time: u64,
    /// Kilobytes
    pub memory: u64,
    pub output: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checker_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunVerdict {
    ExitedNormally,
    NonZeroExit,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub status: RunVerdict,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    pub time: u64,
    pub memory: u64,
    pub output: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessReport {
    pub time: u64,
    pub memory: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InteractiveOutcome {
    pub verdict: InteractiveVerdict,
    pub score: f64,
    pub normalized_score: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub user: ProcessReport,
    pub interactor: ProcessReport,
}

/// A checker identifier is dual-mode: UUID-shaped strings name a cached
/// custom checker, anything else a built-in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Checker {
    Builtin(String),
    Custom(Uuid),
}

impl Checker {
    pub fn parse(name: &str) -> Self {
        if is_uuid_shaped(name) {
            if let Ok(id) = Uuid::parse_str(name) {
                return Self::Custom(id);
            }
        }
        Self::Builtin(name.to_string())
    }

    /// Custom checkers were compiled against testlib; built-ins are
    /// testlib-style iff their name is in the known set.
    pub fn use_testlib(&self) -> bool {
        match self {
            Self::Custom(_) => true,
            Self::Builtin(name) => TESTLIB_BUILTINS.contains(&name.as_str()),
        }
    }
}

/// Strictly the 8-4-4-4-12 hex form; `Uuid::parse_str` alone would also
/// admit the undashed and braced spellings.
fn is_uuid_shaped(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 36
        && bytes.iter().enumerate().all(|(i, b)| match i {
            8 | 13 | 18 | 23 => *b == b'-',
            _ => b.is_ascii_hexdigit(),
        })
}

/// Why a pipeline handler gave up; stored on the task as its `error`.
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("artifact {0} not found or expired")]
    ArtifactGone(Uuid),
    #[error("failed to stage working files: {0}")]
    Staging(#[from] std::io::Error),
    #[error("sandbox failure: {0:#}")]
    Sandbox(#[source] anyhow::Error),
    #[error("failed to store artifact: {0:#}")]
    CacheStore(#[source] anyhow::Error),
    #[error("interactor judgement failed: {0}")]
    Judgement(String),
    #[error("task handler panicked")]
    Panicked,
}
