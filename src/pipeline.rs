mod compile;
mod interactive;
mod judge;
mod run;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::cache::{ArtifactCache, CachedArtifact};
use crate::sandbox::SandboxRuntime;
use crate::scheduler::TaskHandler;
use crate::task::{HandlerError, TaskData, TaskResult};

/// Glue between the artifact cache, the sandbox runtime, and verdict
/// synthesis. One instance serves every task type; the dispatch loop calls
/// it from worker tasks, so all methods take `&self`.
pub struct PipelineHandler {
    cache: Arc<ArtifactCache>,
    sandbox: Arc<dyn SandboxRuntime>,
    scratch_root: PathBuf,
}

impl PipelineHandler {
    pub fn new(
        cache: Arc<ArtifactCache>,
        sandbox: Arc<dyn SandboxRuntime>,
        scratch_root: PathBuf,
    ) -> Self {
        Self {
            cache,
            sandbox,
            scratch_root,
        }
    }

    /// Resolves a handle, failing the task if it is gone. A handle that was
    /// valid at submission but expired before the worker got to it fails
    /// here too; the scheduler does not re-validate.
    fn artifact(&self, id: Uuid) -> Result<CachedArtifact, HandlerError> {
        self.cache.get(id).ok_or(HandlerError::ArtifactGone(id))
    }

    fn workspace(&self, prefix: &str) -> Result<Workspace, HandlerError> {
        Ok(Workspace::create(&self.scratch_root, prefix)?)
    }
}

#[async_trait]
impl TaskHandler for PipelineHandler {
    async fn handle(&self, data: TaskData) -> Result<TaskResult, HandlerError> {
        match data {
            TaskData::Compile(data) => self.compile(data, false).await,
            TaskData::CompileChecker(data) => self.compile(data, true).await,
            TaskData::Judge(data) => self.judge(data).await,
            TaskData::Run(data) => self.run(data).await,
            TaskData::Interactive(data) => self.interactive(data).await,
        }
    }
}

/// Ephemeral working directory, removed on drop so every exit path of a
/// handler cleans up after itself.
pub(crate) struct Workspace {
    dir: PathBuf,
}

impl Workspace {
    pub(crate) fn create(root: &Path, prefix: &str) -> std::io::Result<Self> {
        let dir = root.join(format!(
            "{prefix}-{}-{}",
            Utc::now().timestamp_millis(),
            Uuid::new_v4()
        ));
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub(crate) fn file(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.dir) {
            if e.kind() != std::io::ErrorKind::NotFound {
                log::warn!("failed to remove workspace {}: {e}", self.dir.display());
            }
        }
    }
}

pub(crate) fn stage(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to)?;
    Ok(())
}

pub(crate) fn stage_executable(from: &Path, to: &Path) -> std::io::Result<()> {
    fs::copy(from, to)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(to, fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ArtifactType;
    use crate::sandbox::{
        self, CheckerOutput, CheckerRequest, CompileOutput, CompileRequest, InteractiveOutput,
        InteractiveProcessResult, InteractiveRequest, InteractiveVerdict,
        InteractiveVerdictRecord, ProcessStatus, RunOutput, RunRequest,
    };
    use crate::task::{
        CompileData, InteractiveData, JudgeData, JudgeVerdict, RunData, RunVerdict, TaskResult,
    };
    use anyhow::Result;
    use std::sync::Mutex;

    /// Scripted sandbox: hands back configured outcomes and records
    /// cleanup calls, so pipeline logic is tested without a compiler.
    struct StubSandbox {
        compile_success: bool,
        run_status: i32,
        run_code: Option<i32>,
        checker_score: f64,
        interactive_verdict: InteractiveVerdict,
        cleaned: Mutex<Vec<PathBuf>>,
    }

    impl Default for StubSandbox {
        fn default() -> Self {
            Self {
                compile_success: true,
                run_status: sandbox::status::EXITED,
                run_code: Some(0),
                checker_score: 100.0,
                interactive_verdict: InteractiveVerdict::Accepted,
                cleaned: Mutex::new(Vec::new()),
            }
        }
    }

    fn outcome(status: i32, code: Option<i32>) -> ProcessStatus {
        ProcessStatus {
            status,
            code,
            time_ms: 42,
            memory_kb: 0,
        }
    }

    #[async_trait]
    impl SandboxRuntime for StubSandbox {
        async fn compile(&self, req: CompileRequest<'_>) -> Result<CompileOutput> {
            let temp_dir = std::env::temp_dir().join(format!("stub-build-{}", req.submission_id));
            fs::create_dir_all(&temp_dir)?;
            if !self.compile_success {
                return Ok(CompileOutput {
                    success: false,
                    compile_info: "main.cpp:1:1: error: expected ';'".to_string(),
                    executable_path: None,
                    temp_dir: Some(temp_dir),
                });
            }
            let executable = temp_dir.join("program");
            fs::write(&executable, b"STUB-BINARY")?;
            Ok(CompileOutput {
                success: true,
                compile_info: String::new(),
                executable_path: Some(executable),
                temp_dir: Some(temp_dir),
            })
        }

        async fn compile_checker(&self, name: &str) -> Result<PathBuf> {
            let path = std::env::temp_dir().join(format!("stub-checker-{name}"));
            fs::write(&path, b"STUB-CHECKER")?;
            Ok(path)
        }

        async fn run_program(&self, req: RunRequest<'_>) -> Result<RunOutput> {
            assert!(req.executable_path.is_file(), "binary must be staged");
            assert!(req.input_path.is_file(), "input must be staged");
            Ok(RunOutput {
                result: outcome(self.run_status, self.run_code),
                output: "3\n".to_string(),
                error: String::new(),
            })
        }

        async fn run_checker(&self, req: CheckerRequest<'_>) -> Result<CheckerOutput> {
            assert!(req.output_path.is_file(), "output must be written first");
            Ok(CheckerOutput {
                score: self.checker_score,
                normalized_score: self.checker_score / 100.0,
                message: "1 numbers".to_string(),
            })
        }

        async fn run_interactive(&self, req: InteractiveRequest<'_>) -> Result<InteractiveOutput> {
            assert!(req.user_executable_path.is_file());
            assert!(req.interactor_executable_path.is_file());
            let verdict = self.interactive_verdict;
            Ok(InteractiveOutput {
                verdict: InteractiveVerdictRecord {
                    verdict,
                    score: if verdict == InteractiveVerdict::Accepted {
                        100.0
                    } else {
                        0.0
                    },
                    normalized_score: if verdict == InteractiveVerdict::Accepted {
                        1.0
                    } else {
                        0.0
                    },
                    message: "guessed in 7 tries".to_string(),
                    reason: None,
                },
                user_result: InteractiveProcessResult {
                    result: outcome(sandbox::status::EXITED, Some(0)),
                    stderr: String::new(),
                },
                interactor_result: InteractiveProcessResult {
                    result: outcome(sandbox::status::EXITED, Some(0)),
                    stderr: String::new(),
                },
            })
        }

        async fn cleanup_temp_dir(&self, path: &Path) {
            self.cleaned.lock().unwrap().push(path.to_path_buf());
            let _ = fs::remove_dir_all(path);
        }
    }

    struct Fixture {
        _cache_dir: tempfile::TempDir,
        scratch_dir: tempfile::TempDir,
        cache: Arc<ArtifactCache>,
        sandbox: Arc<StubSandbox>,
        handler: PipelineHandler,
    }

    fn fixture(sandbox: StubSandbox) -> Fixture {
        let cache_dir = tempfile::tempdir().unwrap();
        let scratch_dir = tempfile::tempdir().unwrap();
        let cache = Arc::new(ArtifactCache::new(cache_dir.path()).unwrap());
        let sandbox = Arc::new(sandbox);
        let handler = PipelineHandler::new(
            cache.clone(),
            sandbox.clone(),
            scratch_dir.path().to_path_buf(),
        );
        Fixture {
            _cache_dir: cache_dir,
            scratch_dir,
            cache,
            sandbox,
            handler,
        }
    }

    fn scratch_is_empty(fx: &Fixture) -> bool {
        fs::read_dir(fx.scratch_dir.path()).unwrap().next().is_none()
    }

    fn judge_data(fx: &Fixture, checker_name: &str) -> JudgeData {
        JudgeData {
            binary_cache_id: fx
                .cache
                .put(ArtifactType::Binary, b"STUB-BINARY", "program")
                .unwrap(),
            input_cache_id: fx.cache.put(ArtifactType::Input, b"1 2", "in").unwrap(),
            output_cache_id: fx.cache.put(ArtifactType::Output, b"3", "ans").unwrap(),
            checker_name: checker_name.to_string(),
            time_limit: 1000,
            memory_limit: 131072,
            is_file_input: false,
            input_file_name: "input.txt".to_string(),
            output_file_name: "output.txt".to_string(),
        }
    }

    #[tokio::test]
    async fn compile_stores_binary_and_cleans_sandbox_temp() {
        let fx = fixture(StubSandbox::default());
        let source = fx
            .cache
            .put(ArtifactType::Source, b"int main() {}", "main.cpp")
            .unwrap();

        let result = fx
            .handler
            .handle(TaskData::Compile(CompileData {
                source_cache_id: source,
                language: "cpp".to_string(),
            }))
            .await
            .unwrap();

        let TaskResult::Compile(outcome) = result else {
            panic!("expected compile result");
        };
        assert!(outcome.success);
        let binary = fx.cache.get(outcome.binary_cache_id.unwrap()).unwrap();
        assert_eq!(binary.artifact_type, ArtifactType::Binary);
        assert_eq!(fs::read(&binary.path).unwrap(), b"STUB-BINARY");
        assert_eq!(fx.sandbox.cleaned.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failed_compile_completes_with_compiler_output() {
        let fx = fixture(StubSandbox {
            compile_success: false,
            ..StubSandbox::default()
        });
        let source = fx
            .cache
            .put(ArtifactType::Source, b"int main() {", "main.cpp")
            .unwrap();

        let result = fx
            .handler
            .handle(TaskData::Compile(CompileData {
                source_cache_id: source,
                language: "cpp".to_string(),
            }))
            .await
            .unwrap();

        let TaskResult::Compile(outcome) = result else {
            panic!("expected compile result");
        };
        assert!(!outcome.success);
        assert!(outcome.binary_cache_id.is_none());
        assert!(outcome.compile_info.contains("error"));
        assert_eq!(fx.sandbox.cleaned.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn checker_compile_stores_under_checker_namespace() {
        let fx = fixture(StubSandbox::default());
        let source = fx
            .cache
            .put(ArtifactType::Source, b"// checker", "chk.cpp")
            .unwrap();

        let result = fx
            .handler
            .handle(TaskData::CompileChecker(CompileData {
                source_cache_id: source,
                language: "cpp".to_string(),
            }))
            .await
            .unwrap();

        let TaskResult::CompileChecker(outcome) = result else {
            panic!("expected checker compile result");
        };
        let checker = fx.cache.get(outcome.checker_cache_id.unwrap()).unwrap();
        assert_eq!(checker.artifact_type, ArtifactType::Checker);
    }

    #[tokio::test]
    async fn judge_accepted_round_trip() {
        let fx = fixture(StubSandbox::default());
        let data = judge_data(&fx, "ncmp");

        let result = fx.handler.handle(TaskData::Judge(data)).await.unwrap();
        let TaskResult::Judge(outcome) = result else {
            panic!("expected judge result");
        };
        assert_eq!(outcome.status, JudgeVerdict::Accepted);
        assert_eq!(outcome.score, 100.0);
        assert_eq!(outcome.normalized_score, 1.0);
        assert_eq!(outcome.checker_message.as_deref(), Some("1 numbers"));
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn judge_zero_score_is_wrong_answer() {
        let fx = fixture(StubSandbox {
            checker_score: 0.0,
            ..StubSandbox::default()
        });
        let data = judge_data(&fx, "ncmp");

        let result = fx.handler.handle(TaskData::Judge(data)).await.unwrap();
        let TaskResult::Judge(outcome) = result else {
            panic!("expected judge result");
        };
        assert_eq!(outcome.status, JudgeVerdict::WrongAnswer);
        assert_eq!(outcome.score, 0.0);
    }

    #[tokio::test]
    async fn judge_partial_score_is_partial_accepted() {
        let fx = fixture(StubSandbox {
            checker_score: 35.0,
            ..StubSandbox::default()
        });
        let data = judge_data(&fx, "ncmp");

        let result = fx.handler.handle(TaskData::Judge(data)).await.unwrap();
        let TaskResult::Judge(outcome) = result else {
            panic!("expected judge result");
        };
        assert_eq!(outcome.status, JudgeVerdict::PartialAccepted);
        assert_eq!(outcome.normalized_score, 0.35);
    }

    #[tokio::test]
    async fn judge_time_limit_skips_checker() {
        let fx = fixture(StubSandbox {
            run_status: sandbox::status::TIME_LIMIT,
            run_code: None,
            ..StubSandbox::default()
        });
        let data = judge_data(&fx, "ncmp");

        let result = fx.handler.handle(TaskData::Judge(data)).await.unwrap();
        let TaskResult::Judge(outcome) = result else {
            panic!("expected judge result");
        };
        assert_eq!(outcome.status, JudgeVerdict::TimeLimitExceeded);
        assert!(outcome.checker_message.is_none());
        assert_eq!(outcome.score, 0.0);
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn judge_nonzero_exit_is_runtime_error() {
        let fx = fixture(StubSandbox {
            run_code: Some(1),
            ..StubSandbox::default()
        });
        let data = judge_data(&fx, "ncmp");

        let result = fx.handler.handle(TaskData::Judge(data)).await.unwrap();
        let TaskResult::Judge(outcome) = result else {
            panic!("expected judge result");
        };
        assert_eq!(outcome.status, JudgeVerdict::RuntimeError);
        assert!(outcome.checker_message.is_none());
    }

    #[tokio::test]
    async fn judge_with_custom_checker_handle() {
        let fx = fixture(StubSandbox::default());
        let mut data = judge_data(&fx, "");
        let checker = fx
            .cache
            .put(ArtifactType::Checker, b"STUB-CHECKER", "checker")
            .unwrap();
        data.checker_name = checker.to_string();

        let result = fx.handler.handle(TaskData::Judge(data)).await.unwrap();
        let TaskResult::Judge(outcome) = result else {
            panic!("expected judge result");
        };
        assert_eq!(outcome.status, JudgeVerdict::Accepted);
    }

    #[tokio::test]
    async fn missing_artifact_fails_the_task() {
        let fx = fixture(StubSandbox::default());
        let mut data = judge_data(&fx, "ncmp");
        data.binary_cache_id = Uuid::new_v4();

        let err = fx
            .handler
            .handle(TaskData::Judge(data))
            .await
            .expect_err("judging a missing binary should fail");
        assert!(err.to_string().contains("not found or expired"));
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn missing_custom_checker_fails_the_task() {
        let fx = fixture(StubSandbox::default());
        let mut data = judge_data(&fx, "");
        data.checker_name = Uuid::new_v4().to_string();

        let err = fx
            .handler
            .handle(TaskData::Judge(data))
            .await
            .expect_err("missing checker handle should fail");
        assert!(err.to_string().contains("not found or expired"));
    }

    #[tokio::test]
    async fn run_reports_exited_normally() {
        let fx = fixture(StubSandbox::default());
        let data = RunData {
            binary_cache_id: fx
                .cache
                .put(ArtifactType::Binary, b"STUB-BINARY", "program")
                .unwrap(),
            input_cache_id: fx.cache.put(ArtifactType::Input, b"1 2", "in").unwrap(),
            time_limit: 1000,
            memory_limit: 131072,
            is_file_input: false,
            input_file_name: "input.txt".to_string(),
            output_file_name: "output.txt".to_string(),
        };

        let result = fx.handler.handle(TaskData::Run(data)).await.unwrap();
        let TaskResult::Run(outcome) = result else {
            panic!("expected run result");
        };
        assert_eq!(outcome.status, RunVerdict::ExitedNormally);
        assert_eq!(outcome.code, Some(0));
        assert_eq!(outcome.output, "3\n");
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn run_reports_non_zero_exit() {
        let fx = fixture(StubSandbox {
            run_code: Some(2),
            ..StubSandbox::default()
        });
        let data = RunData {
            binary_cache_id: fx
                .cache
                .put(ArtifactType::Binary, b"STUB-BINARY", "program")
                .unwrap(),
            input_cache_id: fx.cache.put(ArtifactType::Input, b"", "in").unwrap(),
            time_limit: 1000,
            memory_limit: 131072,
            is_file_input: false,
            input_file_name: "input.txt".to_string(),
            output_file_name: "output.txt".to_string(),
        };

        let result = fx.handler.handle(TaskData::Run(data)).await.unwrap();
        let TaskResult::Run(outcome) = result else {
            panic!("expected run result");
        };
        assert_eq!(outcome.status, RunVerdict::NonZeroExit);
        assert_eq!(outcome.code, Some(2));
    }

    fn interactive_data(fx: &Fixture) -> InteractiveData {
        InteractiveData {
            user_binary_cache_id: fx
                .cache
                .put(ArtifactType::Binary, b"STUB-USER", "user")
                .unwrap(),
            interactor_binary_cache_id: fx
                .cache
                .put(ArtifactType::Binary, b"STUB-INTERACTOR", "interactor")
                .unwrap(),
            time_limit: 1000,
            memory_limit: 131072,
            interactor_time_limit: 5000,
            interactor_memory_limit: 131072,
            input_cache_id: Some(fx.cache.put(ArtifactType::Input, b"42", "in").unwrap()),
            score_file_name: "score.txt".to_string(),
            message_file_name: "message.txt".to_string(),
        }
    }

    #[tokio::test]
    async fn interactive_passes_verdict_through() {
        let fx = fixture(StubSandbox::default());

        let result = fx
            .handler
            .handle(TaskData::Interactive(interactive_data(&fx)))
            .await
            .unwrap();
        let TaskResult::Interactive(outcome) = result else {
            panic!("expected interactive result");
        };
        assert_eq!(outcome.verdict, InteractiveVerdict::Accepted);
        assert_eq!(outcome.normalized_score, 1.0);
        assert_eq!(outcome.message, "guessed in 7 tries");
        assert!(scratch_is_empty(&fx));
    }

    #[tokio::test]
    async fn interactive_judgement_failed_fails_the_task() {
        let fx = fixture(StubSandbox {
            interactive_verdict: InteractiveVerdict::JudgementFailed,
            ..StubSandbox::default()
        });

        let err = fx
            .handler
            .handle(TaskData::Interactive(interactive_data(&fx)))
            .await
            .expect_err("judgement-failed should fail the task");
        assert!(matches!(err, HandlerError::Judgement(_)));
        assert!(scratch_is_empty(&fx));
    }

    #[test]
    fn workspace_removes_itself_on_drop() {
        let scratch = tempfile::tempdir().unwrap();
        let path = {
            let ws = Workspace::create(scratch.path(), "judge").unwrap();
            fs::write(ws.file("input.txt"), b"1 2").unwrap();
            ws.file("input.txt").parent().unwrap().to_path_buf()
        };
        assert!(!path.exists());
        assert!(fs::read_dir(scratch.path()).unwrap().next().is_none());
    }
}
