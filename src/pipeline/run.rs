use super::*;

use crate::sandbox::{RunRequest, status};
use crate::task::{RunData, RunOutcome, RunVerdict};

impl PipelineHandler {
    /// Runs a compiled binary against an input without scoring the output.
    pub(super) async fn run(&self, data: RunData) -> Result<TaskResult, HandlerError> {
        let binary = self.artifact(data.binary_cache_id)?;
        let input = self.artifact(data.input_cache_id)?;

        let ws = self.workspace("run")?;
        let program = ws.file("program");
        stage_executable(&binary.path, &program)?;
        let input_path = ws.file("input.txt");
        stage(&input.path, &input_path)?;

        let run = self
            .sandbox
            .run_program(RunRequest {
                executable_path: &program,
                input_path: &input_path,
                language: "cpp",
                time_limit_ms: data.time_limit,
                memory_limit_kb: data.memory_limit,
                is_file_input: data.is_file_input,
                input_file_name: &data.input_file_name,
                output_file_name: &data.output_file_name,
            })
            .await
            .map_err(HandlerError::Sandbox)?;

        let verdict = if run.result.status == status::TIME_LIMIT {
            RunVerdict::TimeLimitExceeded
        } else if run.result.status == status::MEMORY_LIMIT {
            RunVerdict::MemoryLimitExceeded
        } else if run.result.status != status::EXITED {
            RunVerdict::RuntimeError
        } else {
            match run.result.code {
                Some(0) => RunVerdict::ExitedNormally,
                Some(_) => RunVerdict::NonZeroExit,
                // Killed by a signal: the process never exited on its own.
                None => RunVerdict::RuntimeError,
            }
        };

        Ok(TaskResult::Run(RunOutcome {
            status: verdict,
            code: run.result.code,
            time: run.result.time_ms,
            memory: run.result.memory_kb,
            output: run.output,
            error: run.error,
        }))
    }
}
