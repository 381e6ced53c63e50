use super::*;

use crate::sandbox::{CheckerRequest, RunRequest, status};
use crate::task::{Checker, JudgeData, JudgeOutcome, JudgeVerdict};

impl PipelineHandler {
    /// Runs a compiled submission against one test case and scores its
    /// output with a checker.
    pub(super) async fn judge(&self, data: JudgeData) -> Result<TaskResult, HandlerError> {
        let binary = self.artifact(data.binary_cache_id)?;
        let input = self.artifact(data.input_cache_id)?;
        let answer = self.artifact(data.output_cache_id)?;
        let checker = Checker::parse(&data.checker_name);

        let ws = self.workspace("judge")?;
        let program = ws.file("program");
        stage_executable(&binary.path, &program)?;
        let input_path = ws.file("input.txt");
        stage(&input.path, &input_path)?;
        let answer_path = ws.file("answer.txt");
        stage(&answer.path, &answer_path)?;

        // Resolve the checker before spending sandbox time on the run.
        let checker_path = match &checker {
            Checker::Custom(id) => {
                let cached = self.artifact(*id)?;
                let staged = ws.file("checker");
                stage_executable(&cached.path, &staged)?;
                staged
            }
            Checker::Builtin(name) => self
                .sandbox
                .compile_checker(name)
                .await
                .map_err(HandlerError::Sandbox)?,
        };

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

        let fault = if run.result.status == status::TIME_LIMIT {
            Some(JudgeVerdict::TimeLimitExceeded)
        } else if run.result.status == status::MEMORY_LIMIT {
            Some(JudgeVerdict::MemoryLimitExceeded)
        } else if run.result.status != status::EXITED || run.result.code != Some(0) {
            Some(JudgeVerdict::RuntimeError)
        } else {
            None
        };
        if let Some(verdict) = fault {
            // No checker pass for a faulted run.
            return Ok(TaskResult::Judge(JudgeOutcome {
                status: verdict,
                score: 0.0,
                normalized_score: 0.0,
                time: run.result.time_ms,
                memory: run.result.memory_kb,
                output: run.output,
                checker_message: None,
            }));
        }

        let output_path = ws.file("output.txt");
        fs::write(&output_path, &run.output)?;

        let check = self
            .sandbox
            .run_checker(CheckerRequest {
                checker_path: &checker_path,
                input_path: &input_path,
                output_path: &output_path,
                answer_path: &answer_path,
                use_testlib: checker.use_testlib(),
            })
            .await
            .map_err(HandlerError::Sandbox)?;

        // Anything at or below zero is a plain wrong answer; negative
        // scores are not given special treatment.
        let status = if check.normalized_score >= 1.0 {
            JudgeVerdict::Accepted
        } else if check.normalized_score > 0.0 {
            JudgeVerdict::PartialAccepted
        } else {
            JudgeVerdict::WrongAnswer
        };

        Ok(TaskResult::Judge(JudgeOutcome {
            status,
            score: check.score,
            normalized_score: check.normalized_score,
            time: run.result.time_ms,
            memory: run.result.memory_kb,
            output: run.output,
            checker_message: Some(check.message),
        }))
    }
}
