use super::*;

use crate::sandbox::{InteractiveProcessResult, InteractiveRequest, InteractiveVerdict};
use crate::task::{InteractiveData, InteractiveOutcome, ProcessReport};

impl PipelineHandler {
    /// Runs a user program against an interactor with their stdio
    /// cross-wired, passing the interactor's verdict through.
    pub(super) async fn interactive(
        &self,
        data: InteractiveData,
    ) -> Result<TaskResult, HandlerError> {
        let user = self.artifact(data.user_binary_cache_id)?;
        let interactor = self.artifact(data.interactor_binary_cache_id)?;
        let input = match data.input_cache_id {
            Some(id) => Some(self.artifact(id)?),
            None => None,
        };

        let ws = self.workspace("interactive")?;
        let user_path = ws.file("user");
        stage_executable(&user.path, &user_path)?;
        let interactor_path = ws.file("interactor");
        stage_executable(&interactor.path, &interactor_path)?;
        let input_path = match &input {
            Some(artifact) => {
                let staged = ws.file("input.txt");
                stage(&artifact.path, &staged)?;
                Some(staged)
            }
            None => None,
        };

        let session = self
            .sandbox
            .run_interactive(InteractiveRequest {
                user_executable_path: &user_path,
                interactor_executable_path: &interactor_path,
                time_limit_ms: data.time_limit,
                memory_limit_kb: data.memory_limit,
                interactor_time_limit_ms: data.interactor_time_limit,
                interactor_memory_limit_kb: data.interactor_memory_limit,
                interactor_input_path: input_path.as_deref(),
                score_file_name: &data.score_file_name,
                message_file_name: &data.message_file_name,
            })
            .await
            .map_err(HandlerError::Sandbox)?;

        // A broken judgement is a failed task, not a verdict the client
        // should score against.
        if session.verdict.verdict == InteractiveVerdict::JudgementFailed {
            let detail = session
                .verdict
                .reason
                .unwrap_or(session.verdict.message);
            return Err(HandlerError::Judgement(detail));
        }

        Ok(TaskResult::Interactive(InteractiveOutcome {
            verdict: session.verdict.verdict,
            score: session.verdict.score,
            normalized_score: session.verdict.normalized_score,
            message: session.verdict.message,
            reason: session.verdict.reason,
            user: report(&session.user_result),
            interactor: report(&session.interactor_result),
        }))
    }
}

fn report(process: &InteractiveProcessResult) -> ProcessReport {
    ProcessReport {
        time: process.result.time_ms,
        memory: process.result.memory_kb,
        stderr: process.stderr.clone(),
    }
}
