use super::*;

use anyhow::anyhow;

use crate::cache::ArtifactType;
use crate::sandbox::{CompileOutput, CompileRequest};
use crate::task::{CheckerCompileOutcome, CompileData, CompileOutcome};

impl PipelineHandler {
    /// Compiles a cached source into a cached executable. A compiler
    /// diagnostic is a completed result; only tool-level faults fail the
    /// task.
    pub(super) async fn compile(
        &self,
        data: CompileData,
        as_checker: bool,
    ) -> Result<TaskResult, HandlerError> {
        let source = self.artifact(data.source_cache_id)?;
        let source_code = fs::read(&source.path)?;

        let compiled = self
            .sandbox
            .compile(CompileRequest {
                source_code: &source_code,
                language: &data.language,
                submission_id: Uuid::new_v4(),
                is_checker: as_checker,
            })
            .await
            .map_err(HandlerError::Sandbox)?;

        let result = self.ingest(&compiled, as_checker);

        // The build directory is ours to release, on success and failure
        // alike.
        if let Some(temp_dir) = &compiled.temp_dir {
            self.sandbox.cleanup_temp_dir(temp_dir).await;
        }

        result
    }

    /// Moves a successful build product into the cache and shapes the
    /// task result.
    fn ingest(
        &self,
        compiled: &CompileOutput,
        as_checker: bool,
    ) -> Result<TaskResult, HandlerError> {
        if !compiled.success {
            return Ok(if as_checker {
                TaskResult::CompileChecker(CheckerCompileOutcome {
                    success: false,
                    checker_cache_id: None,
                    compile_info: compiled.compile_info.clone(),
                })
            } else {
                TaskResult::Compile(CompileOutcome {
                    success: false,
                    binary_cache_id: None,
                    compile_info: compiled.compile_info.clone(),
                })
            });
        }

        let executable = compiled
            .executable_path
            .as_deref()
            .ok_or_else(|| {
                HandlerError::Sandbox(anyhow!("compiler reported success without an executable"))
            })?;
        let binary = fs::read(executable)?;

        let artifact_type = if as_checker {
            ArtifactType::Checker
        } else {
            ArtifactType::Binary
        };
        let cache_id = self
            .cache
            .put(artifact_type, &binary, "program")
            .map_err(HandlerError::CacheStore)?;

        Ok(if as_checker {
            TaskResult::CompileChecker(CheckerCompileOutcome {
                success: true,
                checker_cache_id: Some(cache_id),
                compile_info: compiled.compile_info.clone(),
            })
        } else {
            TaskResult::Compile(CompileOutcome {
                success: true,
                binary_cache_id: Some(cache_id),
                compile_info: compiled.compile_info.clone(),
            })
        })
    }
}
