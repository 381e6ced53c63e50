use super::*;

use actix_web::{get, post};
use serde::Deserialize;
use uuid::Uuid;

use crate::cache::ArtifactCache;
use crate::scheduler::Scheduler;
use crate::task::{Checker, CompileData, InteractiveData, JudgeData, RunData, TaskData};

/// Task-type parameters plus the optional submission priority.
#[derive(Deserialize)]
pub struct SubmitEnvelope<T> {
    #[serde(flatten)]
    pub data: T,
    #[serde(default)]
    pub priority: i32,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TaskCreated {
    task_id: Uuid,
    status: &'static str,
}

fn submitted(task_id: Uuid) -> HttpResponse {
    HttpResponse::Ok().json(TaskCreated {
        task_id,
        status: "pending",
    })
}

/// Rejects the submission up front when a referenced handle is already
/// gone; expiry between submission and execution is caught by the worker.
fn require(cache: &ArtifactCache, id: Uuid, what: &str) -> Result<(), HttpResponse> {
    if cache.has(id) {
        Ok(())
    } else {
        Err(bad_request(format!(
            "{what} artifact {id} not found or expired"
        )))
    }
}

#[post("/compile")]
pub async fn compile_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    scheduler: web::Data<Scheduler>,
    body: web::Json<SubmitEnvelope<CompileData>>,
) -> impl Responder {
    let SubmitEnvelope { data, priority } = body.into_inner();
    if let Err(response) = require(&cache, data.source_cache_id, "source") {
        return response;
    }
    submitted(scheduler.add_task(TaskData::Compile(data), priority))
}

#[post("/compile/checker")]
pub async fn compile_checker_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    scheduler: web::Data<Scheduler>,
    body: web::Json<SubmitEnvelope<CompileData>>,
) -> impl Responder {
    let SubmitEnvelope { data, priority } = body.into_inner();
    if let Err(response) = require(&cache, data.source_cache_id, "source") {
        return response;
    }
    submitted(scheduler.add_task(TaskData::CompileChecker(data), priority))
}

#[post("/judge")]
pub async fn judge_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    scheduler: web::Data<Scheduler>,
    body: web::Json<SubmitEnvelope<JudgeData>>,
) -> impl Responder {
    let SubmitEnvelope { data, priority } = body.into_inner();
    for (id, what) in [
        (data.binary_cache_id, "binary"),
        (data.input_cache_id, "input"),
        (data.output_cache_id, "output"),
    ] {
        if let Err(response) = require(&cache, id, what) {
            return response;
        }
    }
    // Custom checkers must exist now; built-in names resolve at run time.
    if let Checker::Custom(id) = Checker::parse(&data.checker_name) {
        if let Err(response) = require(&cache, id, "checker") {
            return response;
        }
    }
    submitted(scheduler.add_task(TaskData::Judge(data), priority))
}

#[post("/run")]
pub async fn run_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    scheduler: web::Data<Scheduler>,
    body: web::Json<SubmitEnvelope<RunData>>,
) -> impl Responder {
    let SubmitEnvelope { data, priority } = body.into_inner();
    for (id, what) in [
        (data.binary_cache_id, "binary"),
        (data.input_cache_id, "input"),
    ] {
        if let Err(response) = require(&cache, id, what) {
            return response;
        }
    }
    submitted(scheduler.add_task(TaskData::Run(data), priority))
}

#[post("/interactive")]
pub async fn interactive_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    scheduler: web::Data<Scheduler>,
    body: web::Json<SubmitEnvelope<InteractiveData>>,
) -> impl Responder {
    let SubmitEnvelope { data, priority } = body.into_inner();
    for (id, what) in [
        (data.user_binary_cache_id, "user binary"),
        (data.interactor_binary_cache_id, "interactor binary"),
    ] {
        if let Err(response) = require(&cache, id, what) {
            return response;
        }
    }
    if let Some(id) = data.input_cache_id {
        if let Err(response) = require(&cache, id, "input") {
            return response;
        }
    }
    submitted(scheduler.add_task(TaskData::Interactive(data), priority))
}

#[get("/task/{id}")]
pub async fn get_task_handler(
    _auth: AuthGuard,
    scheduler: web::Data<Scheduler>,
    path: web::Path<String>,
) -> impl Responder {
    let raw = path.into_inner();
    let Ok(id) = Uuid::parse_str(&raw) else {
        return not_found(format!("task {raw} not found"));
    };
    match scheduler.get_task(id) {
        Some(task) => HttpResponse::Ok().json(task),
        None => not_found(format!("task {id} not found")),
    }
}
