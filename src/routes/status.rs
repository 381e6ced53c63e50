use super::*;

use actix_web::get;

use crate::cache::{ArtifactCache, CacheStats};
use crate::scheduler::{Scheduler, SchedulerStatus};

#[derive(Serialize)]
pub struct StatusResponse {
    pub queue: SchedulerStatus,
    pub cache: CacheStats,
    /// Seconds since the server started.
    pub uptime: f64,
}

#[get("/status")]
pub async fn status_handler(
    _auth: AuthGuard,
    scheduler: web::Data<Scheduler>,
    cache: web::Data<ArtifactCache>,
    context: web::Data<ServerContext>,
) -> impl Responder {
    HttpResponse::Ok().json(StatusResponse {
        queue: scheduler.status(),
        cache: cache.stats(),
        uptime: context.started_at.elapsed().as_secs_f64(),
    })
}
