use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::cache::ArtifactCache;
use crate::routes::{
    ServerContext, compile_checker_handler, compile_handler, download_handler, get_task_handler,
    health_handler, interactive_handler, json_error_handler, judge_handler, run_handler,
    status_handler, upload_handler,
};
use crate::scheduler::Scheduler;

pub fn build_server(
    host: &str,
    port: u16,
    cache: Arc<ArtifactCache>,
    scheduler: Arc<Scheduler>,
    context: ServerContext,
) -> std::io::Result<Server> {
    let cache = web::Data::from(cache);
    let scheduler = web::Data::from(scheduler);
    let context = web::Data::new(context);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(cache.clone())
            .app_data(scheduler.clone())
            .app_data(context.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(health_handler)
            .service(upload_handler)
            .service(compile_checker_handler)
            .service(compile_handler)
            .service(judge_handler)
            .service(run_handler)
            .service(interactive_handler)
            .service(get_task_handler)
            .service(download_handler)
            .service(status_handler)
    })
    .bind((host, port))?
    .run();

    Ok(server)
}
