use super::*;

use actix_web::get;
use actix_web::http::header;
use uuid::Uuid;

use crate::cache::ArtifactCache;

/// Streams an artifact's bytes back as a download.
#[get("/cache/{id}")]
pub async fn download_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    path: web::Path<String>,
) -> impl Responder {
    let raw = path.into_inner();
    let Ok(id) = Uuid::parse_str(&raw) else {
        return not_found(format!("artifact {raw} not found or expired"));
    };
    let Some(artifact) = cache.get(id) else {
        return not_found(format!("artifact {id} not found or expired"));
    };

    match std::fs::read(&artifact.path) {
        Ok(bytes) => HttpResponse::Ok()
            .content_type("application/octet-stream")
            .insert_header((
                header::CONTENT_DISPOSITION,
                format!(
                    "attachment; filename=\"{}\"",
                    sanitize_filename(&artifact.file_name)
                ),
            ))
            .body(bytes),
        // The file vanished between the index check and the read.
        Err(_) => not_found(format!("artifact {id} not found or expired")),
    }
}

fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
