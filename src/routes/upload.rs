use super::*;

use actix_multipart::Multipart;
use futures::StreamExt;
use uuid::Uuid;

use crate::cache::{ArtifactCache, ArtifactType, MAX_ARTIFACT_BYTES};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResponse {
    pub cache_id: Uuid,
    pub file_name: String,
    #[serde(rename = "type")]
    pub artifact_type: ArtifactType,
    pub size: u64,
    pub expires_in: u64,
}

/// Accepts a multipart form with a `file` field and an optional `type`
/// field selecting the artifact namespace (default `source`).
#[actix_web::post("/upload")]
pub async fn upload_handler(
    _auth: AuthGuard,
    cache: web::Data<ArtifactCache>,
    mut payload: Multipart,
) -> impl Responder {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut artifact_type = ArtifactType::Source;

    while let Some(next) = payload.next().await {
        let mut field = match next {
            Ok(field) => field,
            Err(e) => return bad_request(format!("malformed multipart payload: {e}")),
        };

        match field.name() {
            Some("file") => {
                let file_name = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .unwrap_or("upload")
                    .to_string();

                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => return bad_request(format!("failed to read upload: {e}")),
                    };
                    bytes.extend_from_slice(&chunk);
                    if bytes.len() > MAX_ARTIFACT_BYTES {
                        return bad_request("file exceeds the 100 MiB upload limit");
                    }
                }
                file = Some((file_name, bytes));
            }
            Some("type") => {
                let mut raw = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = match chunk {
                        Ok(chunk) => chunk,
                        Err(e) => return bad_request(format!("failed to read type field: {e}")),
                    };
                    raw.extend_from_slice(&chunk);
                }
                let value = String::from_utf8_lossy(&raw).trim().to_string();
                artifact_type = match value.parse() {
                    Ok(artifact_type) => artifact_type,
                    Err(()) => {
                        return bad_request(format!(
                            "invalid artifact type {value:?}; expected one of source, binary, input, output, checker"
                        ));
                    }
                };
            }
            _ => {
                // Unknown fields are ignored rather than rejected.
            }
        }
    }

    let Some((file_name, bytes)) = file else {
        return bad_request("missing file field");
    };

    match cache.put(artifact_type, &bytes, &file_name) {
        Ok(cache_id) => {
            log::info!(
                "uploaded {artifact_type} artifact {cache_id} ({} bytes) as {file_name:?}",
                bytes.len()
            );
            HttpResponse::Ok().json(UploadResponse {
                cache_id,
                file_name,
                artifact_type,
                size: bytes.len() as u64,
                expires_in: cache.ttl().as_secs(),
            })
        }
        Err(e) => {
            log::error!("failed to store uploaded artifact: {e:#}");
            internal_error("failed to store artifact")
        }
    }
}
