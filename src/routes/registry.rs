use actix_web::{HttpResponse, Responder, delete, get, put, web};

use super::ErrorResponse;
use crate::registry::{Instance, Registry};

#[put("/registry/{service}")]
pub async fn register_handler(
    registry: web::Data<Registry>,
    service: web::Path<String>,
    body: web::Json<Instance>,
) -> impl Responder {
    registry.register(&service, body.into_inner());
    HttpResponse::NoContent().finish()
}

#[delete("/registry/{service}/{id}")]
pub async fn deregister_handler(
    registry: web::Data<Registry>,
    path: web::Path<(String, String)>,
) -> impl Responder {
    let (service, id) = path.into_inner();
    if registry.deregister(&service, &id) {
        HttpResponse::NoContent().finish()
    } else {
        HttpResponse::NotFound().json(ErrorResponse {
            reason: "ERR_NOT_FOUND",
            code: 3,
        })
    }
}

/// Live instances of a service; an unknown service has none
#[get("/registry/{service}")]
pub async fn resolve_handler(
    registry: web::Data<Registry>,
    service: web::Path<String>,
) -> impl Responder {
    HttpResponse::Ok().json(registry.live(&service))
}
