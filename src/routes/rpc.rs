use actix_web::{HttpResponse, Responder, post, web};

use crate::rpc::JudgeRequest;
use crate::worker::JudgeService;

/// Judges the job in the body. Every judged outcome, including a worker
/// fault, is a 200 carrying the verdict.
#[post("/rpc/SubmitCode")]
pub async fn submit_code_handler(
    service: web::Data<JudgeService>,
    body: web::Json<JudgeRequest>,
) -> impl Responder {
    let request = body.into_inner();
    log::debug!(
        "Received job of user {} with {} cases",
        request.user_id,
        request.total_num
    );
    HttpResponse::Ok().json(service.submit_code(request).await)
}
