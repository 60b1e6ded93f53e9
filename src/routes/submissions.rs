use actix_web::{HttpResponse, Responder, post, web};
use serde::{Deserialize, Serialize};

use super::{ErrorResponse, ErrorResponseWithMessage};
use crate::coordinator::{SubmissionCoordinator, SubmitError};

#[derive(Serialize, Deserialize, Debug)]
pub struct PostSubmission {
    pub user_id: i64,
    pub problem_id: i64,
    pub language: String,
    pub source_code: String,
}

#[post("/submissions")]
pub async fn post_submission_handler(
    coordinator: web::Data<SubmissionCoordinator>,
    body: web::Json<PostSubmission>,
) -> impl Responder {
    let PostSubmission {
        user_id,
        problem_id,
        language,
        source_code,
    } = body.into_inner();

    match coordinator
        .submit_code(user_id, problem_id, &language, &source_code)
        .await
    {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(SubmitError::UserNotFound(_) | SubmitError::ProblemNotFound(_)) => {
            HttpResponse::NotFound().json(ErrorResponse {
                reason: "ERR_NOT_FOUND",
                code: 3,
            })
        }
        Err(e @ SubmitError::UnsupportedLanguage(_)) => {
            HttpResponse::BadRequest().json(ErrorResponseWithMessage {
                reason: "ERR_INVALID_ARGUMENT",
                code: 1,
                message: e.to_string(),
            })
        }
        Err(SubmitError::System(e)) => {
            log::error!("Submission of user {user_id} for problem {problem_id} failed: {e:#}");
            // Database trouble is external, anything else (dispatch) is ours
            if e.chain().any(|cause| cause.is::<sqlx::Error>()) {
                HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_EXTERNAL",
                    code: 5,
                })
            } else {
                HttpResponse::InternalServerError().json(ErrorResponse {
                    reason: "ERR_INTERNAL",
                    code: 6,
                })
            }
        }
    }
}
