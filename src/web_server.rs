use std::net::TcpListener;
use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::coordinator::SubmissionCoordinator;
use crate::registry::Registry;
use crate::routes::{
    deregister_handler, json_error_handler, post_submission_handler, register_handler,
    resolve_handler, submit_code_handler,
};
use crate::worker::JudgeService;

/// Serves `SubmitCode` for one judging worker
pub fn build_worker_server(
    service: Arc<JudgeService>,
    listener: TcpListener,
) -> std::io::Result<Server> {
    let service = web::Data::from(service);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(service.clone())
            .app_data(
                web::JsonConfig::default()
                    .limit(64 * 1024 * 1024)
                    .error_handler(json_error_handler),
            )
            .wrap(middleware::Logger::default())
            .service(submit_code_handler)
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn build_registry_server(
    registry: Arc<Registry>,
    listener: TcpListener,
) -> std::io::Result<Server> {
    let registry = web::Data::from(registry);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(registry.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .service(register_handler)
            .service(deregister_handler)
            .service(resolve_handler)
    })
    .listen(listener)?
    .run();

    Ok(server)
}

pub fn build_coordinator_server(
    coordinator: Arc<SubmissionCoordinator>,
    listener: TcpListener,
) -> std::io::Result<Server> {
    let coordinator = web::Data::from(coordinator);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(coordinator.clone())
            .app_data(web::JsonConfig::default().error_handler(json_error_handler))
            .wrap(middleware::Logger::default())
            .service(post_submission_handler)
    })
    .listen(listener)?
    .run();

    Ok(server)
}
