use actix_web::{
    get,
    http::StatusCode,
    post,
    web::{self},
    App, HttpResponse, HttpServer, ResponseError,
};
use serde::Serialize;
use uuid::Uuid;

use super::{
    args::ServerOpts,
    model::{CreateFlowRequest, FlowListResponse, FlowSnapshot, ListFlowsQuery},
    scheduler::{RetryError, Scheduler, SchedulerError, UnblockError},
};

impl ResponseError for SchedulerError {
    fn status_code(&self) -> StatusCode {
        match self {
            SchedulerError::FlowDoesNotExist => StatusCode::NOT_FOUND,
            SchedulerError::UnknownTemplate(_)
            | SchedulerError::InvalidArgs(_)
            | SchedulerError::InvalidWebhookUrl(_)
            | SchedulerError::InvalidQuery(_) => StatusCode::BAD_REQUEST,
            SchedulerError::DatabaseQuery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ResponseError for UnblockError {
    fn status_code(&self) -> StatusCode {
        match self {
            UnblockError::FlowDoesNotExist => StatusCode::NOT_FOUND,
            UnblockError::AlreadyUnblocked => StatusCode::BAD_REQUEST,
            UnblockError::DatabaseQuery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl ResponseError for RetryError {
    fn status_code(&self) -> StatusCode {
        match self {
            RetryError::FlowDoesNotExist => StatusCode::NOT_FOUND,
            RetryError::NoFailedTasks => StatusCode::BAD_REQUEST,
            RetryError::DatabaseQuery(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
}

#[get("/")]
async fn service_info() -> web::Json<ServiceInfo> {
    web::Json(ServiceInfo {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Serialize)]
struct Health {
    healthy: &'static str,
}

#[get("/check")]
async fn healthcheck(sched: web::Data<Scheduler>) -> HttpResponse {
    match sched.healthcheck().await {
        Ok(()) => HttpResponse::Ok().json(Health { healthy: "yes" }),
        Err(error) => {
            tracing::error!(%error, "healthcheck failed");
            HttpResponse::InternalServerError().json(Health { healthy: "no" })
        }
    }
}

#[post("/flows")]
async fn create_flow(
    request: web::Json<CreateFlowRequest>,
    sched: web::Data<Scheduler>,
) -> Result<HttpResponse, SchedulerError> {
    let snapshot = sched.create_flow(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(snapshot))
}

#[get("/flows/{id}")]
async fn get_flow(
    path: web::Path<Uuid>,
    sched: web::Data<Scheduler>,
) -> Result<web::Json<FlowSnapshot>, SchedulerError> {
    sched.get_flow(path.into_inner()).await.map(web::Json)
}

#[get("/flows")]
async fn list_flows(
    query: web::Query<ListFlowsQuery>,
    sched: web::Data<Scheduler>,
) -> Result<web::Json<FlowListResponse>, SchedulerError> {
    sched.list_flows(query.into_inner()).await.map(web::Json)
}

#[post("/hooks/flow/{id}")]
async fn unblock_flow(
    path: web::Path<Uuid>,
    payload: web::Json<serde_json::Value>,
    sched: web::Data<Scheduler>,
) -> Result<web::Json<FlowSnapshot>, UnblockError> {
    sched
        .unblock_task(path.into_inner(), payload.into_inner())
        .await
        .map(web::Json)
}

#[post("/retry/{id}")]
async fn retry_flow(
    path: web::Path<Uuid>,
    sched: web::Data<Scheduler>,
) -> Result<web::Json<FlowSnapshot>, RetryError> {
    sched
        .retry_failed_tasks(path.into_inner())
        .await
        .map(web::Json)
}

pub async fn start_server(server_opts: ServerOpts, sched: &Scheduler) -> std::io::Result<()> {
    let sched = sched.clone();

    tracing::info!(port = server_opts.port, "starting API server");

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(sched.clone()))
            .service(service_info)
            .service(healthcheck)
            .service(create_flow)
            .service(get_flow)
            .service(list_flows)
            .service(unblock_flow)
            .service(retry_flow)
    })
    .bind(("0.0.0.0", server_opts.port))?
    .run()
    .await
}
