//! HTTP handlers for the six endpoints in §6. Each handler pulls a
//! connection from the pool, delegates to a mediator, and serializes the
//! mediator's result — handlers themselves hold no business logic.

use errors::*;
use mediators::{job_submitter, metrics_aggregator};
use model::Job;
use web::errors::WebError;
use web::middleware;
use web::state::AppState;

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use std::time::Instant;

pub async fn submit_job(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> std::result::Result<HttpResponse, WebError> {
    let start = Instant::now();
    let log = middleware::request_logger(&state.log, &middleware::new_request_id(), "POST", "/v1/jobs");
    middleware::log_request_start(&log);

    let mut image_bytes: Vec<u8> = Vec::new();
    let mut model_name: Option<String> = None;

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| Error::from(ErrorKind::InvalidRequest(e.to_string())))?;
        let name = field
            .content_disposition()
            .and_then(|cd| cd.get_name().map(|s| s.to_owned()))
            .unwrap_or_default();

        let mut buf = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| Error::from(ErrorKind::InvalidRequest(e.to_string())))?;
            buf.extend_from_slice(&chunk);
        }

        match name.as_str() {
            "image" => image_bytes = buf,
            "model_name" => model_name = String::from_utf8(buf).ok(),
            _ => {}
        }
    }

    let model_name = model_name.unwrap_or_else(|| "default".to_owned());
    let conn = state.pool.get().map_err(Error::from)?;

    let mut submitter = job_submitter::Submitter {
        conn,
        queue: state.queue.clone(),
        image_ttl: state.config.image_ttl,
    };

    let result = submitter.submit(&log, &image_bytes, &model_name)?;
    let status = if result.cached { 200 } else { 201 };
    middleware::log_request_finish(&log, status, start.elapsed().as_nanos() as u64);

    let body = serde_json::json!({ "job_id": result.job_id });
    Ok(if result.cached {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::Created().json(body)
    })
}

pub async fn get_job_status(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> std::result::Result<HttpResponse, WebError> {
    let job_id = path.into_inner();
    let conn = state.pool.get().map_err(Error::from)?;
    let mut submitter = job_submitter::Submitter {
        conn,
        queue: state.queue.clone(),
        image_ttl: state.config.image_ttl,
    };

    let job = Job::find(&mut submitter.conn, job_id)?
        .ok_or_else(|| Error::from(ErrorKind::JobNotFound(job_id)))?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "id": job.id,
        "status": job.status().as_str(),
        "created_at": job.created_at,
    })))
}

pub async fn get_job_result(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> std::result::Result<HttpResponse, WebError> {
    let job_id = path.into_inner();
    let conn = state.pool.get().map_err(Error::from)?;
    let mut submitter = job_submitter::Submitter {
        conn,
        queue: state.queue.clone(),
        image_ttl: state.config.image_ttl,
    };

    let (result, scores) = submitter.get_result(job_id)?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "job_id": result.job_id,
        "output": scores.to_json(),
        "top_label": result.top_label,
    })))
}

pub async fn get_metrics(state: web::Data<AppState>) -> std::result::Result<HttpResponse, WebError> {
    let mut conn = state.pool.get().map_err(Error::from)?;
    let mut mediator = metrics_aggregator::Mediator {
        conn:  &mut conn,
        queue: state.queue.clone(),
    };
    let log = state.log.new(o!("endpoint" => "metrics"));
    let metrics = mediator.run(&log)?;

    Ok(HttpResponse::Ok().json(serde_json::json!({
        "rps": metrics.rps,
        "failure_rate": metrics.failure_rate,
        "p50_ms": metrics.p50_ms,
        "p95_ms": metrics.p95_ms,
        "p99_ms": metrics.p99_ms,
        "dlq_depth": metrics.dlq_depth,
    })))
}

pub async fn get_dlq(state: web::Data<AppState>) -> std::result::Result<HttpResponse, WebError> {
    let ids = state.queue.dlq_contents().map_err(Error::from)?;
    let mut conn = state.pool.get().map_err(Error::from)?;

    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        if let Some(job) = Job::find(&mut conn, id)? {
            entries.push(serde_json::json!({
                "id": job.id,
                "input_sha256": job.input_sha256,
                "updated_at": job.updated_at,
            }));
        }
    }

    Ok(HttpResponse::Ok().json(entries))
}

pub async fn get_health(state: web::Data<AppState>) -> HttpResponse {
    let db_ok = state.pool.get().is_ok();
    let queue_ok = state.queue.ping().is_ok();

    let status = |ok: bool| if ok { "ok" } else { "down" };
    let body = serde_json::json!({ "db": status(db_ok), "queue": status(queue_ok) });
    if db_ok && queue_ok {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
