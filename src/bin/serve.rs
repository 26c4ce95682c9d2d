//! HTTP boundary: run submission/status/cancel/resume plus a websocket
//! telemetry stream, mirroring the teacher's `analysis::Server` shape.

use actix_cors::Cors;
use actix_web::middleware::Logger;
use actix_web::{web, App, HttpRequest, HttpResponse, HttpServer, Responder};
use discovery_core::config::RunConfig;
use discovery_core::market::HttpMarketDataClient;
use discovery_core::orchestrate::runner;
use discovery_core::orchestrate::store::{RunStatus, RunStore};
use discovery_core::orchestrate::telemetry::TelemetryBus;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

struct AppState {
    store: Arc<Mutex<RunStore>>,
    market: Arc<HttpMarketDataClient>,
    runs_root: String,
    cancels: Mutex<std::collections::HashMap<String, Arc<AtomicBool>>>,
    telemetry: Mutex<std::collections::HashMap<String, Arc<TelemetryBus>>>,
    ai_move_pool: tokio::sync::Semaphore,
}

#[derive(Deserialize)]
struct SubmitRun {
    config: RunConfig,
}

#[derive(Deserialize)]
struct RequestMove {
    board: [i8; 9],
    to_play: i8,
    #[serde(default = "default_sims")]
    sims: usize,
    #[serde(default)]
    seed: u64,
}

fn default_sims() -> usize {
    200
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    discovery_core::init_logging();
    let state = web::Data::new(AppState {
        store: Arc::new(Mutex::new(RunStore::open("runs.db").expect("open run store"))),
        market: Arc::new(HttpMarketDataClient::new("https://api.binance.com", 3)),
        runs_root: "runs".to_string(),
        cancels: Mutex::new(std::collections::HashMap::new()),
        telemetry: Mutex::new(std::collections::HashMap::new()),
        ai_move_pool: tokio::sync::Semaphore::new(runner::AI_MOVE_POOL_SIZE),
    });

    log::info!("starting discovery HTTP server");
    HttpServer::new(move || {
        App::new()
            .wrap(Logger::new("%r %s %Ts"))
            .wrap(Cors::default().allow_any_origin().allow_any_method().allow_any_header())
            .app_data(state.clone())
            .route("/runs", web::post().to(submit_run))
            .route("/runs/{run_id}", web::get().to(run_status))
            .route("/runs/{run_id}/cancel", web::post().to(cancel_run))
            .route("/runs/{run_id}/resume", web::post().to(resume_run))
            .route("/runs/{run_id}/telemetry", web::get().to(telemetry_stream))
            .route("/games/tictactoe/move", web::post().to(tictactoe_move))
    })
    .workers(4)
    .bind("127.0.0.1:8899")?
    .run()
    .await
}

async fn submit_run(state: web::Data<AppState>, req: web::Json<SubmitRun>) -> impl Responder {
    if let Err(e) = req.config.validate() {
        return HttpResponse::BadRequest().body(e.to_string());
    }

    let run_id = uuid::Uuid::new_v4().to_string();
    let config_json = serde_json::to_string(&req.config).unwrap_or_default();
    let config_hash = u64::from_str_radix(&req.config.config_hash(), 16).unwrap_or(0);

    {
        let store = state.store.lock().expect("run store lock poisoned");
        if let Err(e) = store.upsert_run(&run_id, RunStatus::Running, "init", 0.0, &config_json, config_hash, None) {
            return HttpResponse::InternalServerError().body(e.to_string());
        }
    }

    let cancel = Arc::new(AtomicBool::new(false));
    let telemetry = Arc::new(TelemetryBus::new());
    state.cancels.lock().expect("cancels lock poisoned").insert(run_id.clone(), cancel.clone());
    state.telemetry.lock().expect("telemetry lock poisoned").insert(run_id.clone(), telemetry.clone());

    let config = req.config.clone();
    let market = state.market.clone();
    let runs_root = state.runs_root.clone();
    let log = Arc::new(runner::StageLog::new());
    let state_for_task = state.clone();
    let run_id_for_task = run_id.clone();

    let store_for_task = state.store.clone();
    actix_web::rt::spawn(async move {
        let result =
            runner::run(&run_id_for_task, &config, market, runs_root, cancel, log, telemetry, store_for_task).await;
        let store = state_for_task.store.lock().expect("run store lock poisoned");
        match result {
            Ok(_) => {
                store.upsert_run(&run_id_for_task, RunStatus::Completed, "done", 1.0, "", 0, None).ok();
            }
            Err(e) => {
                store.upsert_run(&run_id_for_task, RunStatus::Failed, "failed", 0.0, "", 0, Some(&e.to_string())).ok();
            }
        }
    });

    HttpResponse::Accepted().json(serde_json::json!({ "run_id": run_id }))
}

async fn run_status(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let run_id = path.into_inner();
    let store = state.store.lock().expect("run store lock poisoned");
    match store.run_status(&run_id) {
        Ok(Some(status)) => HttpResponse::Ok().json(serde_json::json!({ "status": format!("{status:?}") })),
        Ok(None) => HttpResponse::NotFound().body("no such run"),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn cancel_run(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let run_id = path.into_inner();
    match state.cancels.lock().expect("cancels lock poisoned").get(&run_id) {
        Some(token) => {
            token.store(true, Ordering::Relaxed);
            HttpResponse::Ok().body("canceling")
        }
        None => HttpResponse::NotFound().body("no such active run"),
    }
}

async fn resume_run(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let run_id = path.into_inner();
    let store = state.store.lock().expect("run store lock poisoned");
    match store.resume(&run_id) {
        Ok(()) => HttpResponse::Ok().body("resumed"),
        Err(e) => HttpResponse::BadRequest().body(e.to_string()),
    }
}

async fn tictactoe_move(state: web::Data<AppState>, req: web::Json<RequestMove>) -> impl Responder {
    match runner::request_tictactoe_move(&state.ai_move_pool, req.board, req.to_play, req.sims, req.seed).await {
        Ok(policy) => HttpResponse::Ok().json(policy),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

async fn telemetry_stream(state: web::Data<AppState>, path: web::Path<String>, req: HttpRequest, stream: web::Payload) -> actix_web::Result<HttpResponse> {
    let run_id = path.into_inner();
    let (response, mut session, _msg_stream) = actix_ws::handle(&req, stream)?;
    let bus = state.telemetry.lock().expect("telemetry lock poisoned").get(&run_id).cloned();

    actix_web::rt::spawn(async move {
        let Some(bus) = bus else {
            let _ = session.close(None).await;
            return;
        };
        loop {
            actix_web::rt::time::sleep(discovery_core::orchestrate::telemetry::TICK_INTERVAL).await;
            if let Some(snapshot) = bus.latest() {
                let payload = serde_json::to_string(&snapshot).unwrap_or_default();
                if session.text(payload).await.is_err() {
                    break;
                }
            }
        }
    });

    Ok(response)
}
