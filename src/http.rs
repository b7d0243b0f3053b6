//! HTTP surface: websocket upgrade and the JSON data endpoints that back
//! the (out-of-scope) dashboard pages.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::archive;
use crate::config::{ClassicServerConfig, Config, DynamicServerConfig};
use crate::hub::Hub;
use crate::subscriber;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
    pub config: Arc<Config>,
}

pub fn build_router(state: AppState) -> Router {
    let prefix = state.config.url_prefix.clone();
    let router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/api/servers", get(list_servers))
        .route("/api/servers/{tag}/logs", get(classic_logs))
        .route("/api/servers/{tag}/archives", get(classic_archives))
        .route("/api/servers/{tag}/archives/{name}", get(classic_archive_read))
        .route(
            "/api/servers/{tag}/instances/{id}/logs",
            get(dynamic_instance_logs),
        )
        .route("/api/servers/{tag}/instances/{id}/archives", get(dynamic_archives))
        .route(
            "/api/servers/{tag}/instances/{id}/archives/{name}",
            get(dynamic_archive_read),
        )
        .route("/healthz", get(healthz))
        .with_state(state);

    if prefix.is_empty() {
        router
    } else {
        Router::new().nest(&prefix, router)
    }
}

async fn healthz() -> impl IntoResponse {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.max_message_size(subscriber::MAX_MESSAGE_SIZE)
        .max_frame_size(subscriber::MAX_MESSAGE_SIZE)
        .on_upgrade(move |socket| subscriber::handle_socket(socket, state.hub))
}

#[derive(Serialize)]
struct ServerInfo {
    tag: String,
    display_name: String,
    dynamic: bool,
    instances: Vec<InstanceInfo>,
}

#[derive(Serialize)]
struct InstanceInfo {
    id: String,
    display_name: String,
}

async fn list_servers(State(state): State<AppState>) -> impl IntoResponse {
    let mut out = Vec::new();
    for s in &state.config.classic {
        out.push(ServerInfo {
            tag: s.server_tag.clone(),
            display_name: s.display_name.clone(),
            dynamic: false,
            instances: Vec::new(),
        });
    }
    for s in &state.config.dynamic {
        let instances = state
            .hub
            .dynamic_instances(&s.server_tag)
            .await
            .into_iter()
            .map(|id| {
                let display_name = s.display_name.replace("%id%", &id);
                InstanceInfo { id, display_name }
            })
            .collect();
        out.push(ServerInfo {
            tag: s.server_tag.clone(),
            display_name: s.display_name.clone(),
            dynamic: true,
            instances,
        });
    }
    Json(out)
}

#[derive(Serialize)]
struct LogsResponse {
    lines: Vec<String>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn err_response(status: StatusCode, message: impl Into<String>) -> axum::response::Response {
    (status, Json(ErrorResponse { error: message.into() })).into_response()
}

fn limit_from_query(query: &HashMap<String, String>) -> usize {
    query
        .get("limit")
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn find_classic<'a>(config: &'a Config, tag: &str) -> Option<&'a ClassicServerConfig> {
    config.classic.iter().find(|s| s.server_tag == tag)
}

fn find_dynamic<'a>(config: &'a Config, tag: &str) -> Option<&'a DynamicServerConfig> {
    config.dynamic.iter().find(|s| s.server_tag == tag)
}

async fn classic_logs(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(server) = find_classic(&state.config, &tag) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown server: {tag}"));
    };
    match archive::read_current(&server.log_file_path, limit_from_query(&query)) {
        Ok(lines) => Json(LogsResponse { lines }).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn dynamic_instance_logs(
    State(state): State<AppState>,
    Path((tag, id)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(server) = find_dynamic(&state.config, &tag) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown server: {tag}"));
    };
    let Some(path) = resolve_instance_path(server, &id) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown instance: {id}"));
    };
    match archive::read_current(&path, limit_from_query(&query)) {
        Ok(lines) => Json(LogsResponse { lines }).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

fn resolve_instance_path(cfg: &DynamicServerConfig, id: &str) -> Option<std::path::PathBuf> {
    glob::glob(&cfg.log_file_pattern).ok()?.flatten().find(|p| {
        let path_str = p.to_string_lossy();
        cfg.instance_identifier
            .captures(&path_str)
            .and_then(|c| c.name("id"))
            .map(|m| m.as_str() == id)
            .unwrap_or(false)
    })
}

#[derive(Serialize)]
struct ArchivesResponse {
    archives: Vec<archive::ArchiveEntry>,
}

async fn classic_archives(
    State(state): State<AppState>,
    Path(tag): Path<String>,
) -> impl IntoResponse {
    let Some(server) = find_classic(&state.config, &tag) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown server: {tag}"));
    };
    let (Some(dir), Some(pattern)) = (
        &server.archived_logs_dir_path,
        &server.archived_logs_filename_format,
    ) else {
        return err_response(StatusCode::NOT_FOUND, "archives not enabled");
    };
    match archive::list_archives(dir, pattern) {
        Ok(archives) => Json(ArchivesResponse { archives }).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn classic_archive_read(
    State(state): State<AppState>,
    Path((tag, name)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(server) = find_classic(&state.config, &tag) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown server: {tag}"));
    };
    let Some(dir) = &server.archived_logs_dir_path else {
        return err_response(StatusCode::NOT_FOUND, "archives not enabled");
    };
    match archive::read_archive(dir, &name, limit_from_query(&query)) {
        Ok(lines) => Json(LogsResponse { lines }).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn dynamic_archives(
    State(state): State<AppState>,
    Path((tag, _id)): Path<(String, String)>,
) -> impl IntoResponse {
    let Some(server) = find_dynamic(&state.config, &tag) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown server: {tag}"));
    };
    let (Some(dir), Some(pattern)) = (
        &server.archived_logs_root_dir,
        &server.archived_logs_file_pattern,
    ) else {
        return err_response(StatusCode::NOT_FOUND, "archives not enabled");
    };
    match archive::list_archives(dir, pattern) {
        Ok(archives) => Json(ArchivesResponse { archives }).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn dynamic_archive_read(
    State(state): State<AppState>,
    Path((tag, _id, name)): Path<(String, String, String)>,
    Query(query): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let Some(server) = find_dynamic(&state.config, &tag) else {
        return err_response(StatusCode::NOT_FOUND, format!("unknown server: {tag}"));
    };
    let Some(dir) = &server.archived_logs_root_dir else {
        return err_response(StatusCode::NOT_FOUND, "archives not enabled");
    };
    match archive::read_archive(dir, &name, limit_from_query(&query)) {
        Ok(lines) => Json(LogsResponse { lines }).into_response(),
        Err(e) => err_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}
