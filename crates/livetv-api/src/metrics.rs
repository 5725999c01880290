use std::fmt::Write;

use axum::extract::State;
use axum::http::header;
use axum::response::IntoResponse;

use livetv_core::Status;

use crate::state::AppState;

const STATUSES: [Status; 5] = [
    Status::Unknown,
    Status::Ok,
    Status::Warning,
    Status::Error,
    Status::Expired,
];

pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let service = &state.service;
    let mut out = String::with_capacity(1024);

    writeln!(out, "# TYPE livetv_sources gauge").unwrap();
    writeln!(out, "# HELP livetv_sources Tracked sources by health status").unwrap();
    for status in STATUSES {
        writeln!(
            out,
            "livetv_sources{{status=\"{}\"}} {}",
            status,
            service.count(status)
        )
        .unwrap();
    }

    writeln!(out, "# TYPE livetv_cache_entries gauge").unwrap();
    writeln!(out, "# HELP livetv_cache_entries Resolved sources held in the live cache").unwrap();
    writeln!(out, "livetv_cache_entries {}", service.cache_len()).unwrap();

    writeln!(out, "# TYPE livetv_retry_count gauge").unwrap();
    writeln!(out, "# HELP livetv_retry_count Consecutive failures per unhealthy source").unwrap();
    for (url, info) in service.status_snapshot() {
        if info.retry_count == 0 {
            continue;
        }
        writeln!(
            out,
            "livetv_retry_count{{source_url=\"{}\"}} {}",
            escape_label(&url),
            info.retry_count
        )
        .unwrap();
    }

    writeln!(out, "# TYPE livetv_plugins gauge").unwrap();
    writeln!(out, "# HELP livetv_plugins Registered resolution plugins").unwrap();
    writeln!(out, "livetv_plugins {}", service.plugins().len()).unwrap();

    writeln!(out, "# EOF").unwrap();

    (
        [(
            header::CONTENT_TYPE,
            "application/openmetrics-text; version=1.0.0; charset=utf-8",
        )],
        out,
    )
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}
