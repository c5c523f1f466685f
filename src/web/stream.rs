//! Live activity WebSocket.
//!
//! On connect the client gets a snapshot of the actor's last hour of
//! statements, then the warehouse is polled every 2 seconds for anything
//! newer than the last seen timestamp. Poll failures back off
//! exponentially (capped at 30 s) and recover on the next success.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::Response;
use chrono::{NaiveDateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::state::AppState;
use crate::warehouse::{Warehouse, ch_datetime, quote};

const POLL_INTERVAL: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);
const SNAPSHOT_LIMIT: u32 = 100;

/// page_no arrives as a number, a quoted number, or an empty string.
fn de_page<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Num(u64),
        Str(String),
    }
    Ok(match Raw::deserialize(d)? {
        Raw::Num(n) => n,
        Raw::Str(s) => s.parse().unwrap_or(0),
    })
}

#[derive(Debug, Clone, Deserialize)]
struct ActivityRow {
    #[serde(rename = "type")]
    kind: String,
    #[serde(deserialize_with = "ch_datetime::deserialize")]
    timestamp: NaiveDateTime,
    #[serde(default)]
    platform: Option<String>,
    #[serde(default)]
    object_id: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    marker_color: Option<String>,
    #[serde(default)]
    marker_position: Option<String>,
    #[serde(default)]
    marker_text: Option<String>,
    #[serde(default)]
    memo_title: Option<String>,
    #[serde(default)]
    memo_text: Option<String>,
    #[serde(default)]
    contents_id: Option<String>,
    #[serde(default)]
    contents_name: Option<String>,
    #[serde(deserialize_with = "de_page", default)]
    page_no: u64,
    #[serde(default)]
    context_label: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
struct Activity {
    #[serde(rename = "type")]
    kind: String,
    timestamp: String,
    platform: Option<String>,
    object_id: Option<String>,
    description: Option<String>,
    marker_color: Option<String>,
    marker_position: Option<String>,
    marker_text: Option<String>,
    memo_title: Option<String>,
    memo_text: Option<String>,
    contents_id: Option<String>,
    contents_name: Option<String>,
    page_no: u64,
    context_label: Option<String>,
    label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_image_url: Option<String>,
}

fn title_case(operation: &str) -> String {
    operation
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn activity_label(kind: &str, contents_name: &str, page_no: u64) -> String {
    match kind {
        "page_open" => format!("{contents_name} (Page {page_no})"),
        "quiz_answer" => format!("Answered Quiz on {contents_name} (Page {page_no})"),
        "next" => format!("Navigated to Next Page: {contents_name} (Page {page_no})"),
        "close" => format!("Closed {contents_name} (Page {page_no})"),
        other => format!("{} - {contents_name} (Page {page_no})", title_case(other)),
    }
}

async fn into_activity(row: ActivityRow, state: &AppState) -> Activity {
    let contents_name = row.contents_name.clone().unwrap_or_default();
    let label = activity_label(&row.kind, &contents_name, row.page_no);

    let page_image_url = match (&state.leaf_api, row.contents_id.as_deref()) {
        (Some(leaf), Some(contents_id)) if !contents_id.is_empty() && row.page_no > 0 => {
            match leaf.page_image_url(contents_id, row.page_no as i64).await {
                Ok(url) => Some(url),
                Err(err) => {
                    debug!(error = %err, "page image URL unavailable");
                    None
                }
            }
        }
        _ => None,
    };

    Activity {
        kind: row.kind,
        timestamp: row.timestamp.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
        platform: row.platform,
        object_id: row.object_id,
        description: row.description,
        marker_color: row.marker_color,
        marker_position: row.marker_position,
        marker_text: row.marker_text,
        memo_title: row.memo_title,
        memo_text: row.memo_text,
        contents_id: row.contents_id,
        contents_name: row.contents_name,
        page_no: row.page_no,
        context_label: row.context_label,
        label,
        page_image_url,
    }
}

const ACTIVITY_COLUMNS: &str = r#"
    operation_name AS type,
    timestamp,
    platform,
    object_id,
    description,
    marker_color,
    marker_position,
    marker_text,
    memo_title,
    memo_text,
    contents_id,
    contents_name,
    page_no,
    context_label
"#;

async fn fetch_snapshot(warehouse: &Warehouse, user_id: &str) -> anyhow::Result<Vec<ActivityRow>> {
    let sql = format!(
        r#"
        SELECT DISTINCT ON (_id)
            {ACTIVITY_COLUMNS}
        FROM statements_mv
        WHERE actor_account_name = {user}
          AND timestamp >= now() - INTERVAL 1 HOUR
        ORDER BY _id, timestamp ASC
        LIMIT {SNAPSHOT_LIMIT}
        "#,
        user = quote(user_id),
    );
    Ok(warehouse.fetch_all(&sql).await?)
}

async fn fetch_since(
    warehouse: &Warehouse,
    user_id: &str,
    last_seen: NaiveDateTime,
) -> anyhow::Result<Vec<ActivityRow>> {
    let sql = format!(
        r#"
        SELECT DISTINCT ON (_id)
            {ACTIVITY_COLUMNS}
        FROM statements_mv
        WHERE actor_account_name = {user}
          AND timestamp > toDateTime64('{since}', 3)
        ORDER BY timestamp ASC
        "#,
        user = quote(user_id),
        since = last_seen.format("%Y-%m-%d %H:%M:%S%.3f"),
    );
    Ok(warehouse.fetch_all(&sql).await?)
}

/// `GET /ws/activity/{user_id}`
pub(super) async fn activity_ws(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(state, user_id, socket))
}

async fn handle_socket(state: AppState, user_id: String, mut socket: WebSocket) {
    debug!(user_id, "activity stream connected");
    let warehouse = &state.db.warehouse;

    let snapshot = match fetch_snapshot(warehouse, &user_id).await {
        Ok(rows) => rows,
        Err(err) => {
            warn!(user_id, error = %err, "activity snapshot failed");
            Vec::new()
        }
    };

    // Track where the live poll picks up. With no history, start a little
    // in the past so activity between connect and first poll isn't lost.
    let mut last_seen = snapshot
        .iter()
        .map(|row| row.timestamp)
        .max()
        .unwrap_or_else(|| (Utc::now() - chrono::Duration::minutes(2)).naive_utc());

    let mut activities = Vec::with_capacity(snapshot.len());
    for row in snapshot {
        activities.push(into_activity(row, &state).await);
    }
    let payload = json!({ "type": "snapshot", "activities": activities });
    if socket
        .send(Message::Text(payload.to_string().into()))
        .await
        .is_err()
    {
        return;
    }

    let mut poll_delay = POLL_INTERVAL;
    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    // Client messages are ignored; the stream is one-way.
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => continue,
                }
            }
            _ = tokio::time::sleep(poll_delay) => {
                match fetch_since(warehouse, &user_id, last_seen).await {
                    Ok(rows) => {
                        poll_delay = POLL_INTERVAL;
                        for row in rows {
                            last_seen = last_seen.max(row.timestamp);
                            let activity = into_activity(row, &state).await;
                            let message = json!({
                                "type": "new_activity",
                                "activity": activity,
                            });
                            if socket
                                .send(Message::Text(message.to_string().into()))
                                .await
                                .is_err()
                            {
                                return;
                            }
                        }
                    }
                    Err(err) => {
                        let jitter = Duration::from_millis(rand::rng().random_range(0..250));
                        poll_delay = (poll_delay * 2).min(MAX_BACKOFF) + jitter;
                        warn!(user_id, error = %err, backoff = ?poll_delay,
                              "activity poll failed, backing off");
                    }
                }
            }
        }
    }
    debug!(user_id, "activity stream disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_for_known_operations() {
        assert_eq!(activity_label("page_open", "Physics", 3), "Physics (Page 3)");
        assert_eq!(
            activity_label("quiz_answer", "Physics", 3),
            "Answered Quiz on Physics (Page 3)"
        );
        assert_eq!(
            activity_label("next", "Physics", 4),
            "Navigated to Next Page: Physics (Page 4)"
        );
        assert_eq!(activity_label("close", "Physics", 4), "Closed Physics (Page 4)");
    }

    #[test]
    fn unknown_operations_are_title_cased() {
        assert_eq!(
            activity_label("add_marker", "Physics", 7),
            "Add Marker - Physics (Page 7)"
        );
    }
}
