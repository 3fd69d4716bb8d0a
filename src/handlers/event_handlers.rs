//! Long-poll access to the event bus.
//!
//! `GET /api/events/{group}` waits for the next event of that group
//! (optionally for one subject) and returns it as JSON, or 204 when the
//! timeout passes first.

use crate::{errors::AppError, services::events::known_group, state::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};
use uuid::Uuid;

const DEFAULT_WAIT_SECS: u64 = 30;
const MAX_WAIT_SECS: u64 = 300;

#[derive(Debug, Deserialize)]
pub struct EventQuery {
    pub timeout_secs: Option<u64>,
    /// Only report events about this object or group.
    pub subject: Option<Uuid>,
}

/// GET `/api/events/{group}?timeout_secs=&subject=`
pub async fn next_event(
    State(state): State<AppState>,
    Path(group): Path<String>,
    Query(q): Query<EventQuery>,
) -> Result<Response, AppError> {
    let group = known_group(&group)
        .ok_or_else(|| AppError::not_found(format!("unknown event group `{}`", group)))?;
    let wait = Duration::from_secs(q.timeout_secs.unwrap_or(DEFAULT_WAIT_SECS).clamp(1, MAX_WAIT_SECS));

    let mut rx = state.events.subscribe();
    let next = async {
        loop {
            match rx.recv().await {
                Ok(event)
                    if event.group == group
                        && q.subject.is_none_or(|subject| subject == event.subject_id) =>
                {
                    return Some(event);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("event listener on `{}` skipped {} events", group, skipped);
                }
                Err(RecvError::Closed) => return None,
            }
        }
    };

    match tokio::time::timeout(wait, next).await {
        Ok(Some(event)) => Ok(Json(event).into_response()),
        _ => {
            debug!("no `{}` event within {:?}", group, wait);
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{
        events::{OBJECT_CREATED, OBJECT_DELETED},
        test_support::Harness,
    };

    fn query(subject: Option<Uuid>) -> Query<EventQuery> {
        Query(EventQuery {
            timeout_secs: Some(2),
            subject,
        })
    }

    #[tokio::test]
    async fn waits_for_matching_event() {
        let h = Harness::new().await;
        let state = AppState::from(&h);
        let wanted = Uuid::new_v4();

        let waiter = tokio::spawn(next_event(
            State(state.clone()),
            Path("deleted".to_string()),
            query(Some(wanted)),
        ));
        tokio::time::sleep(Duration::from_millis(50)).await;

        h.events.publish::<()>(OBJECT_CREATED, wanted, None);
        h.events.publish::<()>(OBJECT_DELETED, Uuid::new_v4(), None);
        h.events.publish::<()>(OBJECT_DELETED, wanted, None);

        let response = waiter.await.unwrap().unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let event: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(event["group"], "deleted");
        assert_eq!(event["subject_id"], wanted.to_string());
    }

    #[tokio::test]
    async fn times_out_with_no_content() {
        let h = Harness::new().await;
        let response = next_event(
            State(AppState::from(&h)),
            Path("created".to_string()),
            Query(EventQuery {
                timeout_secs: Some(1),
                subject: None,
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let h = Harness::new().await;
        let err = next_event(State(AppState::from(&h)), Path("nope".to_string()), query(None))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }
}
