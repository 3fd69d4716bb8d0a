//! Defines routes for object, group and event operations.
//!
//! ## Structure
//! - **Objects**
//!   - `GET    /api/objects?group=` — list objects
//!   - `POST   /api/objects?group=` — upload (multipart field `content`)
//!   - `GET    /api/objects/{id}` — object metadata
//!   - `PUT    /api/objects/{id}` — rename, move, replace metadata
//!   - `DELETE /api/objects/{id}` — delete object and bytes
//!   - `GET    /api/objects/{id}/raw` — stream the content
//!   - `PUT    /api/objects/{id}/raw` — overwrite the content
//!   - `GET    /api/objects/{id}/accesses` — access log
//!
//! - **Groups** (`{key}` is an id or a name)
//!   - `GET    /api/groups`, `POST /api/groups`
//!   - `GET    /api/groups/names`
//!   - `GET    /api/groups/{key}`, `PUT`, `DELETE`
//!
//! - **Events**
//!   - `GET    /api/events/{group}` — long-poll the next event
//!
//! The encryption passphrase travels in the `X-Encryption-Key` header.

use crate::{
    handlers::{
        event_handlers::next_event,
        group_handlers::{
            create_group, delete_group, get_group, list_group_names, list_groups, update_group,
        },
        health_handlers::{healthz, readyz},
        object_handlers::{
            create_object, delete_object, get_object, list_accesses, list_objects, overwrite_raw,
            read_raw, update_object,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::get,
};

/// Build the router for all endpoints. Handlers share `AppState`.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // Object routes; uploads are streamed, so no body size cap
        .route(
            "/api/objects",
            get(list_objects)
                .post(create_object)
                .layer(DefaultBodyLimit::disable()),
        )
        .route(
            "/api/objects/{id}",
            get(get_object).put(update_object).delete(delete_object),
        )
        .route(
            "/api/objects/{id}/raw",
            get(read_raw)
                .put(overwrite_raw)
                .layer(DefaultBodyLimit::disable()),
        )
        .route("/api/objects/{id}/accesses", get(list_accesses))
        // Group routes
        .route("/api/groups", get(list_groups).post(create_group))
        .route("/api/groups/names", get(list_group_names))
        .route(
            "/api/groups/{key}",
            get(get_group).put(update_group).delete(delete_group),
        )
        // Event long-poll
        .route("/api/events/{group}", get(next_event))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::Harness;

    #[tokio::test]
    async fn router_builds_with_state() {
        let h = Harness::new().await;
        let _app: Router = routes().with_state(AppState::from(&h));
    }
}
