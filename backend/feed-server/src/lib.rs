//! Feed HTTP server: serves the event feed as paginated Atom documents.

pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod links;

pub use config::Config;
pub use error::{AppError, Result};
pub use handlers::AppState;
pub use links::LinkBuilder;

use actix_web::web;

/// Route table: `/notifications/recent`, `/notifications/{feedid}`,
/// `/notifications/{aggregate_id}/{version}`, `/health`.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/notifications")
            .route("/recent", web::get().to(handlers::recent_feed))
            .route(
                "/{aggregate_id}/{version}",
                web::get().to(handlers::event_entry),
            )
            .route("/{feedid}", web::get().to(handlers::archived_feed)),
    )
    .route("/health", web::get().to(handlers::health));
}
