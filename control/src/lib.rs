pub mod api;
pub mod config;
pub mod daemon;
pub mod db;
pub mod error;
pub mod model;
pub mod services;
pub mod tls;
pub mod types;

use anyhow::Result;
use axum::Router;
use std::sync::Arc;

use api::AppState;
use config::Settings;
use services::HostResolver;

/// Open the database and assemble the HTTP application.
pub fn build_app(settings: &Settings, resolver: Arc<dyn HostResolver>) -> Result<Router> {
    let db = db::init_db(settings.db_path.clone())?;
    let state = Arc::new(AppState::new(settings, db, resolver)?);
    Ok(api::create_router(state))
}
