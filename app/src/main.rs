// app/src/main.rs

use actix_web::{web as actix_data, App, HttpServer};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{fmt::format::FmtSpan, EnvFilter};

use tally_checkout::config::AppConfig;
use tally_checkout::gateway::GatewayRegistry;
use tally_checkout::services::reconciler;
use tally_checkout::state::AppState;
use tally_checkout::store::{self, PgStore, Stores};
use tally_checkout::web::configure_app_routes;

fn init_tracing(json: bool) {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
  let builder = tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_span_events(FmtSpan::CLOSE);
  if json {
    builder.json().init();
  } else {
    builder.init();
  }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
  // LOG_FORMAT is read before the config so the subscriber exists when the config logs.
  let json_logs = std::env::var("LOG_FORMAT").is_ok_and(|f| f.eq_ignore_ascii_case("json"));
  init_tracing(json_logs);

  tracing::info!("Starting checkout server...");

  let app_config = match AppConfig::from_env() {
    Ok(cfg) => cfg,
    Err(e) => {
      tracing::error!(error = %e, "Failed to load application configuration.");
      return Err(std::io::Error::other(e.to_string()));
    }
  };

  let stores = match app_config.database_url.as_deref() {
    Some(url) => {
      let pg = PgStore::connect(url).await.map_err(|e| {
        tracing::error!(error = %e, "Failed to connect to the database.");
        std::io::Error::other(e.to_string())
      })?;
      pg.migrate().await.map_err(|e| std::io::Error::other(e.to_string()))?;
      tracing::info!("Connected to the database and applied migrations.");
      Stores::from_backend(Arc::new(pg))
    }
    None => {
      tracing::warn!("DATABASE_URL not set; using the in-memory store.");
      Stores::in_memory()
    }
  };

  if app_config.seed_db || app_config.database_url.is_none() {
    if let Err(e) = store::seed_demo_data(&stores).await {
      tracing::error!(error = %e, "Failed to seed demo data.");
    }
  }

  let gateways = match GatewayRegistry::from_config(&app_config) {
    Ok(g) => g,
    Err(e) => {
      tracing::error!(error = %e, "Failed to build payment gateways.");
      return Err(std::io::Error::other(e.to_string()));
    }
  };

  let server_address = format!("{}:{}", app_config.server_host, app_config.server_port);
  let pending_timeout = app_config.pending_order_timeout();
  let reconcile_every = Duration::from_secs(app_config.reconcile_interval_secs.max(1));

  let app_state = AppState::new(stores.clone(), gateways, app_config);
  tracing::info!(sagas = app_state.sagas.len(), "Sagas registered.");

  let _reconciler = reconciler::spawn(stores, pending_timeout, reconcile_every);

  tracing::info!("Binding server to {}...", server_address);

  HttpServer::new(move || {
    App::new()
      .app_data(actix_data::Data::new(app_state.clone()))
      .wrap(tracing_actix_web::TracingLogger::default())
      .configure(configure_app_routes)
  })
  .bind(&server_address)?
  .run()
  .await
}
