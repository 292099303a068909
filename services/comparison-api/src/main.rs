use std::time::Duration;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use shared::config::Settings;
use shared::state::StateStore;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

mod routes;

use routes::AppState;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let settings = Settings::new()?;
    let store = StateStore::open(&settings.state_path).await?;
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.openai_timeout_secs))
        .build()?;
    let openai = settings.openai();
    if openai.api_key.is_none() {
        info!("OPENAI_API_KEY not set, weight suggestions are disabled");
    }

    let state = web::Data::new(AppState { store, http, openai });
    info!(bind = %settings.bind_address, port = settings.port, "starting comparison-api");
    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Cors::permissive())
            .configure(routes::configure)
    })
    .bind((settings.bind_address.as_str(), settings.port))?
    .run()
    .await?;
    Ok(())
}
