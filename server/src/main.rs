mod config;
mod db;
mod frame;
mod rate_limit;
mod routes;
mod services;
mod state;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::ServerConfig::from_env().expect("invalid configuration");
    let port = config.port;

    let pool = match config.database_url.as_deref() {
        Some(url) => Some(db::init_pool(url).await.expect("database init failed")),
        None => {
            tracing::warn!("DATABASE_URL not set; sessions are kept in memory only");
            None
        }
    };

    let state = state::AppState::new(pool, config);

    // Spawn background persistence task (no-op without a database).
    let _persistence = services::persistence::spawn_persistence_task(state.clone());

    let app = routes::app(state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "session server listening");
    axum::serve(listener, app).await.expect("server failed");
}
