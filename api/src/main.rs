use relatos_api::{config::Config, db, init_tracing, router, AppState};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    init_tracing();
    let config = Config::from_env();

    let pool = match db::open_pool(&config.database_url) {
        Ok(pool) => pool,
        Err(err) => {
            error!(error = %err, path = %config.database_url, "failed to open database");
            std::process::exit(1);
        }
    };
    if let Err(err) = db::run_migrations(&pool) {
        error!(error = %err, "failed to run migrations");
        std::process::exit(1);
    }

    let state = AppState::new(
        pool,
        config.jwt_secret.clone(),
        config.categories.clone(),
        config.cors_origin.clone(),
    );
    let app = router(state);

    let listener = match tokio::net::TcpListener::bind(&config.bind_addr).await {
        Ok(listener) => listener,
        Err(err) => {
            error!(error = %err, addr = %config.bind_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %config.bind_addr, "API server listening");
    if let Err(err) = axum::serve(listener, app).await {
        error!(error = %err, "server stopped");
    }
}
