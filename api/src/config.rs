use std::env;

use relatos_shared::Categories;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub jwt_secret: String,
    pub cors_origin: String,
    pub bind_addr: String,
    pub categories: Categories,
}

impl Config {
    pub fn from_env() -> Self {
        let categories = env::var("RELATOS_CATEGORIES")
            .ok()
            .map(|raw| Categories::parse_list(&raw))
            .filter(|c| !c.labels().is_empty())
            .unwrap_or_default();

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "relatos.db".to_string()),
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| "dev-secret-change-me".to_string()),
            cors_origin: env::var("CORS_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            categories,
        }
    }
}
