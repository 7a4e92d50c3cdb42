use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use ledgersplit::{routes, settings::Settings, store::Store};
use mongodb::Client;

fn cors(allowed_origins: &[String]) -> Cors {
    if allowed_origins.is_empty() {
        return Cors::permissive();
    }
    allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
}

#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let settings = Settings::new()?;

    tracing_subscriber::fmt()
        .with_env_filter(format!(
            "ledgersplit={level},actix_web={level}",
            level = settings.log.level
        ))
        .init();

    if settings.auth.bot_token.is_empty() {
        tracing::warn!("no auth.bot_token configured, group routes will reject every request");
    }

    tracing::info!("connecting to MongoDB");
    let client = Client::with_uri_str(&settings.mongodb.uri).await?;
    let store = Store::new(&client, &settings.mongodb.database);
    store.ensure_indexes().await?;
    tracing::info!(database = %settings.mongodb.database, "connected");

    let auth = web::Data::new(settings.auth.clone());
    let store = web::Data::new(store);
    let allowed_origins = settings.cors.allowed_origins.clone();

    tracing::info!(
        host = %settings.server.host,
        port = settings.server.port,
        "starting server"
    );
    HttpServer::new(move || {
        App::new()
            .wrap(cors(&allowed_origins))
            .app_data(store.clone())
            .app_data(auth.clone())
            .configure(routes::configure)
    })
    .bind((settings.server.host.as_str(), settings.server.port))?
    .run()
    .await?;

    Ok(())
}
