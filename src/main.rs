use actix_web::{middleware::Logger, web, App, HttpResponse, HttpServer, Responder};
use actix_governor::{Governor, GovernorConfigBuilder};
use dotenv::dotenv;
use log::{error, info};
use reqwest::{redirect, Client};
use serde::{Deserialize, Serialize};

mod classifier;
mod config;
mod error;
mod logging;
mod places;
mod resolver;

use config::AppConfig;
use error::PipelineError;
use places::VenueRecord;
use resolver::Coordinate;

const INDEX_HTML: &str = include_str!("../static/index.html");

#[derive(Debug, Deserialize)]
struct ClassifyRequest {
    #[serde(alias = "URL")]
    url: String,
    radius: Option<f64>,
}

#[derive(Debug, Serialize)]
struct ClassifyResponse {
    coordinate: Coordinate,
    venues: Vec<VenueRecord>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    kind: &'static str,
    error: String,
}

async fn index() -> impl Responder {
    HttpResponse::Ok()
        .content_type("text/html; charset=utf-8")
        .body(INDEX_HTML)
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "message": "Server is running"
    }))
}

async fn classify(
    req: web::Json<ClassifyRequest>,
    client: web::Data<Client>,
    config: web::Data<AppConfig>,
) -> impl Responder {
    let request_id = chrono::Utc::now().format("%Y%m%d%H%M%S%f").to_string();
    info!("Request {}: classify {}", request_id, req.url);

    match run_pipeline(&client, &config, &req).await {
        Ok(response) => {
            info!(
                "Request {}: classified {} venues",
                request_id,
                response.venues.len()
            );
            HttpResponse::Ok().json(response)
        }
        Err(e) => {
            error!("Request {}: pipeline failed: {}", request_id, e);
            HttpResponse::build(e.status_code()).json(ErrorResponse {
                kind: e.kind(),
                error: e.to_string(),
            })
        }
    }
}

/// Resolver -> Fetcher -> Classifier, strictly in that order. Any stage
/// error halts the request; no partial venue list escapes.
async fn run_pipeline(
    client: &Client,
    config: &AppConfig,
    req: &ClassifyRequest,
) -> Result<ClassifyResponse, PipelineError> {
    let coordinate = resolver::resolve_coordinates(client, config, &req.url).await?;
    let radius = req.radius.unwrap_or(config.default_radius_m);
    let venues = places::nearby_restaurants(client, config, coordinate, radius).await?;
    let venues = classifier::classify_all(client, config, venues).await?;
    Ok(ClassifyResponse { coordinate, venues })
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();

    if let Err(e) = logging::setup_logging() {
        eprintln!("Failed to set up logging: {}", e);
        return Ok(());
    }

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Configuration error: {}", e);
            eprintln!("Configuration error: {}", e);
            return Ok(());
        }
    };

    let client = match Client::builder()
        .redirect(redirect::Policy::limited(config.max_redirect_hops))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to build HTTP client: {}", e);
            return Ok(());
        }
    };

    let bind_address = config.bind_address.clone();
    info!("Starting cuisinescout server on {}", bind_address);

    HttpServer::new(move || {
        let governor_config = GovernorConfigBuilder::default()
            .per_second(5)
            .burst_size(10)
            .finish()
            .unwrap();

        App::new()
            .wrap(Logger::default())
            .wrap(Governor::new(&governor_config))
            .app_data(web::Data::new(client.clone()))
            .app_data(web::Data::new(config.clone()))
            .route("/", web::get().to(index))
            .route("/health", web::get().to(health_check))
            .route("/classify", web::post().to(classify))
    })
    .bind(bind_address)?
    .run()
    .await
}
