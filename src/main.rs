use std::path::PathBuf;

use actix_web::{
    get, middleware, web::Data, App, HttpRequest, HttpResponse, HttpServer, Responder,
};
use clap::Parser;
use prometheus::{Encoder, TextEncoder};

pub use cryostat_operator::{self, telemetry, State};
use cryostat_operator::controllers::{
    Images, DEFAULT_CORE_IMAGE, DEFAULT_DATASOURCE_IMAGE, DEFAULT_GRAFANA_IMAGE,
};

#[derive(Debug, clap::Parser)]
struct Arguments {
    /// Image of the Cryostat core container
    #[arg(long = "core-image", env = "RELATED_IMAGE_CORE", default_value = DEFAULT_CORE_IMAGE)]
    core_image: String,

    /// Image of the jfr-datasource container
    #[arg(
        long = "datasource-image",
        env = "RELATED_IMAGE_DATASOURCE",
        default_value = DEFAULT_DATASOURCE_IMAGE
    )]
    datasource_image: String,

    /// Image of the Grafana dashboard container
    #[arg(
        long = "grafana-image",
        env = "RELATED_IMAGE_GRAFANA",
        default_value = DEFAULT_GRAFANA_IMAGE
    )]
    grafana_image: String,

    /// Token the operator presents to the Cryostat web API
    #[arg(
        long = "service-account-token-path",
        env = "SERVICE_ACCOUNT_TOKEN_PATH",
        default_value = "/var/run/secrets/kubernetes.io/serviceaccount/token"
    )]
    service_account_token_path: PathBuf,

    #[arg(long = "bind-address", env = "BIND_ADDRESS", default_value = "0.0.0.0:8080")]
    bind_address: String,
}

#[get("/metrics")]
async fn metrics(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let metrics = c.metrics();
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    match encoder.encode(&metrics, &mut buffer) {
        Ok(()) => HttpResponse::Ok().body(buffer),
        Err(e) => HttpResponse::InternalServerError().body(e.to_string()),
    }
}

#[get("/health")]
async fn health(_: HttpRequest) -> impl Responder {
    HttpResponse::Ok().json("healthy")
}

#[get("/")]
async fn index(c: Data<State>, _req: HttpRequest) -> impl Responder {
    let d = c.diagnostics().await;
    HttpResponse::Ok().json(&d)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    telemetry::init();

    let args: Arguments = Arguments::parse();

    // Initiatilize Kubernetes controller state
    let state = State::new(
        Images {
            core: args.core_image,
            datasource: args.datasource_image,
            grafana: args.grafana_image,
        },
        args.service_account_token_path,
    );
    let controller = cryostat_operator::run(state.clone());
    tokio::pin!(controller);

    // Start web server
    let server = HttpServer::new(move || {
        App::new()
            .app_data(Data::new(state.clone()))
            .wrap(middleware::Logger::default().exclude("/health"))
            .service(index)
            .service(health)
            .service(metrics)
    })
    .bind(&args.bind_address)?
    .shutdown_timeout(5)
    .run();

    tokio::pin!(server);

    // Both runtimes implements graceful shutdown, so poll until both are done
    tokio::join!(controller, server).1?;
    Ok(())
}
