use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use tracing::{error, info};

use twin_desired_gateway::config::Config;
use twin_desired_gateway::middleware::observability::Metrics;
use twin_desired_gateway::protocols::rest;
use twin_desired_gateway::store::{build_store, SharedTwinStore};

const DEFAULT_CONFIG_PATH: &str = "./config/gateway.yaml";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let explicit_path = parse_config_path_from_args().or_else(|| std::env::var("TWIN_GATEWAY_CONFIG").ok());
    let config_path = explicit_path.clone().unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let cfg = Config::load(&config_path, explicit_path.is_some())
        .context("loading config")?
        .with_env_overrides();
    info!(%config_path, store = ?cfg.store.kind, "loaded config");

    let store = build_store(&cfg).await.context("invalid IoT Hub connection string")?;
    let metrics = Metrics::new();
    let route: Arc<str> = Arc::from(cfg.core.route.as_str());

    let http_addr: SocketAddr = cfg.core.bind_http.parse().context("invalid core.bind_http")?;

    let make_svc = make_service_fn(move |_conn| {
        let store = store.clone();
        let metrics = metrics.clone();
        let route = route.clone();
        async move {
            Ok::<_, hyper::Error>(service_fn(move |req: Request<Body>| {
                let store = store.clone();
                let metrics = metrics.clone();
                let route = route.clone();
                async move { handle_http(req, &route, store, metrics).await }
            }))
        }
    });

    let server = Server::bind(&http_addr)
        .serve(make_svc)
        .with_graceful_shutdown(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("shutdown requested"),
                Err(e) => {
                    error!(error=%e, "failed to listen for ctrl-c; serving until killed");
                    std::future::pending::<()>().await;
                }
            }
        });
    info!(%http_addr, route = %cfg.core.route, "http listening");

    if let Err(e) = server.await {
        error!(error=%e, "http server error");
    }

    Ok(())
}

async fn handle_http(
    req: Request<Body>,
    route: &str,
    store: SharedTwinStore,
    metrics: Metrics,
) -> Result<Response<Body>, hyper::Error> {
    if req.uri().path() == route {
        if req.method() != &Method::POST {
            return Ok(rest::text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed"));
        }
        return rest::handle_update(req, store, metrics).await;
    }

    match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => Ok(Response::new(Body::from("ok"))),
        (&Method::GET, "/metrics") => Ok(metrics.render()),
        _ => Ok(rest::text(StatusCode::NOT_FOUND, "not found")),
    }
}

fn parse_config_path_from_args() -> Option<String> {
    let mut args = std::env::args().skip(1);
    while let Some(a) = args.next() {
        if a == "--config" {
            return args.next();
        }
        if let Some(v) = a.strip_prefix("--config=") {
            return Some(v.to_string());
        }
    }
    None
}
