use std::convert::Infallible;

use clap::Parser;
use doku::Document;
use http::{Request, Response, StatusCode};
use serde::Deserialize;
use tower::{service_fn, ServiceBuilder, ServiceExt as _};
use xtrace::{Handler as _, RemoteAddr, ResponseBuffer, ResponseWriter};

/// Top Level Settings
#[derive(Document, Deserialize)]
pub struct Settings {
    /// App Settings
    pub application: Application,

    /// Instrumentation settings.
    pub instrumentation: xtrace::config::InstrumentationSettings,

    /// Telemetry settings.
    pub telemetry: xtrace::telemetry::TelemetrySettings,
}

#[derive(Document, Deserialize)]
pub struct Application {
    /// Hostname requests are addressed to
    #[doku(example = "shop.example")]
    pub host: String,
}

#[derive(Parser)]
/// Serves a few requests through instrumented handlers and exits.
pub struct Arguments {
    /// Continue this X-Trace token instead of starting new traces
    #[arg(short, long)]
    pub trace: Option<String>,
}

fn show_order(w: &mut dyn ResponseWriter, req: &Request<()>) {
    if req.uri().path() != "/orders/1" {
        w.write_header(StatusCode::NOT_FOUND);
        return;
    }
    if let Err(err) = w.write_all(b"{\"id\":1}") {
        tracing::warn!(%err, "could not write order");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service_info = xtrace::service_info!();
    let cli = xtrace::cli::Cli::<Settings, Arguments>::new(&service_info, "MYAPP_");

    let _telemetry = xtrace::telemetry::init(&service_info, &cli.config.telemetry)?;

    let instrumentation = xtrace::Instrumentation::from_settings(
        xtrace::otel::OtelTracer::global(service_info.name),
        &cli.config.instrumentation,
    );

    let request = |path: &str| {
        let mut builder = Request::builder()
            .uri(path)
            .header(http::header::HOST, &cli.config.application.host)
            .extension(RemoteAddr(([127, 0, 0, 1], 40_000).into()));
        if let Some(token) = &cli.args.trace {
            builder = builder.header(xtrace::X_TRACE, token);
        }
        builder.body(())
    };

    let handler = instrumentation.wrap(show_order);
    for path in ["/orders/1", "/orders/2"] {
        let mut response = ResponseBuffer::new();
        handler.serve(&mut response, &request(path)?);
        let response = response.into_response();
        tracing::info!(
            path,
            status = response.status().as_u16(),
            x_trace = ?response.headers().get(xtrace::X_TRACE),
            "handler served"
        );
    }

    let svc = ServiceBuilder::new()
        .layer(instrumentation.layer())
        .service(service_fn(|req: Request<()>| async move {
            let status = if req.uri().path() == "/health" {
                StatusCode::NO_CONTENT
            } else {
                StatusCode::NOT_FOUND
            };
            let mut response = Response::new(());
            *response.status_mut() = status;
            Ok::<_, Infallible>(response)
        }));
    let response = svc.oneshot(request("/health")?).await?;
    tracing::info!(
        status = response.status().as_u16(),
        x_trace = ?response.headers().get(xtrace::X_TRACE),
        "service served"
    );

    Ok(())
}
