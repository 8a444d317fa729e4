/*!
xtrace reports an entry and an exit event for every HTTP request a handler
serves, continuing distributed traces carried in the `X-Trace` header.

It provides:
 * a handler wrapper that keeps the handler's signature (`Instrumentation::wrap`)
 * a tower layer for `http` services (`Instrumentation::layer`)
 * trace subsystems: OpenTelemetry (`otel`), in-memory (`recorder`), and none (`NoopTracer`)
 * config file loading with environment overrides (via Figment & Doku)
 * command line parsing (via clap)
 * logging & tracing & metrics bootstrap (via tracing & opentelemetry)

### What gets reported

For each request the trace subsystem is asked to continue the trace in the
request's `X-Trace` header, or to start a new one when there is none. The
entry event carries `Method`, `HTTP-Host`, `URL`, `Remote-Host` and
`Query-String`. When the trace is sampled the response gets an `X-Trace`
header continuing it. Once the handler is done the exit event reports the
response `Status` plus the handler's `Controller` and `Action`.

### Wrapping a handler

```rust
use http::{Request, StatusCode};
use xtrace::recorder::{Recorder, Sampling};
use xtrace::{Handler, Instrumentation, ResponseBuffer, ResponseWriter};

fn not_found(w: &mut dyn ResponseWriter, _req: &Request<()>) {
    w.write_header(StatusCode::NOT_FOUND);
}

let recorder = Recorder::new(Sampling::Always);
let handler = Instrumentation::new(recorder.clone()).wrap(not_found);

let mut response = ResponseBuffer::new();
handler.serve(&mut response, &Request::new(()));

let response = response.into_response();
assert_eq!(response.status(), StatusCode::NOT_FOUND);
assert!(response.headers().contains_key("x-trace"));

let exit = &recorder.exits()[0];
assert_eq!(exit.kv.get("Status"), Some(&xtrace::Value::Int(404)));
```

### Instrumenting a tower service

```rust
# use std::convert::Infallible;
use http::{Request, Response};
use tower::{service_fn, Layer as _, ServiceExt as _};
use xtrace::{Instrumentation, Labels, NoopTracer};

# #[tokio::main(flavor = "current_thread")]
# async fn main() -> Result<(), Infallible> {
let layer = Instrumentation::new(NoopTracer)
    .layer()
    .with_labels(Labels::new("users", "show"));
let svc = layer.layer(service_fn(|_req: Request<()>| async {
    Ok::<_, Infallible>(Response::new("hi"))
}));

let response = svc.oneshot(Request::new(())).await?;
assert_eq!(*response.body(), "hi");
# Ok(())
# }
```

### Application bootstrap

Embed the crate's settings in your own and let `xtrace` handle the CLI,
the config file, the environment overrides and the telemetry providers:

```rust,no_run
use doku::Document;
use serde::Deserialize;

#[derive(Document, Deserialize)]
pub struct Settings {
    /// Instrumentation settings.
    pub instrumentation: xtrace::config::InstrumentationSettings,

    /// Telemetry settings.
    pub telemetry: xtrace::telemetry::TelemetrySettings,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let service_info = xtrace::service_info!();
    let cli = xtrace::cli::Cli::<Settings>::new(&service_info, "MYAPP_");
    let _telemetry = xtrace::telemetry::init(&service_info, &cli.config.telemetry)?;

    let instrumentation = xtrace::Instrumentation::from_settings(
        xtrace::otel::OtelTracer::global(service_info.name),
        &cli.config.instrumentation,
    );
    // instrumentation.wrap(handler) / instrumentation.layer()
    # let _ = instrumentation;

    Ok(())
}
```

Environment variables override the config file, replacing the dot (`.`)
with double underscores (`__`):
```sh
MYAPP_INSTRUMENTATION__LAYER_NAME=axum ./my_app --config ./my_app.toml
```

### Examples

There is a `full` example in the `demos` directory of the source tree.

*/
#![deny(
    future_incompatible,
    deprecated_safe,
    rust_2018_compatibility,
    rust_2018_idioms,
    rust_2021_compatibility,
    rust_2024_compatibility
)]
// Document ALL THE THINGS!
#![deny(missing_docs)]

pub mod cli;
pub mod config;
pub mod extract;
pub mod handler;
pub mod layer;
pub mod observer;
pub mod otel;
pub mod recorder;
pub mod telemetry;
pub mod trace;

pub use extract::{trace_from_request, RemoteAddr, RequestMetadata, X_TRACE};
pub use handler::{Handler, Instrumentation, Labels, Traced, DEFAULT_LAYER_NAME};
pub use layer::{XTraceLayer, XTraceService};
pub use observer::{ObservedStatus, ResponseBuffer, ResponseWriter, StatusObserver};
pub use trace::{KvMap, NoopTrace, NoopTracer, Trace, TraceFactory, Value};

/// Configuration related errors
#[derive(Debug, snafu::Snafu)]
pub enum Error {
    /// Figment could not extract a config from the file with env overrides
    #[snafu(display("Could not load application configuration: {source}"))]
    ConfigLoad {
        /// The source figment error
        source: Box<figment::Error>,
    },

    /// Writing to the config file was not possible
    #[snafu(display("Could not write to the config file at {path:?}: {source}"))]
    ConfigFileWrite {
        /// path where the config file was trying to be written to
        path: std::path::PathBuf,
        /// the IO error that occurred
        source: std::io::Error,
    },
}

/// Service information collected from the build.
#[derive(Clone, Debug, Default)]
pub struct ServiceInfo {
    /// The name of the service.
    pub name: &'static str,

    /// The service identifier as used in metrics.
    ///
    /// Usually the same as [`ServiceInfo::name`], with hyphens (`-`) replaced by underscores `_`.
    pub name_in_metrics: String,

    /// The version of the service.
    pub version: &'static str,

    /// Service author.
    pub author: &'static str,
    /// The description of the service.
    pub description: &'static str,
}

/**
Creates [`ServiceInfo`] from the information in `Cargo.toml` manifest of the service.

ServiceInfo names the service in telemetry resources and in the CLI help.
```rust
let service_info = xtrace::service_info!();
assert_eq!(service_info.name, "xtrace");
```

[`ServiceInfo::name_in_metrics`] is the same as the package name, with hyphens (`-`) replaced
by underscores (`_`).
*/
#[macro_export]
macro_rules! service_info {
    () => {
        $crate::ServiceInfo {
            name: env!("CARGO_PKG_NAME"),
            name_in_metrics: env!("CARGO_PKG_NAME").replace("-", "_"),
            version: env!("CARGO_PKG_VERSION"),
            author: env!("CARGO_PKG_AUTHORS"),
            description: env!("CARGO_PKG_DESCRIPTION"),
        }
    };
}
