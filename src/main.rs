//! # Jaeger Query v3 - Jaeger api_v3 Query Service in Rust
//!
//! This application serves the Jaeger `api_v3` query protocol. Traces are read
//! from a Jaeger storage plugin and returned to clients in OpenTelemetry (OTLP)
//! form.
//!
//! ## Architecture
//!
//! The application consists of:
//! - A gRPC server implementing `jaeger.api_v3.QueryService`
//! - An HTTP gateway exposing the same operations as JSON
//! - A query engine client for the `jaeger.storage.v1.SpanReaderPlugin` backend
//!
//! Requests flow through the parameter translator ([`query`]), the query engine
//! ([`engine`]), the OTLP converter ([`convert`]) and the stream emitter
//! ([`emit`]).
//!
//! ## Configuration
//!
//! Listen addresses, the storage backend URI and the log level are set from the
//! command line. `RUST_LOG` overrides the log level.

use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use simple_logger::SimpleLogger;
use tonic::codec::CompressionEncoding;

mod codec;
mod convert;
mod emit;
mod engine;
mod error;
mod gateway;
mod handler;
mod model;
mod query;

use engine::RemoteSpanReader;
use handler::Handler;
use rpc::jaeger::api_v3::query_service_server::QueryServiceServer;

/// Protocol buffer definitions generated at build time.
///
/// OTLP messages come from the `opentelemetry-proto` crate; Jaeger messages
/// refer to them directly.
pub mod rpc {
    /// Jaeger protocol definitions.
    pub mod jaeger {
        /// Jaeger span model shared by the storage protocol.
        pub mod api_v2 {
            tonic::include_proto!("jaeger.api_v2");
        }

        /// The OTLP-based query API served by this application.
        pub mod api_v3 {
            tonic::include_proto!("jaeger.api_v3");
        }

        /// Storage plugin protocol.
        pub mod storage {
            pub mod v1 {
                tonic::include_proto!("jaeger.storage.v1");
            }
        }
    }
}

/// Command line arguments for the query service
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Storage plugin gRPC endpoint URI
    #[arg(long, default_value = "http://127.0.0.1:17271")]
    storage_host: http::Uri,

    /// Listen address of the gRPC query service
    #[arg(long, default_value = "0.0.0.0:16685")]
    grpc_addr: SocketAddr,

    /// Listen address of the HTTP gateway
    #[arg(long, default_value = "0.0.0.0:16686")]
    http_addr: SocketAddr,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: log::LevelFilter,
}

/// Main application entry point.
///
/// Serves the gRPC query service and the HTTP gateway concurrently; both share
/// one handler and one storage connection. Returns when either server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let args = Args::parse();

    SimpleLogger::new()
        .with_level(args.log_level)
        .env()
        .init()?;

    log::info!("Using storage backend at {}", args.storage_host);
    let handler = Handler::new(Arc::new(RemoteSpanReader::new(args.storage_host)));

    let query_service = QueryServiceServer::new(handler.clone())
        .accept_compressed(CompressionEncoding::Gzip)
        .send_compressed(CompressionEncoding::Gzip);
    let grpc = async {
        log::info!("gRPC query service listening on {}", args.grpc_addr);
        tonic::transport::Server::builder()
            .add_service(query_service)
            .serve(args.grpc_addr)
            .await
            .map_err(Box::<dyn Error + Send + Sync>::from)
    };

    let app = gateway::router(handler);
    let listener = tokio::net::TcpListener::bind(args.http_addr).await?;
    let http = async {
        log::info!("HTTP gateway listening on {}", args.http_addr);
        axum::serve(listener, app)
            .await
            .map_err(Box::<dyn Error + Send + Sync>::from)
    };

    tokio::try_join!(grpc, http)?;
    Ok(())
}
