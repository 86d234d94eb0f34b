//! Build script for generating Rust code from Protocol Buffer definitions.
//!
//! Two services are generated:
//!
//! - `jaeger.api_v3.QueryService`, served by this process to query clients
//! - `jaeger.storage.v1.SpanReaderPlugin`, called by this process to reach the
//!   storage backend
//!
//! The OpenTelemetry packages are mapped onto the opentelemetry-proto crate so
//! that `TracesData` is the ecosystem type rather than a local copy. Google
//! well-known types come from prost-types.

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/");
    println!("cargo:rerun-if-changed=build.rs");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        // Reuse the OpenTelemetry types from opentelemetry-proto
        .extern_path(".opentelemetry.proto", "::opentelemetry_proto::tonic")
        .compile(
            &[
                "proto/jaeger/api_v2/model.proto",
                "proto/jaeger/api_v3/query_service.proto",
                "proto/jaeger/storage/v1/storage.proto",
            ],
            &["proto"],
        )?;

    Ok(())
}
