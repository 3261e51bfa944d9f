use tonic_build::manual::{Builder, Method, Service};

fn main() {
    // Messages are prost structs in src/lib.rs; only the service is generated
    let method = |name: &str, route: &str, input: &str, output: &str| {
        Method::builder()
            .name(name)
            .route_name(route)
            .input_type(format!("crate::control::{input}"))
            .output_type(format!("crate::control::{output}"))
            .codec_path("tonic::codec::ProstCodec")
            .build()
    };

    let control_plane = Service::builder()
        .name("ControlPlane")
        .package("cacheboot.control")
        .method(method("ping", "Ping", "PingRequest", "PingResponse"))
        .method(method(
            "request_bootstrap_endpoint",
            "RequestBootstrapEndpoint",
            "BootstrapEndpointRequest",
            "BootstrapEndpointResponse",
        ))
        .build();

    Builder::new().compile(&[control_plane]);
}
