//! cacheboot Protocol - control-plane service definitions
//!
//! Members use this service to find each other and to ask a peer for a
//! bootstrap endpoint. Cache contents never travel over gRPC; they stream
//! over the one-shot transfer sockets.

/// Control-plane service (membership and bootstrap negotiation)
pub mod control {
    /// Identity of a cluster member
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct NodeInfo {
        /// Node UUID in its hyphenated text form
        #[prost(string, tag = "1")]
        pub id: String,
        #[prost(string, tag = "2")]
        pub name: String,
    }

    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct PingRequest {}

    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct PingResponse {
        #[prost(message, optional, tag = "1")]
        pub node: Option<NodeInfo>,
    }

    /// Cache snapshot request multicast by a bootstrapping member
    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct BootstrapEndpointRequest {
        #[prost(bool, tag = "1")]
        pub discover_all: bool,
        #[prost(string, repeated, tag = "2")]
        pub known_cache_names: Vec<String>,
        #[prost(string, repeated, tag = "3")]
        pub to_load_cache_names: Vec<String>,
    }

    #[derive(Clone, PartialEq, Eq, ::prost::Message)]
    pub struct BootstrapEndpointResponse {
        #[prost(message, optional, tag = "1")]
        pub node: Option<NodeInfo>,
        /// Transfer socket address; unset when the member has nothing to send
        #[prost(string, optional, tag = "2")]
        pub endpoint: Option<String>,
    }

    include!(concat!(env!("OUT_DIR"), "/cacheboot.control.ControlPlane.rs"));
}
