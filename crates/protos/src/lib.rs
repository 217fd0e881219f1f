//! Generated protobuf/gRPC bindings for the envoy ext_proc wire contract and
//! the standard gRPC health-check service, vendored from the upstream Envoy
//! and googleapis IDL so this repo does not depend on a system protoc or a
//! network fetch at build time.

pub mod envoy {
    pub mod config {
        pub mod core {
            pub mod v3 {
                include!(concat!(env!("OUT_DIR"), "/envoy.config.core.v3.rs"));
            }
        }
    }
    pub mod r#type {
        pub mod v3 {
            include!(concat!(env!("OUT_DIR"), "/envoy.type.v3.rs"));
        }
    }
    pub mod service {
        pub mod ext_proc {
            pub mod v3 {
                include!(concat!(env!("OUT_DIR"), "/envoy.service.ext_proc.v3.rs"));
            }
        }
    }
}

pub mod google {
    pub mod rpc {
        include!(concat!(env!("OUT_DIR"), "/google.rpc.rs"));
    }
}

pub mod grpc {
    pub mod health {
        pub mod v1 {
            include!(concat!(env!("OUT_DIR"), "/grpc.health.v1.rs"));
        }
    }
}

pub use envoy::config::core::v3 as core_v3;
pub use envoy::r#type::v3 as type_v3;
pub use envoy::service::ext_proc::v3 as ext_proc_v3;
pub use grpc::health::v1 as health_v1;
