use std::env;
use std::path::PathBuf;

use prost::Message;

fn main() -> anyhow::Result<()> {
    let out_dir = PathBuf::from(env::var("OUT_DIR")?);
    let descriptor_path = out_dir.join("proto_descriptor.bin");

    let proto_files = [
        "proto/envoy/config/core/v3/base.proto",
        "proto/envoy/type/v3/http_status.proto",
        "proto/envoy/service/ext_proc/v3/external_processor.proto",
        "proto/google/rpc/status.proto",
        "proto/grpc/health/v1/health.proto",
    ];

    let mut config = prost_build::Config::new();
    config.protoc_executable(protox::protoc_from_env());
    config.file_descriptor_set_path(&descriptor_path);
    config.extern_path(".google.protobuf.Struct", "::prost_wkt_types::Struct");
    config.extern_path(".google.protobuf.Any", "::prost_wkt_types::Any");
    config.extern_path(".google.protobuf.Value", "::prost_wkt_types::Value");
    config.bytes(["."]);

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(false)
        .file_descriptor_set_path(&descriptor_path)
        .extern_path(".google.protobuf.Struct", "::prost_wkt_types::Struct")
        .extern_path(".google.protobuf.Any", "::prost_wkt_types::Any")
        .extern_path(".google.protobuf.Value", "::prost_wkt_types::Value")
        .compile_protos_with_config(config, &proto_files, &["proto"])?;

    let descriptor_bytes = std::fs::read(&descriptor_path)?;
    let descriptor_set = prost_types::FileDescriptorSet::decode(descriptor_bytes.as_slice())?;
    prost_wkt_build::add_serde(out_dir, descriptor_set);

    for file in proto_files {
        println!("cargo:rerun-if-changed={file}");
    }
    Ok(())
}
