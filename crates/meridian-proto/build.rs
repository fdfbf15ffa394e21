// Build script for the wire-protocol crate.
//
// Compiles the protobuf definitions under `proto/` into Rust modules with
// `tonic-build`. Keeping generation inside the crate means the SDK and any
// plugin client get consistent types without a separate codegen step.

fn main() {
    println!("cargo:rerun-if-changed=proto");

    if std::env::var_os("PROTOC").is_none() {
        if let Ok(protoc) = protoc_bin_vendored::protoc_bin_path() {
            std::env::set_var("PROTOC", protoc);
        }
    }

    tonic_build::configure()
        .build_client(true)
        .build_server(true)
        .compile(&["proto/meridian/v1/plugin.proto"], &["proto"])
        .expect("failed to compile protobufs");
}
