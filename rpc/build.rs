fn main() {
    // Vendor protoc instead of requiring a system install, mirroring the
    // teacher's `rpc/build.rs` which pulls the wire definitions from a git
    // submodule and compiles them with `tonic_build`.
    std::env::set_var("PROTOC", protoc_bin_vendored::protoc_bin_path().unwrap());

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile(&["proto/shim.proto"], &["proto"])
        .unwrap_or_else(|e| panic!("agent shim protobuf compilation failed: {}", e));
}
