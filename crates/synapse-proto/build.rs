/// Builds the gRPC client and server code for the `synapse.proto` definition
/// using `tonic-build`.
///
/// # Byte Field Optimization
///
/// The `images` field on `GenerateRequest` is explicitly marked with
/// `.bytes(...)` so it deserializes as a `Bytes` (from the `bytes` crate)
/// instead of `Vec<u8>`, avoiding a copy for what can be multi-megabyte
/// image payloads.
///
/// # Output
///
/// Generated code is accessible via:
///
/// ```rust
/// pub mod synapse {
///     tonic::include_proto!("synapse");
/// }
/// ```
use std::env;
use std::path::PathBuf;

fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("synapse_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();

    config
        .bytes([".synapse.GenerateRequest.images"])
        .file_descriptor_set_path(&descriptor_path);

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/synapse.proto"], &["proto"])
        .unwrap();
}
