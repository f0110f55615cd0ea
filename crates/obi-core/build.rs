//! Build script for generating protobuf code
//!
//! Generation only runs with the `proto-gen` feature; the checked-in types in
//! `src/proto/mod.rs` are used otherwise.

use std::path::PathBuf;
use std::process::Command;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=../../proto/obi/master/v1/master.proto");

    if std::env::var_os("CARGO_FEATURE_PROTO_GEN").is_none() {
        return Ok(());
    }

    let protoc_available =
        std::env::var("PROTOC").is_ok() || Command::new("protoc").arg("--version").output().is_ok();

    if !protoc_available {
        return Err("proto-gen requires protoc: install it or set the PROTOC env var".into());
    }

    let out_dir = PathBuf::from(std::env::var("OUT_DIR")?);

    // The control plane only ever calls the master
    tonic_build::configure()
        .build_server(false)
        .build_client(true)
        .out_dir(&out_dir)
        .compile(&["../../proto/obi/master/v1/master.proto"], &["../../proto"])?;

    Ok(())
}
