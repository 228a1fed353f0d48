// build.rs

use std::env;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let version = env::var("STOLON_PGBOUNCER_FAILOVER_VERSION")
        .unwrap_or_else(|_| env::var("CARGO_PKG_VERSION").unwrap_or_else(|_| "dev".to_string()));

    println!("cargo:rustc-env=CARGO_PKG_VERSION={version}");
    println!("cargo:rerun-if-env-changed=STOLON_PGBOUNCER_FAILOVER_VERSION");

    // SAFETY: build script runs single-threaded before any other code sets this var.
    unsafe {
        env::set_var("PROTOC", protobuf_src::protoc());
    }

    tonic_prost_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(&["proto/agent.proto"], &["proto/"])?;

    // Only for MSVC targets
    #[cfg(all(windows, target_env = "msvc"))]
    println!("cargo:rustc-link-arg=/STACK:0x1000000"); // 16MB stack size

    Ok(())
}
