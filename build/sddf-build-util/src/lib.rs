use std::env;

use anyhow::Result;
use serde::de::DeserializeOwned;

/// Exposes the CPU's M-profile architecture version. This isn't available in
/// rustc's standard environment.
///
/// This will set either `cfg(armv7m)` or `cfg(armv8m)` depending on the value
/// of the `TARGET` environment variable.
pub fn expose_m_profile() {
    let target = env::var("TARGET").unwrap();

    if target.starts_with("thumbv7m") || target.starts_with("thumbv7em") {
        println!("cargo:rustc-cfg=armv7m");
    } else if target.starts_with("thumbv8m") {
        println!("cargo:rustc-cfg=armv8m");
    } else {
        println!("Don't know the target {}", target);
        std::process::exit(1);
    }
}

/// Exposes the board type from the `HUBRIS_BOARD` envvar into
/// `cfg(target_board="...")`.
pub fn expose_target_board() {
    if let Ok(board) = env::var("HUBRIS_BOARD") {
        println!("cargo:rustc-cfg=target_board=\"{}\"", board);
    }
    println!("cargo:rerun-if-env-changed=HUBRIS_BOARD");
}

/// Loads this deployment's app-wide configuration (the `[net]` table and any
/// siblings) from the `SDDF_APP_CONFIG` environment variable, which the
/// top-level app crate's build script populates from its own TOML.
pub fn config<T: DeserializeOwned>() -> Result<T> {
    toml_from_env("SDDF_APP_CONFIG")
}

/// Loads one task's own configuration fragment from `SDDF_TASK_CONFIG`.
pub fn task_config<T: DeserializeOwned>() -> Result<T> {
    toml_from_env("SDDF_TASK_CONFIG")
}

fn toml_from_env<T: DeserializeOwned>(var: &str) -> Result<T> {
    let config = env::var(var)?;
    let rval = toml::from_str(&config)?;
    println!("cargo:rerun-if-env-changed={}", var);
    Ok(rval)
}
