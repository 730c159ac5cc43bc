const fn version_or_cargo(opt: Option<&'static str>) -> &'static str {
    match opt {
        Some(val) => val,
        None => env!("CARGO_PKG_VERSION"),
    }
}

/// Build-time `FLEETDOCK_VERSION`, falling back to the crate version.
pub const VERSION: &str = version_or_cargo(option_env!("FLEETDOCK_VERSION"));
