//! Process-wide configuration: the one environment variable the core reads
//! (§6/§D) and logging setup for the CLI binary (§B).
//!
//! Per the REDESIGN FLAGS guidance to "confine environment reads to the
//! adapter boundary only", this module does not itself read
//! [`GFO_GDAL_HOME_VAR`] — `container::translate` does, exactly once, right
//! before it shells out to the external translation collaborator. This
//! module only names the variable so both sides agree on its spelling.

use tracing_subscriber::EnvFilter;

/// The only environment variable the core is aware of: an alternate
/// directory to look up the external `ogr2ogr`-style translation binary in,
/// analogous to GDAL's own `GDAL_DATA` lookup. Read by
/// [`crate::container::translate`]; absent, the binary is resolved from
/// `PATH`.
pub const GFO_GDAL_HOME_VAR: &str = "GFO_GDAL_HOME";

/// The env var controlling the default log filter, read by
/// [`init_logging`]. CLI `-v`/`-q` flags override it by passing an explicit
/// `default_directive`.
pub const GFO_LOG_VAR: &str = "GFO_LOG";

/// Installs a `tracing_subscriber::fmt` subscriber with an `EnvFilter`
/// seeded from `GFO_LOG` (default `info`). `default_directive` lets the CLI's
/// `-v`/`-q` flags raise or lower the default without touching the
/// environment. Safe to call at most once per process; the CLI binary is the
/// only caller (§5: "no in-process global state... a per-operation logger
/// may be process-global but carries no shared mutable state").
pub fn init_logging(default_directive: &str) {
    let filter = EnvFilter::try_from_env(GFO_LOG_VAR)
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gdal_home_var_name_is_stable() {
        assert_eq!(GFO_GDAL_HOME_VAR, "GFO_GDAL_HOME");
    }
}
