use std::sync::Once;

use env_logger::Env;
use log::LevelFilter;

static LOG_ONCE: Once = Once::new();

fn env_level() -> LevelFilter {
    std::env::var("MERCURY_LOG")
        .or_else(|_| std::env::var("RUST_LOG"))
        .ok()
        .as_deref()
        .and_then(|v| v.parse::<LevelFilter>().ok())
        .unwrap_or(LevelFilter::Info)
}

fn level_to_str(level: LevelFilter) -> &'static str {
    match level {
        LevelFilter::Off => "off",
        LevelFilter::Error => "error",
        LevelFilter::Warn => "warn",
        LevelFilter::Info => "info",
        LevelFilter::Debug => "debug",
        LevelFilter::Trace => "trace",
    }
}

/// Pick the effective level: `debug` wins over the environment unless the
/// environment already asks for something chattier.
fn effective_level(debug: bool, env: LevelFilter) -> LevelFilter {
    if debug {
        env.max(LevelFilter::Debug)
    } else {
        env
    }
}

/// Initialize the stderr logger based on `MERCURY_LOG`/`RUST_LOG` and the `--debug` flag.
/// Safe to call multiple times; only the first call installs a logger.
pub fn init_logging(debug: bool) {
    let level = effective_level(debug, env_level());
    LOG_ONCE.call_once(|| {
        let env = Env::default().default_filter_or(level_to_str(level));
        let mut builder = env_logger::Builder::from_env(env);
        if debug {
            builder.filter_level(level);
        }
        builder
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(false)
            .init();
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_raises_quiet_levels() {
        assert_eq!(effective_level(true, LevelFilter::Warn), LevelFilter::Debug);
        assert_eq!(effective_level(true, LevelFilter::Trace), LevelFilter::Trace);
        assert_eq!(effective_level(false, LevelFilter::Warn), LevelFilter::Warn);
    }

    #[test]
    fn level_names_parse_back() {
        for level in [LevelFilter::Off, LevelFilter::Info, LevelFilter::Trace] {
            assert_eq!(level_to_str(level).parse::<LevelFilter>().ok(), Some(level));
        }
    }
}
