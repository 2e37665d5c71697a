pub use slog::{crit, debug, error, info, o, trace, warn, Discard, Drain, Logger};

/// Builds the process-wide terminal logger.
pub fn init() -> Logger {
    use sloggers::{Config, LoggerConfig};

    let config: LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "info"
destination = "stderr"
"#,
    )
    .expect("Logger config failed to parse");

    config.build_logger().expect("Logger construction failed")
}

/// Returns either a child of the supplied logger or a discarding root.
/// Long-lived protocol objects take `impl Into<Option<&Logger>>` in their
/// constructors and route it through here.
#[inline]
pub fn child_or_discard(log: Option<&Logger>) -> Logger {
    match log {
        Some(log) => log.new(o!()),
        _ => Logger::root(Discard, o!()),
    }
}
