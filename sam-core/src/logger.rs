use redox_log::{OutputBuilder, RedoxLogger};

/// Configures stderr logging for a client of this framework.
pub fn setup_logging(output_level: log::LevelFilter) {
    let logger = RedoxLogger::new().with_output(
        OutputBuilder::stderr()
            .with_filter(output_level)
            .with_ansi_escape_codes()
            .flush_on_newline(true)
            .build(),
    );

    if let Err(error) = logger.enable() {
        eprintln!("failed to set default logger: {}", error);
    }
}
