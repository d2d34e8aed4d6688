use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::error::{Error, Result};

/// Maps the number of `-v` flags to a level. Protocol traffic is only
/// logged at the most verbose level.
pub fn level_for(verbosity: u64) -> LevelFilter {
    match verbosity {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// Sends all logging to stderr, leaving stdout for the final report.
pub fn init(verbosity: u64) -> Result<()> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(
            "{d(%H:%M:%S%.3f)} [{l}] {m}{n}",
        )))
        .build();

    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(
            Root::builder()
                .appender("stderr")
                .build(level_for(verbosity)),
        )
        .map_err(|e| Error::Config(format!("logging: {}", e)))?;

    log4rs::init_config(config)
        .map_err(|e| Error::Config(format!("logging: {}", e)))?;
    Ok(())
}
