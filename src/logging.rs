//! Leveled, appender-based logging, initialized once at startup: a
//! console appender plus a size-rolling file appender, both driven from
//! one `log::LevelFilter` selected by `--log-level`. There is exactly one
//! module tree to log here, so there are no per-module overrides — just
//! the single level from the CLI flag.

use log::LevelFilter;
use log4rs::{
    append::{
        console::ConsoleAppender,
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    init_config, Config,
};

const LOGGING_PATTERN: &str = "[{d(%Y-%m-%d %H:%M:%S)} {h({l})} {M}] {m}{n}";
/// Max logging file size before rolling over to the next log file (5mb).
const LOGGING_MAX_SIZE: u64 = 1024 * 1024 * 5;
/// The max number of rolled logging files to keep before deleting.
const LOGGING_MAX_FILES: u32 = 8;
const LOGGING_MODULE: &str = "bitunnel";

/// Sets up `log4rs` with a console appender and a rolling file appender
/// under `logs/`, both driven from `level`.
pub fn setup(level: LevelFilter) {
    let pattern = Box::new(PatternEncoder::new(LOGGING_PATTERN));
    let size_trigger = SizeTrigger::new(LOGGING_MAX_SIZE);

    let fixed_window_roller = FixedWindowRoller::builder()
        .build("logs/log-{}.log.gz", LOGGING_MAX_FILES)
        .expect("unable to create fixed window log roller");

    let compound_policy =
        CompoundPolicy::new(Box::new(size_trigger), Box::new(fixed_window_roller));

    let stdout_appender = ConsoleAppender::builder().encoder(pattern.clone()).build();

    let file_appender = RollingFileAppender::builder()
        .encoder(pattern)
        .build("logs/log.log", Box::new(compound_policy))
        .expect("unable to create logging file appender");

    const APPENDERS: [&str; 2] = ["stdout", "file"];

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout_appender)))
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .logger(
            Logger::builder()
                .appenders(APPENDERS)
                .additive(false)
                .build(LOGGING_MODULE, level),
        )
        .build(Root::builder().appenders(APPENDERS).build(LevelFilter::Warn))
        .expect("failed to build logging config");

    init_config(config).expect("unable to initialize logger");
    log_panics::init();
}
