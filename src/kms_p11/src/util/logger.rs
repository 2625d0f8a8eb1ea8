use log::{Level, LevelFilter, Log, Metadata, Record};

/// Minimal stderr logger. Records carry the source file and line, which is
/// the diagnostic channel for faults whose public surface is just a CK_RV.
/// The threshold is read once from `KMS_P11_LOG` (error by default).
pub struct Logger {
    threshold: Level,
}

impl Logger {
    pub fn init() {
        let threshold = match std::env::var("KMS_P11_LOG").as_deref() {
            Ok("trace") => Level::Trace,
            Ok("debug") => Level::Debug,
            Ok("info") => Level::Info,
            Ok("warn") => Level::Warn,
            _ => Level::Error,
        };
        let res = log::set_boxed_logger(Box::new(Self { threshold }));
        match res {
            Ok(_) => log::set_max_level(LevelFilter::Trace),
            Err(_) => trace!("Logger already initialized"),
        }
    }
}

impl Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.threshold
    }

    fn flush(&self) {}

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            eprintln!(
                "{:8} {}:{} {}",
                record.metadata().level(),
                record.file().unwrap_or("?"),
                record.line().unwrap_or(0),
                record.args()
            );
        }
    }
}
