/* Logger initialization */
use std::{panic, thread};

use tracing::{error, level_filters::LevelFilter};
use tracing_appender::non_blocking::WorkerGuard;

use crate::CargoEnv;

pub struct LoggerGuards {
    pub _tracing_guard: WorkerGuard,
    // option because it can be loaded without this if wanted
    pub _sentry_guard: Option<sentry::ClientInitGuard>,
}

pub struct Logger {}

impl Logger {
    pub fn init(cargo_env: CargoEnv, sentry_dsn: Option<String>) -> LoggerGuards {
        // resolution logs every hop at debug, that's way too much for a terminal
        let max_level = match cargo_env {
            CargoEnv::Development => LevelFilter::INFO,
            CargoEnv::Production => LevelFilter::DEBUG,
        };

        // production goes to a rolling file so the hop-by-hop debug output doesn't flood stdout
        let (non_blocking, guard) = match cargo_env {
            CargoEnv::Development => tracing_appender::non_blocking(std::io::stdout()),
            CargoEnv::Production => {
                tracing_appender::non_blocking(tracing_appender::rolling::daily("logs", "relay.log"))
            }
        };

        let sentry_guard = sentry_dsn.map(|dsn| {
            sentry::init((
                dsn,
                sentry::ClientOptions {
                    release: sentry::release_name!(),
                    environment: Some(match cargo_env {
                        CargoEnv::Development => "development".into(),
                        CargoEnv::Production => "production".into(),
                    }),
                    attach_stacktrace: true,
                    ..Default::default()
                },
            ))
        });

        use tracing_subscriber::layer::SubscriberExt;
        use tracing_subscriber::util::SubscriberInitExt;

        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_target(true);

        let registry = tracing_subscriber::registry()
            .with(max_level)
            .with(fmt_layer);

        if sentry_guard.is_some() {
            registry.with(sentry_tracing::layer()).init();
        } else {
            registry.init();
        }

        Self::install_panic_hook();

        // return both guards so they're not dropped
        LoggerGuards {
            _tracing_guard: guard,
            _sentry_guard: sentry_guard,
        }
    }

    /// routes panics through tracing so they land in the same sink as everything else
    fn install_panic_hook() {
        panic::set_hook(Box::new(|info| {
            let thread = thread::current();
            let thread = thread.name().unwrap_or("unknown");

            let msg = match info.payload().downcast_ref::<&'static str>() {
                Some(s) => *s,
                None => match info.payload().downcast_ref::<String>() {
                    Some(s) => &**s,
                    None => "Box<Any>",
                },
            };

            // panics tagged with "notrace - " skip the backtrace
            let (msg, backtrace) = match msg.strip_prefix("notrace - ") {
                Some(stripped) => (stripped, None),
                None => (msg, Some(backtrace::Backtrace::new())),
            };

            let location = info
                .location()
                .map(|l| format!(": {}:{}", l.file(), l.line()))
                .unwrap_or_default();

            match backtrace {
                Some(trace) => error!(
                    target: "panic", "thread '{}' panicked at '{}'{}\n{:?}",
                    thread, msg, location, trace
                ),
                None => error!(
                    target: "panic", "thread '{}' panicked at '{}'{}",
                    thread, msg, location
                ),
            }
        }));
    }
}
