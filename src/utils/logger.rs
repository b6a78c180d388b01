use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 互動終端機
    Compact,
    /// 無人值守主機，方便集中收集
    Json,
}

impl LogFormat {
    pub fn from_flag(json: bool) -> Self {
        if json {
            LogFormat::Json
        } else {
            LogFormat::Compact
        }
    }
}

/// 沒設 `RUST_LOG` 時的預設過濾；HTTP 相關 crate 的輪詢雜訊壓到 warn
fn default_directives(verbose: bool) -> &'static str {
    if verbose {
        "slot_acquirer=debug,reqwest=info,hyper=warn,info"
    } else {
        "slot_acquirer=info,reqwest=warn,hyper=warn,warn"
    }
}

pub fn init_logger(format: LogFormat, verbose: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbose)));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Compact => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .compact(),
            )
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .json()
                    .with_current_span(false),
            )
            .init(),
    }
}
