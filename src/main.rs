use clap::Parser;
use slot_acquirer::adapters::captcha::RecaptchaSolver;
use slot_acquirer::adapters::telegram::{CommandListener, TelegramClient, TelegramNotifier};
use slot_acquirer::adapters::webdriver::WebDriverActuator;
use slot_acquirer::domain::ports::SystemClock;
use slot_acquirer::utils::delay::CancelToken;
use slot_acquirer::utils::error::ErrorSeverity;
use slot_acquirer::utils::logger::{self, LogFormat};
use slot_acquirer::utils::validation::Validate;
use slot_acquirer::{AcquireError, AppConfig, CliConfig, Orchestrator, RunOutcome, StartOutcome};
use std::sync::Arc;
use std::time::Duration;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

/// 記錄錯誤並依嚴重程度決定退出碼
fn fail(e: AcquireError) -> ! {
    tracing::error!(
        "❌ slot-acquirer failed: {} (Category: {:?}, Severity: {:?})",
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code);
}

fn load_config(path: &str) -> slot_acquirer::Result<AppConfig> {
    let config = AppConfig::from_file(path)?;
    config.validate()?;
    Ok(config)
}

async fn run_once(orchestrator: Arc<Orchestrator>, shutdown: &CancelToken) -> i32 {
    let handle = match orchestrator.start() {
        StartOutcome::Started(handle) => handle,
        StartOutcome::AlreadyRunning => return 1,
    };

    let stopper = {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            shutdown.cancelled().await;
            orchestrator.stop();
        })
    };
    let outcome = handle.wait().await;
    stopper.abort();

    match outcome {
        RunOutcome::Reserved(slot) => {
            println!("✅ Reserved {}", slot);
            0
        }
        RunOutcome::Cancelled => 0,
        RunOutcome::Failed(reason) => {
            eprintln!("❌ {}", reason);
            1
        }
    }
}

async fn serve(orchestrator: Arc<Orchestrator>, listener: CommandListener, shutdown: &CancelToken) -> i32 {
    if let Err(e) = listener.run(shutdown).await {
        tracing::error!("Command listener failed: {}", e);
    }

    if orchestrator.stop() {
        // 等背景搜尋做完 teardown
        let idle = async {
            while orchestrator.is_running() {
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, idle).await.is_err() {
            tracing::warn!("Search did not stop within {:?}", SHUTDOWN_GRACE);
        }
    }
    0
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_logger(LogFormat::from_flag(cli.json_logs), cli.verbose);

    tracing::info!("Starting slot-acquirer");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let config = load_config(&cli.config).unwrap_or_else(|e| fail(e));

    let driver = match WebDriverActuator::connect(&config.webdriver.url, config.webdriver.headless).await {
        Ok(driver) => Arc::new(driver),
        Err(e) => fail(e.into()),
    };
    let solver = Arc::new(RecaptchaSolver::new(driver.clone(), config.recaptcha_settings()));
    let telegram = Arc::new(TelegramClient::new(&config.telegram.api_url, &config.telegram.bot_token));
    let notifier = Arc::new(TelegramNotifier::new(telegram.clone(), config.telegram.chat_id));

    let acquisition = match config.build_acquisition(driver.clone(), solver, notifier, Arc::new(SystemClock)) {
        Ok(acquisition) => acquisition,
        Err(e) => {
            if let Err(quit_error) = driver.quit().await {
                tracing::warn!("Failed to close browser session: {}", quit_error);
            }
            fail(e)
        }
    };
    let orchestrator = Arc::new(Orchestrator::new(acquisition));

    let shutdown = CancelToken::new();
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("🛑 Interrupted, shutting down...");
                shutdown.cancel();
            }
        });
    }

    let exit_code = if cli.once {
        run_once(orchestrator, &shutdown).await
    } else {
        let listener = CommandListener::new(telegram, orchestrator.clone(), config.telegram.allow_list.clone());
        serve(orchestrator, listener, &shutdown).await
    };

    if let Err(e) = driver.quit().await {
        tracing::warn!("Failed to close browser session: {}", e);
    }

    if exit_code > 0 {
        std::process::exit(exit_code);
    }
    Ok(())
}
