//! StockPulse ingestion CLI.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use pulse_collector::{
    BackoffFetcher, CollectorConfig, IngestionJob, IngestionPipeline, JobResult, JobStatus,
    RateLimiter,
};
use pulse_core::{init_logging, Dataset, LogConfig, LogFormat, TimeRange};
use pulse_data::{AlphaVantageClient, MemoryRecordStore, PgRecordStore, RecordStore};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "pulse-collector")]
#[command(about = "StockPulse Market Data Collector", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// 로그 레벨 (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// 로그 형식 (pretty, json, compact)
    #[arg(long, default_value = "pretty", global = true)]
    log_format: LogFormat,
}

#[derive(Subcommand)]
enum Commands {
    /// 수집 작업 1회 실행
    Run {
        /// 수집할 심볼 (쉼표로 구분, 예: "AAPL,MSFT")
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// 시작일 (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// 종료일 (YYYY-MM-DD, 기본: 오늘)
        #[arg(long)]
        to: Option<NaiveDate>,

        /// 데이터셋 (daily, quote, overview)
        #[arg(long, default_value = "daily")]
        dataset: Dataset,

        /// 결과 출력 형식
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        output: OutputFormat,

        /// DB 대신 메모리 저장소에 적재
        #[arg(long)]
        dry_run: bool,
    },

    /// 데몬 모드: 주기적으로 최근 기간 수집
    Daemon {
        /// 수집할 심볼 (쉼표로 구분)
        #[arg(long, value_delimiter = ',', required = true)]
        symbols: Vec<String>,

        /// 오늘을 포함한 수집 일수
        #[arg(long, default_value_t = 7)]
        lookback_days: u32,

        #[arg(long, default_value = "daily")]
        dataset: Dataset,
    },

    /// 데이터베이스 연결 확인
    Health,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // 로깅 초기화
    init_logging(LogConfig::new(cli.log_level.as_str()).with_format(cli.log_format))
        .map_err(anyhow::Error::msg)?;

    tracing::info!("StockPulse Data Collector 시작");

    // 설정 로드
    let config = CollectorConfig::from_env()?;
    tracing::debug!(
        provider = %config.provider.key,
        base_url = %config.provider.base_url,
        "설정 로드 완료"
    );

    let code = match cli.command {
        Commands::Run {
            symbols,
            from,
            to,
            dataset,
            output,
            dry_run,
        } => {
            let range = TimeRange::new(from, to.unwrap_or_else(|| Utc::now().date_naive()))?;
            let store = open_store(&config, dry_run).await?;
            let pipeline = build_pipeline(&config, store).await?;

            let job = IngestionJob::new(symbols, range)?.with_dataset(dataset);
            let result = pipeline.run(job, CancellationToken::new()).await?;
            print_result(&result, output)?;

            if result.status == JobStatus::Failed {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            }
        }
        Commands::Daemon {
            symbols,
            lookback_days,
            dataset,
        } => {
            let store = open_store(&config, false).await?;
            let pipeline = build_pipeline(&config, store).await?;
            run_daemon(&config, &pipeline, &symbols, lookback_days, dataset).await?;
            ExitCode::SUCCESS
        }
        Commands::Health => {
            let store = PgRecordStore::connect(
                config.database_url()?,
                config.database.max_connections,
            )
            .await
            .context("데이터베이스 연결 실패")?;
            store.ping().await.context("데이터베이스 응답 없음")?;
            tracing::info!("데이터베이스 연결 정상");
            println!("ok");
            ExitCode::SUCCESS
        }
    };

    tracing::info!("StockPulse Data Collector 종료");
    Ok(code)
}

async fn open_store(
    config: &CollectorConfig,
    dry_run: bool,
) -> anyhow::Result<Arc<dyn RecordStore>> {
    if dry_run {
        tracing::warn!("dry-run 모드: 메모리 저장소에 적재합니다");
        return Ok(Arc::new(MemoryRecordStore::new()));
    }

    let store = PgRecordStore::connect(config.database_url()?, config.database.max_connections)
        .await
        .context("데이터베이스 연결 실패")?;
    tracing::info!("데이터베이스 연결 성공");
    Ok(Arc::new(store))
}

async fn build_pipeline(
    config: &CollectorConfig,
    store: Arc<dyn RecordStore>,
) -> anyhow::Result<IngestionPipeline> {
    let client = AlphaVantageClient::new(config.api_key()?, config.provider.request_timeout())?
        .with_base_url(config.provider.base_url.as_str());

    let limiter = RateLimiter::new(config.bucket_config())?;
    limiter
        .register(config.provider.key.as_str(), config.bucket_config())
        .await?;

    let fetcher = BackoffFetcher::new(Arc::new(client), limiter, config.retry_policy()?)
        .with_provider_key(config.provider.key.as_str())
        .with_acquire_timeout(config.rate_limit.acquire_timeout());

    Ok(IngestionPipeline::new(fetcher, store, config.pipeline_config()))
}

async fn run_daemon(
    config: &CollectorConfig,
    pipeline: &IngestionPipeline,
    symbols: &[String],
    lookback_days: u32,
    dataset: Dataset,
) -> anyhow::Result<()> {
    tracing::info!(
        "=== 데몬 모드 시작 (주기: {}분) ===",
        config.daemon.interval_minutes
    );

    // Ctrl-C는 진행 중인 작업까지 취소
    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("종료 신호 수신, 데몬 종료 중...");
            signal.cancel();
        }
    });

    let mut interval = tokio::time::interval(config.daemon.interval()?);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let range = TimeRange::last_days(Utc::now().date_naive(), lookback_days);
                let job = IngestionJob::new(symbols, range)?.with_dataset(dataset);

                match pipeline.run(job, shutdown.child_token()).await {
                    Ok(result) => {
                        if !result.failed_symbols().is_empty() {
                            tracing::warn!(
                                failed = ?result.failed_symbols(),
                                "일부 심볼 수집 실패, 다음 주기에 재시도"
                            );
                        }
                    }
                    Err(e) => {
                        tracing::error!("수집 작업 실패: {}", e);
                    }
                }

                tracing::info!(
                    "=== 작업 완료, 다음 실행: {}분 후 ===",
                    config.daemon.interval_minutes
                );
            }
        }
    }

    Ok(())
}

fn print_result(result: &JobResult, output: OutputFormat) -> anyhow::Result<()> {
    match output {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(result)?);
        }
        OutputFormat::Text => {
            println!(
                "job {} [{}] {} -> {} ({} ms)",
                result.job_id,
                result.dataset,
                result.range,
                result.status,
                result.elapsed.as_millis()
            );
            for symbol in &result.results {
                println!("  {:<8} {}", symbol.symbol, symbol.outcome);
            }
        }
    }
    Ok(())
}
