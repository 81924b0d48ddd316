use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::info;
use tracing_subscriber::EnvFilter;

use jobber_core::{DispatchOptions, Handler, Queue, SchedulerBuilder, SchedulerConfig, Task};

/// (file id, preset)
#[derive(Debug, Serialize, Deserialize)]
struct Transcode(i64, String);

impl Task for Transcode {
    const TYPE: &'static str = "video.transcode.v1";
}

struct TranscodeHandler;

#[async_trait]
impl Handler<Transcode> for TranscodeHandler {
    async fn handle(&self, task: Transcode) -> anyhow::Result<()> {
        sleep(Duration::from_millis(50)).await;
        println!("transcoded file {} to {}", task.0, task.1);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct SendMail(String);

impl Task for SendMail {
    const TYPE: &'static str = "mail.send.v1";
}

/// 最初の n 回は失敗する handler（retry の様子を見るため）
struct FlakyMailHandler {
    remaining_failures: AtomicU32,
}

impl FlakyMailHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<SendMail> for FlakyMailHandler {
    async fn handle(&self, task: SendMail) -> anyhow::Result<()> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            anyhow::bail!("smtp unavailable (left={left})");
        }
        println!("mail sent to {}", task.0);
        Ok(())
    }
}

fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging();

    // (A) 設定は環境変数から（JOBBER_STORE_URL など）
    let config = SchedulerConfig::from_env().context("reading JOBBER_* environment")?;
    info!(store = %config.store, "starting jobber demo");

    // (B) queue を優先度順に宣言し、handler を登録して起動
    let jobber = SchedulerBuilder::new()
        .queue(Queue::sjf("video"))
        .queue(Queue::fifo("mail"))
        .register::<Transcode, _>(TranscodeHandler)?
        .register::<SendMail, _>(FlakyMailHandler::new(5))?
        .expect_tasks(&[Transcode::TYPE, SendMail::TYPE])
        .config(config)
        .start()
        .await?;

    // (C) タスク投入
    for (id, timeout) in [(1, 5_000), (2, 1_000), (3, 3_000)] {
        let receipt = jobber
            .dispatch(
                "video",
                Transcode(id, "hd".into()),
                DispatchOptions::new().max_retry(0).timeout(timeout),
            )
            .await?;
        println!("dispatched {} (pos {})", receipt.hash, receipt.pos);
    }
    jobber
        .dispatch("mail", SendMail("ops@example.com".into()), DispatchOptions::new().max_retry(2))
        .await?;
    jobber
        .dispatch("mail", SendMail("dev@example.com".into()), DispatchOptions::new().max_retry(3))
        .await?;

    // (D) free partition が空になるまでポーリング
    while jobber.count().await? > 0 {
        sleep(Duration::from_millis(50)).await;
    }

    let failed = jobber.list_failed("mail").await?;
    println!("failed tasks: {}", serde_json::to_string_pretty(&failed)?);

    // (E) 失敗分を戻して再実行（handler はもう失敗しない）
    if jobber.restore_all().await? > 0 {
        while jobber.count().await? > 0 {
            sleep(Duration::from_millis(50)).await;
        }
    }

    jobber.disconnect().await?;
    Ok(())
}
