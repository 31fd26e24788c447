#![allow(dead_code)]
use async_trait::async_trait;
use statwatch::core::{ReportBlock, ReportSink};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// A sink that keeps every block it receives.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    blocks: Arc<Mutex<Vec<ReportBlock>>>,
    notifier: Arc<Notify>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn blocks(&self) -> Vec<ReportBlock> {
        self.blocks.lock().unwrap().clone()
    }

    pub async fn wait_for_blocks(&self, target: usize, timeout: Duration) -> Vec<ReportBlock> {
        let wait = async {
            loop {
                let notified = self.notifier.notified();
                if self.blocks.lock().unwrap().len() >= target {
                    break;
                }
                notified.await;
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .expect("Timed out waiting for report blocks");
        self.blocks()
    }
}

#[async_trait]
impl ReportSink for RecordingSink {
    fn name(&self) -> &str {
        "recording_mock"
    }

    async fn write_block(&self, block: &ReportBlock) -> anyhow::Result<()> {
        self.blocks.lock().unwrap().push(block.clone());
        self.notifier.notify_waiters();
        Ok(())
    }
}

/// A sink that rejects every block.
#[derive(Clone, Debug, Default)]
pub struct FailingSink;

#[async_trait]
impl ReportSink for FailingSink {
    fn name(&self) -> &str {
        "failing_mock"
    }

    async fn write_block(&self, _block: &ReportBlock) -> anyhow::Result<()> {
        anyhow::bail!("sink unavailable")
    }
}
