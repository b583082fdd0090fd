//! Stand-in collaborators for running the pipeline without a content stack.
//! They log what a real worker would do and mint fresh references.

use std::sync::atomic::{AtomicI64, Ordering};

use allaboutme_core::error::Result;
use allaboutme_scheduler::{Platform, PostText, Publisher, Script, ScriptWriter, VideoRenderer};
use async_trait::async_trait;

pub struct DryRun {
    next_ref: AtomicI64,
}

impl DryRun {
    pub fn new() -> Self {
        // Time-seeded so refs from separate invocations do not collide.
        let seed = chrono::Utc::now().timestamp_millis();
        Self {
            next_ref: AtomicI64::new(seed),
        }
    }

    fn mint(&self) -> i64 {
        self.next_ref.fetch_add(1, Ordering::SeqCst)
    }
}

#[async_trait]
impl ScriptWriter for DryRun {
    async fn write_scripts(&self, count: u32) -> Result<Vec<Script>> {
        let scripts: Vec<Script> = (0..count)
            .map(|_| {
                let script_ref = self.mint();
                Script {
                    script_ref,
                    caption: Some(format!("Dry-run script {script_ref}")),
                    hashtags: Some("#allaboutme #shorts".into()),
                }
            })
            .collect();
        tracing::info!("[dry-run] wrote {count} script(s)");
        Ok(scripts)
    }
}

#[async_trait]
impl VideoRenderer for DryRun {
    async fn render(&self, script_ref: i64) -> Result<i64> {
        let video_ref = self.mint();
        tracing::info!("[dry-run] rendered script {script_ref} → video {video_ref}");
        Ok(video_ref)
    }
}

#[async_trait]
impl Publisher for DryRun {
    async fn publish(&self, video_ref: i64, text: &PostText, platforms: &[Platform]) -> Result<()> {
        let names: Vec<&str> = platforms.iter().map(|p| p.as_str()).collect();
        tracing::info!(
            "[dry-run] published video {video_ref} to {}: {:?}",
            names.join(", "),
            text.render()
        );
        Ok(())
    }
}
