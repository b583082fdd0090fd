//! Pending-post dispatcher: advances every ready slot by exactly one stage.
//!
//! ```text
//! script_ref?  ──no──▶ GenerateScript, status = generating_script
//!     │yes
//! video_ref?   ──no──▶ RenderVideo,    status = generating_video
//!     │yes
//! platforms    ──────▶ Publish,        status = published, published_at = now
//! ```
//!
//! Work is handed to the queue and never awaited. A failure on one post marks
//! that post `failed` and the batch carries on.

use std::sync::Arc;

use allaboutme_core::error::{AllAboutMeError, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::clock::Clock;
use crate::logs::NewLog;
use crate::persistence::AutomationDb;
use crate::posts::{PostStatus, ScheduledPost, Transition};
use crate::queue::{PostText, WorkQueue, WorkRequest};

/// Outcome of one dispatch tick.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Every post considered, whatever happened to it.
    pub processed: usize,
    pub advanced: usize,
    pub failed: usize,
}

pub struct PendingDispatcher {
    db: Arc<AutomationDb>,
    queue: Arc<dyn WorkQueue>,
    clock: Arc<dyn Clock>,
}

impl PendingDispatcher {
    pub fn new(db: Arc<AutomationDb>, queue: Arc<dyn WorkQueue>, clock: Arc<dyn Clock>) -> Self {
        Self { db, queue, clock }
    }

    /// One dispatch tick over all due, ready posts, oldest first.
    pub fn process_pending_posts(&self) -> Result<DispatchReport> {
        let now = self.clock.now();
        let posts = self.db.ready_posts(now)?;
        if posts.is_empty() {
            tracing::debug!("No pending posts to process");
            return Ok(DispatchReport::default());
        }

        tracing::info!("📬 Processing {} pending posts", posts.len());
        let mut report = DispatchReport {
            processed: posts.len(),
            ..DispatchReport::default()
        };

        for post in &posts {
            match self.advance(post, now) {
                Ok(()) => report.advanced += 1,
                Err(e) => {
                    report.failed += 1;
                    self.fail(post, &e);
                }
            }
        }
        Ok(report)
    }

    fn advance(&self, post: &ScheduledPost, now: DateTime<Utc>) -> Result<()> {
        let (request, transition) = match (post.script_ref, post.video_ref) {
            (None, _) => {
                tracing::info!(post_id = post.id, "📝 Requesting script");
                (
                    Some(WorkRequest::GenerateScript {
                        post_id: post.id,
                        count: 1,
                    }),
                    Transition::to(PostStatus::GeneratingScript),
                )
            }
            (Some(script_ref), None) => {
                tracing::info!(post_id = post.id, script_ref, "🎬 Requesting video");
                (
                    Some(WorkRequest::RenderVideo {
                        post_id: post.id,
                        script_ref,
                    }),
                    Transition::to(PostStatus::GeneratingVideo),
                )
            }
            (Some(_), Some(video_ref)) => {
                let platforms = post.targets.platforms();
                if platforms.is_empty() {
                    tracing::warn!(post_id = post.id, "⚠️ No target platforms, marking published");
                    self.db.append_log(
                        &NewLog::warning(format!("Post {} has no target platforms", post.id))
                            .with_details(format!("video_ref={video_ref}; nothing was published")),
                        now,
                    )?;
                    (None, Transition::published(now))
                } else {
                    tracing::info!(
                        post_id = post.id,
                        video_ref,
                        "🚀 Publishing to {}",
                        platforms.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ")
                    );
                    (
                        Some(WorkRequest::Publish {
                            post_id: post.id,
                            video_ref,
                            text: PostText {
                                caption: post.caption.clone(),
                                hashtags: post.hashtags.clone(),
                            },
                            platforms,
                        }),
                        Transition::published(now),
                    )
                }
            }
        };

        if !post.status.can_transition_to(transition.status) {
            return Err(AllAboutMeError::InvalidState(format!(
                "Post {} cannot move from {} to {}",
                post.id, post.status, transition.status
            )));
        }
        if let Some(request) = request {
            self.queue.enqueue(request)?;
        }
        self.db.apply_transition(post.id, &transition)
    }

    fn fail(&self, post: &ScheduledPost, error: &AllAboutMeError) {
        tracing::error!(post_id = post.id, "❌ Error processing post: {error}");
        let message = error.to_string();
        if let Err(e) = self.db.apply_transition(post.id, &Transition::failed(&message)) {
            tracing::error!(post_id = post.id, "Could not mark post failed: {e}");
        }
        let entry = NewLog::error(format!("Error processing post {}", post.id)).with_details(message);
        if let Err(e) = self.db.append_log(&entry, self.clock.now()) {
            tracing::error!(post_id = post.id, "Could not record post failure: {e}");
        }
    }
}
