//! Typed work-request channel between the dispatcher and the stage workers.
//!
//! Requests are fire-and-forget: the dispatcher never waits for an answer.
//! Completion shows up later as `script_ref` / `video_ref` on the post.

use allaboutme_core::error::{AllAboutMeError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::posts::Platform;

/// One asynchronous unit of work for a slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkRequest {
    /// Write `count` scripts; the first one is attached to the post.
    GenerateScript { post_id: i64, count: u32 },
    /// Voice-over, background and subtitles for a script.
    RenderVideo { post_id: i64, script_ref: i64 },
    /// Push a finished video to the given platforms.
    Publish {
        post_id: i64,
        video_ref: i64,
        text: PostText,
        platforms: Vec<Platform>,
    },
}

/// Caption and hashtags that go out with a published video.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostText {
    pub caption: Option<String>,
    pub hashtags: Option<String>,
}

impl PostText {
    /// Caption, then hashtags on their own paragraph. Empty parts are skipped.
    pub fn render(&self) -> String {
        [self.caption.as_deref(), self.hashtags.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

impl WorkRequest {
    pub fn post_id(&self) -> i64 {
        match self {
            WorkRequest::GenerateScript { post_id, .. }
            | WorkRequest::RenderVideo { post_id, .. }
            | WorkRequest::Publish { post_id, .. } => *post_id,
        }
    }

    /// Stage name for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            WorkRequest::GenerateScript { .. } => "script",
            WorkRequest::RenderVideo { .. } => "video",
            WorkRequest::Publish { .. } => "publish",
        }
    }
}

/// Where the dispatcher hands work off.
pub trait WorkQueue: Send + Sync {
    fn enqueue(&self, request: WorkRequest) -> Result<()>;
}

/// In-process queue backed by an unbounded tokio channel.
#[derive(Clone)]
pub struct ChannelQueue {
    tx: mpsc::UnboundedSender<WorkRequest>,
}

impl WorkQueue for ChannelQueue {
    fn enqueue(&self, request: WorkRequest) -> Result<()> {
        self.tx
            .send(request)
            .map_err(|e| AllAboutMeError::Queue(format!("Worker queue closed: {:?}", e.0.stage())))
    }
}

/// Create a queue and the receiver the worker runtime drains.
pub fn work_channel() -> (ChannelQueue, mpsc::UnboundedReceiver<WorkRequest>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (ChannelQueue { tx }, rx)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;

    /// Records every request; refuses those for posts in `fail_for`.
    #[derive(Default)]
    pub struct RecordingQueue {
        pub requests: Mutex<Vec<WorkRequest>>,
        pub fail_for: Mutex<HashSet<i64>>,
    }

    impl RecordingQueue {
        pub fn failing_for(post_id: i64) -> Self {
            let queue = Self::default();
            queue.fail_for.lock().unwrap().insert(post_id);
            queue
        }

        pub fn taken(&self) -> Vec<WorkRequest> {
            std::mem::take(&mut *self.requests.lock().unwrap())
        }
    }

    impl WorkQueue for RecordingQueue {
        fn enqueue(&self, request: WorkRequest) -> Result<()> {
            if self.fail_for.lock().unwrap().contains(&request.post_id()) {
                return Err(AllAboutMeError::Queue(format!(
                    "broker rejected request for post {}",
                    request.post_id()
                )));
            }
            self.requests.lock().unwrap().push(request);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_channel_delivers_in_order() {
        let (queue, mut rx) = work_channel();
        queue
            .enqueue(WorkRequest::GenerateScript { post_id: 1, count: 1 })
            .unwrap();
        queue
            .enqueue(WorkRequest::RenderVideo { post_id: 2, script_ref: 7 })
            .unwrap();

        assert_eq!(rx.recv().await.unwrap().post_id(), 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.stage(), "video");
    }

    #[test]
    fn test_post_text_render() {
        let text = PostText {
            caption: Some("Morning routine ".into()),
            hashtags: Some("#shorts #aboutme".into()),
        };
        assert_eq!(text.render(), "Morning routine\n\n#shorts #aboutme");
        assert_eq!(PostText::default().render(), "");
        let only_tags = PostText {
            caption: Some("  ".into()),
            hashtags: Some("#shorts".into()),
        };
        assert_eq!(only_tags.render(), "#shorts");
    }

    #[test]
    fn test_closed_channel_is_queue_error() {
        let (queue, rx) = work_channel();
        drop(rx);
        let err = queue
            .enqueue(WorkRequest::GenerateScript { post_id: 1, count: 1 })
            .unwrap_err();
        assert!(matches!(err, AllAboutMeError::Queue(_)));
    }
}
