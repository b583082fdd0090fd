//! Worker runtime: executes work requests against the content collaborators
//! and writes their results back onto the post.
//!
//! The dispatcher never waits for this side. A post whose stage fails here
//! keeps its in-progress status; the failure is recorded as an ERROR entry
//! so the notifier picks it up.

use std::sync::Arc;

use allaboutme_core::error::{AllAboutMeError, Result};
use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use crate::clock::Clock;
use crate::logs::NewLog;
use crate::persistence::AutomationDb;
use crate::posts::Platform;
use crate::queue::{PostText, WorkRequest};

/// A freshly written script and the post text that goes with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub script_ref: i64,
    pub caption: Option<String>,
    pub hashtags: Option<String>,
}

/// Produces scripts and returns their references.
#[async_trait]
pub trait ScriptWriter: Send + Sync {
    async fn write_scripts(&self, count: u32) -> Result<Vec<Script>>;
}

/// Renders a video from a script.
#[async_trait]
pub trait VideoRenderer: Send + Sync {
    async fn render(&self, script_ref: i64) -> Result<i64>;
}

/// Posts a rendered video to the given platforms.
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(&self, video_ref: i64, text: &PostText, platforms: &[Platform]) -> Result<()>;
}

pub struct WorkerRuntime {
    db: Arc<AutomationDb>,
    clock: Arc<dyn Clock>,
    scripts: Arc<dyn ScriptWriter>,
    renderer: Arc<dyn VideoRenderer>,
    publisher: Arc<dyn Publisher>,
}

impl WorkerRuntime {
    pub fn new(
        db: Arc<AutomationDb>,
        clock: Arc<dyn Clock>,
        scripts: Arc<dyn ScriptWriter>,
        renderer: Arc<dyn VideoRenderer>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            db,
            clock,
            scripts,
            renderer,
            publisher,
        }
    }

    /// Drain `rx` until every sender is gone. Each request runs on its own
    /// task; returns only after the in-flight ones have finished.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<WorkRequest>) {
        tracing::info!("🛠️ Worker runtime started");
        let mut tasks = JoinSet::new();

        loop {
            tokio::select! {
                request = rx.recv() => match request {
                    Some(request) => {
                        let runtime = self.clone();
                        tasks.spawn(async move {
                            let _ = runtime.execute(request).await;
                        });
                    }
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => reap(joined),
            }
        }

        if !tasks.is_empty() {
            tracing::info!("⏳ Queue closed, waiting for {} in-flight work item(s)", tasks.len());
        }
        while let Some(joined) = tasks.join_next().await {
            reap(joined);
        }
        tracing::info!("Worker runtime stopped (queue closed)");
    }

    /// Run one request to completion. Failures are logged before returning.
    pub async fn execute(&self, request: WorkRequest) -> Result<()> {
        let post_id = request.post_id();
        let stage = request.stage();

        match self.try_execute(request).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(post_id, stage, "❌ Work failed: {e}");
                let entry = NewLog::error(format!("Post {post_id}: {stage} stage failed"))
                    .with_details(e.to_string());
                if let Err(log_err) = self.db.append_log(&entry, self.clock.now()) {
                    tracing::error!("Could not record worker failure: {log_err}");
                }
                Err(e)
            }
        }
    }

    async fn try_execute(&self, request: WorkRequest) -> Result<()> {
        match request {
            WorkRequest::GenerateScript { post_id, count } => {
                let scripts = self.scripts.write_scripts(count).await?;
                let script = scripts.into_iter().next().ok_or_else(|| {
                    AllAboutMeError::Worker("Script writer returned no scripts".into())
                })?;
                self.db.attach_script(post_id, script.script_ref)?;
                if script.caption.is_some() || script.hashtags.is_some() {
                    self.db.set_caption(
                        post_id,
                        script.caption.as_deref(),
                        script.hashtags.as_deref(),
                    )?;
                }
                tracing::info!(post_id, script_ref = script.script_ref, "📝 Script ready");
            }
            WorkRequest::RenderVideo { post_id, script_ref } => {
                let video_ref = self.renderer.render(script_ref).await?;
                self.db.attach_video(post_id, video_ref)?;
                tracing::info!(post_id, video_ref, "🎬 Video ready");
            }
            WorkRequest::Publish {
                post_id,
                video_ref,
                text,
                platforms,
            } => {
                self.publisher.publish(video_ref, &text, &platforms).await?;
                tracing::info!(post_id, video_ref, "🚀 Published to {} platforms", platforms.len());
            }
        }
        Ok(())
    }
}

fn reap(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        tracing::error!("Worker task aborted: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::dispatcher::PendingDispatcher;
    use crate::logs::LogLevel;
    use crate::posts::{PlatformTargets, PostStatus};
    use crate::queue::WorkQueue;
    use crate::queue::testing::RecordingQueue;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
    use std::time::Duration;

    struct Fakes {
        next: AtomicI64,
        fail_render: AtomicBool,
        render_delay_ms: AtomicU64,
        published: Mutex<Vec<(i64, PostText, Vec<Platform>)>>,
    }

    impl Default for Fakes {
        fn default() -> Self {
            Self {
                next: AtomicI64::new(100),
                fail_render: AtomicBool::new(false),
                render_delay_ms: AtomicU64::new(0),
                published: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ScriptWriter for Fakes {
        async fn write_scripts(&self, count: u32) -> Result<Vec<Script>> {
            Ok((0..count)
                .map(|_| {
                    let script_ref = self.next.fetch_add(1, Ordering::SeqCst);
                    Script {
                        script_ref,
                        caption: Some(format!("Caption for script {script_ref}")),
                        hashtags: Some("#shorts #aboutme".into()),
                    }
                })
                .collect())
        }
    }

    #[async_trait]
    impl VideoRenderer for Fakes {
        async fn render(&self, _script_ref: i64) -> Result<i64> {
            let delay = self.render_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail_render.load(Ordering::SeqCst) {
                return Err(AllAboutMeError::Worker("ffmpeg exited with 1".into()));
            }
            Ok(self.next.fetch_add(1, Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl Publisher for Fakes {
        async fn publish(&self, video_ref: i64, text: &PostText, platforms: &[Platform]) -> Result<()> {
            self.published
                .lock()
                .unwrap()
                .push((video_ref, text.clone(), platforms.to_vec()));
            Ok(())
        }
    }

    fn setup() -> (Arc<AutomationDb>, Arc<FixedClock>, Arc<Fakes>, WorkerRuntime) {
        let db = Arc::new(AutomationDb::open_in_memory().unwrap());
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 2, 22, 9, 0, 0).unwrap()));
        let fakes = Arc::new(Fakes::default());
        let runtime = WorkerRuntime::new(
            db.clone(),
            clock.clone(),
            fakes.clone(),
            fakes.clone(),
            fakes.clone(),
        );
        (db, clock, fakes, runtime)
    }

    fn one_post(db: &AutomationDb, clock: &FixedClock) -> i64 {
        let ids = db
            .insert_schedule(&[clock.now()], PlatformTargets::all(), &NewLog::info("seed"), clock.now())
            .unwrap();
        ids[0]
    }

    #[tokio::test]
    async fn test_full_pipeline_with_dispatcher() {
        let (db, clock, fakes, runtime) = setup();
        let id = one_post(&db, &clock);
        let queue = Arc::new(RecordingQueue::default());
        let dispatcher = PendingDispatcher::new(db.clone(), queue.clone(), clock.clone());

        for expected in [
            PostStatus::GeneratingScript,
            PostStatus::GeneratingVideo,
            PostStatus::Published,
        ] {
            dispatcher.process_pending_posts().unwrap();
            assert_eq!(db.get_post(id).unwrap().unwrap().status, expected);
            for request in queue.taken() {
                runtime.execute(request).await.unwrap();
            }
        }

        let post = db.get_post(id).unwrap().unwrap();
        assert_eq!(post.script_ref, Some(100));
        assert_eq!(post.video_ref, Some(101));
        assert_eq!(post.caption.as_deref(), Some("Caption for script 100"));
        assert_eq!(post.hashtags.as_deref(), Some("#shorts #aboutme"));

        let published = fakes.published.lock().unwrap();
        let (video_ref, text, platforms) = &published[0];
        assert_eq!(*video_ref, 101);
        assert_eq!(text.caption.as_deref(), Some("Caption for script 100"));
        assert_eq!(text.hashtags.as_deref(), Some("#shorts #aboutme"));
        assert_eq!(platforms.len(), 4);
    }

    #[tokio::test]
    async fn test_failed_render_logs_and_keeps_status() {
        let (db, clock, fakes, runtime) = setup();
        let id = one_post(&db, &clock);
        db.attach_script(id, 7).unwrap();
        db.apply_transition(id, &crate::posts::Transition::to(PostStatus::GeneratingVideo))
            .unwrap();
        fakes.fail_render.store(true, Ordering::SeqCst);

        let err = runtime
            .execute(WorkRequest::RenderVideo { post_id: id, script_ref: 7 })
            .await
            .unwrap_err();
        assert!(matches!(err, AllAboutMeError::Worker(_)));

        let post = db.get_post(id).unwrap().unwrap();
        assert_eq!(post.status, PostStatus::GeneratingVideo);
        assert!(post.video_ref.is_none());

        let errors = db.recent_logs(10, Some(LogLevel::Error)).unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains(&format!("Post {id}")));
        assert!(errors[0].details.as_deref().unwrap().contains("ffmpeg"));
    }

    #[tokio::test]
    async fn test_duplicate_script_is_rejected() {
        let (db, clock, _fakes, runtime) = setup();
        let id = one_post(&db, &clock);
        db.attach_script(id, 1).unwrap();

        let err = runtime
            .execute(WorkRequest::GenerateScript { post_id: id, count: 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, AllAboutMeError::InvalidState(_)));
        assert_eq!(db.get_post(id).unwrap().unwrap().script_ref, Some(1));
    }

    #[tokio::test]
    async fn test_run_drains_channel() {
        let (db, clock, _fakes, runtime) = setup();
        let id = one_post(&db, &clock);
        let (queue, rx) = crate::queue::work_channel();
        queue
            .enqueue(WorkRequest::GenerateScript { post_id: id, count: 1 })
            .unwrap();
        drop(queue);

        Arc::new(runtime).run(rx).await;
        assert_eq!(db.get_post(id).unwrap().unwrap().script_ref, Some(100));
    }

    #[tokio::test]
    async fn test_run_waits_for_in_flight_work() {
        let (db, clock, fakes, runtime) = setup();
        let id = one_post(&db, &clock);
        db.attach_script(id, 7).unwrap();
        fakes.render_delay_ms.store(300, Ordering::SeqCst);

        let (queue, rx) = crate::queue::work_channel();
        let worker = tokio::spawn(Arc::new(runtime).run(rx));
        queue
            .enqueue(WorkRequest::RenderVideo { post_id: id, script_ref: 7 })
            .unwrap();
        // Let the runtime pick the request up before the queue closes.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(queue);

        worker.await.unwrap();
        assert_eq!(db.get_post(id).unwrap().unwrap().video_ref, Some(100));
    }
}
