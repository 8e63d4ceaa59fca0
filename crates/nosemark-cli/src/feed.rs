use nosemark_core::{AnnotatedFrame, Frame, FrameAnnotator};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const FEED_QUEUE_DEPTH: usize = 4;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("feed thread exited")]
    ChannelClosed,
    #[error("failed to spawn feed thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// One frame awaiting annotation.
struct FeedRequest {
    frame: Frame,
    reply: oneshot::Sender<AnnotatedFrame>,
}

/// Clone-safe handle to the feed thread.
#[derive(Clone)]
pub struct FeedHandle {
    tx: mpsc::Sender<FeedRequest>,
}

impl FeedHandle {
    /// Queue `frame` and wait for its annotated result.
    pub async fn annotate(&self, frame: Frame) -> Result<AnnotatedFrame, FeedError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(FeedRequest {
                frame,
                reply: reply_tx,
            })
            .await
            .map_err(|_| FeedError::ChannelClosed)?;
        reply_rx.await.map_err(|_| FeedError::ChannelClosed)
    }
}

/// Move `annotator` onto a dedicated OS thread and return a handle to it.
///
/// Frames are annotated one at a time in arrival order. The thread exits
/// once every handle has been dropped.
pub fn spawn_feed(mut annotator: FrameAnnotator) -> Result<FeedHandle, FeedError> {
    let (tx, mut rx) = mpsc::channel::<FeedRequest>(FEED_QUEUE_DEPTH);

    std::thread::Builder::new()
        .name("nosemark-feed".into())
        .spawn(move || {
            tracing::info!("feed thread started");
            let mut processed = 0u64;
            while let Some(req) = rx.blocking_recv() {
                let annotated = annotator.annotate(&req.frame);
                processed += 1;
                if req.reply.send(annotated).is_err() {
                    tracing::warn!(frame = processed, "caller went away; dropping annotated frame");
                }
            }
            tracing::info!(processed, "feed thread exiting");
        })?;

    Ok(FeedHandle { tx })
}
