//! Streaming execution
//!
//! The run executes on a background task and sends [`StreamChunk`]s through a
//! bounded channel, so a slow consumer applies backpressure to the loop
//! instead of buffering without limit.

use super::{CompiledGraph, StreamChunkStream};
use crate::command::GraphInput;
use crate::config::RunConfig;
use crate::error::Result;
use crate::pregel::loop_impl::PregelLoop;
use crate::stream::{StreamChunk, StreamMode, StreamMultiplexer};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Chunks buffered between the loop and the consumer
const STREAM_BUFFER: usize = 100;

impl CompiledGraph {
    /// Stream a run, emitting chunks for each of `modes`
    ///
    /// An event matching several enabled modes is emitted once per mode. If
    /// the run fails, the stream ends with the error as its last item.
    /// Dropping the stream does not stop the run; use a cancellation token in
    /// `config` for that.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// use futures::StreamExt;
    ///
    /// let mut stream = compiled
    ///     .stream(json!({"query": "rust"}), RunConfig::thread("t"), vec![StreamMode::Updates])
    ///     .await?;
    /// while let Some(chunk) = stream.next().await {
    ///     println!("{:?}", chunk?.event);
    /// }
    /// ```
    pub async fn stream(
        &self,
        input: impl Into<GraphInput>,
        config: RunConfig,
        modes: Vec<StreamMode>,
    ) -> Result<StreamChunkStream> {
        let input = input.into();
        let modes = if modes.is_empty() {
            vec![StreamMode::default()]
        } else {
            modes
        };
        let (tx, rx) = mpsc::channel::<Result<StreamChunk>>(STREAM_BUFFER);
        let namespace = config.checkpoint_ns.clone().unwrap_or_default();
        let mux = StreamMultiplexer::new(modes, namespace, tx);

        let pregel = PregelLoop::new(self.graph.clone(), config, Some(mux)).await?;
        tokio::spawn(async move {
            if let Err(error) = pregel.run(input).await {
                tracing::debug!(error = %error, "Streamed run failed");
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }
}
