//! # Binary Prefetch
//!
//! When a dump does not contain a module's metadata, the metadata importer
//! will eventually need the module's binary from a remote store. Fetching it
//! over the network is slow, so module construction queues a prefetch as
//! soon as the gap is detected and moves on.
//!
//! The queue is fire-and-forget: [`Prefetcher::enqueue`] returns
//! immediately, no handle to the job is kept, and the outcome is never
//! reported back. A job only warms the store's own cache; it does not touch
//! any heap, type table or module index state.
//!
//! Jobs run on a dedicated single-worker `tokio` runtime. The store call is
//! blocking, so each one goes through `spawn_blocking`.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use tokio::runtime::{Builder, Runtime};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::error::GcScopeResult;

/// Key a remote binary store uses to locate one image.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PrefetchRequest
{
    /// File name of the image (no directories)
    pub file_name: String,
    /// Link timestamp from the image header
    pub time_date_stamp: u32,
    /// `SizeOfImage` from the image header
    pub image_size: u32,
}

impl fmt::Display for PrefetchRequest
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}/{:08X}{:x}", self.file_name, self.time_date_stamp, self.image_size)
    }
}

/// Remote store that can download a binary into a local cache.
pub trait BinaryStore: Send + Sync + 'static
{
    /// Fetch the image described by `request`. Blocking.
    fn prefetch(&self, request: &PrefetchRequest) -> GcScopeResult<()>;
}

/// Background prefetch queue
///
/// Dropping the queue shuts its worker down without waiting for an
/// in-flight download.
pub struct Prefetcher
{
    sender: mpsc::UnboundedSender<PrefetchRequest>,
    runtime: Option<Runtime>,
}

impl Prefetcher
{
    /// Start a worker that forwards requests to `store`.
    ///
    /// ## Errors
    ///
    /// `Io` if the worker runtime cannot be created.
    pub fn new(store: Arc<dyn BinaryStore>) -> GcScopeResult<Self>
    {
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gcscope-prefetch")
            .build()?;

        let (sender, mut receiver) = mpsc::unbounded_channel::<PrefetchRequest>();
        runtime.spawn(async move {
            let mut seen = HashSet::new();
            while let Some(request) = receiver.recv().await {
                if !seen.insert(request.clone()) {
                    trace!(%request, "already prefetched");
                    continue;
                }

                let store = store.clone();
                let label = request.to_string();
                match tokio::task::spawn_blocking(move || store.prefetch(&request)).await {
                    Ok(Ok(())) => debug!(request = %label, "prefetched binary"),
                    Ok(Err(err)) => debug!(request = %label, "prefetch failed: {err}"),
                    Err(err) => warn!(request = %label, "prefetch task aborted: {err}"),
                }
            }
            trace!("prefetch queue closed");
        });

        Ok(Self {
            sender,
            runtime: Some(runtime),
        })
    }

    /// Queue a request. Never blocks; a closed queue drops the request.
    pub fn enqueue(&self, request: PrefetchRequest)
    {
        debug!(%request, "queueing binary prefetch");
        if let Err(err) = self.sender.send(request) {
            debug!(request = %err.0, "prefetch queue closed, dropping request");
        }
    }
}

impl fmt::Debug for Prefetcher
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("Prefetcher")
            .field("closed", &self.sender.is_closed())
            .finish()
    }
}

impl Drop for Prefetcher
{
    fn drop(&mut self)
    {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
