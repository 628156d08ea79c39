use anyhow::{anyhow, bail, Result};
use std::future::Future;
use std::io::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Fixed-width task pool. At most `width` submitted tasks run at once;
/// `submit` waits for a free slot and `await_all` is the join barrier.
///
/// Tasks are fire-and-forget: their failures are their own business, the
/// dispatcher only tracks how many have finished.
pub struct Dispatcher {
    sem: Arc<Semaphore>,
    set: JoinSet<()>,
    completed: Arc<AtomicU64>,
    progress: Option<Progress>,
    cancel: CancellationToken,
}

impl Dispatcher {
    pub fn new(width: usize, cancel: CancellationToken) -> Self {
        Self {
            sem: Arc::new(Semaphore::new(width.clamp(1, Semaphore::MAX_PERMITS))),
            set: JoinSet::new(),
            completed: Arc::new(AtomicU64::new(0)),
            progress: None,
            cancel,
        }
    }

    /// Advance `progress` once per finished task.
    pub fn with_progress(mut self, progress: Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Spawn `task` once a slot is free. Fails only when the run has been
    /// cancelled, in which case the task is not started.
    pub async fn submit<F>(&mut self, task: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => bail!("dispatch cancelled"),
            permit = self.sem.clone().acquire_owned() => permit.map_err(|e| anyhow!(e))?,
        };
        let completed = self.completed.clone();
        let progress = self.progress.clone();
        let cancel = self.cancel.clone();

        self.set.spawn(async move {
            let _permit = permit; // hold the slot until the task is done
            if !cancel.is_cancelled() {
                task.await;
            }
            completed.fetch_add(1, Ordering::Relaxed);
            if let Some(p) = progress {
                p.advance();
            }
        });
        Ok(())
    }

    /// Wait for every submitted task and return how many ran to completion.
    /// Consumes the dispatcher so the barrier can only be passed once.
    pub async fn await_all(mut self) -> u64 {
        while let Some(res) = self.set.join_next().await {
            if let Err(e) = res {
                tracing::warn!(error = %e, "dispatched task aborted");
            }
        }
        if let Some(p) = &self.progress {
            p.finish();
        }
        self.completed.load(Ordering::Relaxed)
    }
}

/// Append-only collection shared by the tasks of one stage.
#[derive(Debug)]
pub struct ResultSink<T> {
    inner: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for ResultSink<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> Default for ResultSink<T> {
    fn default() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Send> ResultSink<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, item: T) {
        self.inner.lock().await.push(item);
    }

    /// Take the collected items. Only valid after the stage's join barrier,
    /// when this is the last handle.
    pub fn into_inner(self) -> Result<Vec<T>> {
        Arc::try_unwrap(self.inner)
            .map(Mutex::into_inner)
            .map_err(|_| anyhow!("result sink still shared after join"))
    }
}

/// Best-effort `done/total (pct%)` line on stdout, rewritten in place.
#[derive(Clone, Debug)]
pub struct Progress {
    label: &'static str,
    total: u64,
    done: Arc<AtomicU64>,
    enabled: bool,
}

impl Progress {
    pub fn new(label: &'static str, total: u64) -> Self {
        Self {
            label,
            total,
            done: Arc::new(AtomicU64::new(0)),
            enabled: true,
        }
    }

    /// Counts without printing anything.
    pub fn silent(label: &'static str, total: u64) -> Self {
        Self {
            enabled: false,
            ..Self::new(label, total)
        }
    }

    pub fn advance(&self) -> u64 {
        let done = self.done.fetch_add(1, Ordering::Relaxed) + 1;
        if self.enabled {
            let mut out = std::io::stdout().lock();
            let _ = write!(out, "\r{}", self.render(done));
            let _ = out.flush();
        }
        done
    }

    pub fn finish(&self) {
        if self.enabled {
            println!();
        }
    }

    pub fn done(&self) -> u64 {
        self.done.load(Ordering::Relaxed)
    }

    fn render(&self, done: u64) -> String {
        let pct = if self.total == 0 {
            100.0
        } else {
            done as f64 / self.total as f64 * 100.0
        };
        format!("{}: {done}/{} ({pct:.2}%)", self.label, self.total)
    }
}
