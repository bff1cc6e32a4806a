//! Named task handles and structured shutdown.

use std::{
    borrow::Cow,
    future::Future,
    pin::Pin,
    task::{Context, Poll},
    time::Duration,
};

use futures::{StreamExt, stream::FuturesUnordered};
use thiserror::Error;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, error, info, warn};

use crate::notify_once::NotifyOnce;

/// Errors that can occur when joining [`LmTask`]s.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Static task finished prematurely: {name}")]
    PrematureFinish { name: Cow<'static, str> },
    #[error("Some tasks failed to finish on time: {hung_tasks:?}")]
    Hung { hung_tasks: Vec<String> },
}

/// A thin wrapper around [`tokio::task::JoinHandle`] that:
///
/// 1. propagates panics instead of catching them,
/// 2. is `#[must_use]` so every spawned task is either joined or explicitly
///    [`detach`](LmTask::detach)ed,
/// 3. carries a task name for debuggability.
#[must_use]
pub struct LmTask<T> {
    task: JoinHandle<T>,
    name: Cow<'static, str>,
}

impl<T: Send + 'static> LmTask<T> {
    /// Spawns a named task which inherits the current span.
    #[inline]
    pub fn spawn<F>(name: impl Into<Cow<'static, str>>, future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let span = tracing::Span::current();
        Self::spawn_with_span(name, span, future)
    }

    /// Spawns an unnamed task; use for trivial fire-and-forget futures.
    #[inline]
    pub fn spawn_unnamed<F>(future: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        Self::spawn("", future)
    }

    /// Spawns a named task inside the given span.
    #[inline]
    pub fn spawn_with_span<F>(
        name: impl Into<Cow<'static, str>>,
        span: tracing::Span,
        future: F,
    ) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        use tracing::Instrument;
        Self {
            task: tokio::spawn(future.instrument(span)),
            name: name.into(),
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Detach the task so it runs without a joinable handle.
    pub fn detach(self) {
        drop(self.task);
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    /// Wrap the task so its result is logged when it finishes, yielding the
    /// task's name instead of its output.
    pub fn logged(self) -> LoggedLmTask<T> {
        LoggedLmTask(self)
    }
}

impl<T> Future for LmTask<T> {
    type Output = T;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<T> {
        match Pin::new(&mut self.task).poll(cx) {
            Poll::Ready(Ok(value)) => Poll::Ready(value),
            Poll::Ready(Err(join_err)) if join_err.is_panic() =>
                std::panic::resume_unwind(join_err.into_panic()),
            Poll::Ready(Err(join_err)) => {
                panic!("Task '{}' was cancelled: {join_err}", self.name)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// A [`Future`] wrapping [`LmTask`] whose output is the task name, logging
/// the task result as it resolves.
pub struct LoggedLmTask<T>(LmTask<T>);

impl<T> Future for LoggedLmTask<T> {
    type Output = Cow<'static, str>;

    fn poll(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Self::Output> {
        match Pin::new(&mut self.0.task).poll(cx) {
            Poll::Ready(result) => {
                let name = std::mem::take(&mut self.0.name);
                match result {
                    Ok(_) => debug!("Task finished: '{name}'"),
                    Err(e) if e.is_panic() =>
                        error!("Task '{name}' panicked: {e:#}"),
                    Err(e) => warn!("Task '{name}' cancelled: {e:#}"),
                }
                Poll::Ready(name)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// The gateway's standard structured-concurrency shutdown:
///
/// - "static" tasks run for the program lifetime; one finishing early
///   triggers a shutdown and surfaces an error.
/// - "ephemeral" tasks arrive over `eph_tasks_rx` and may finish freely.
/// - After the shutdown signal, all remaining tasks get `shutdown_timeout`
///   to complete before being reported as hung.
pub async fn try_join_tasks_and_shutdown(
    static_tasks: Vec<LmTask<()>>,
    mut eph_tasks_rx: mpsc::Receiver<LmTask<()>>,
    mut shutdown: NotifyOnce,
    shutdown_timeout: Duration,
) -> Result<(), Error> {
    if static_tasks.is_empty() {
        shutdown.recv().await;
        return Ok(());
    }

    let mut static_tasks = static_tasks
        .into_iter()
        .map(LmTask::logged)
        .collect::<FuturesUnordered<_>>();
    let mut ephemeral_tasks = FuturesUnordered::new();

    let mut result = Ok(());

    loop {
        tokio::select! {
            // Mitigate possible select! race after a shutdown signal is sent
            biased;
            () = shutdown.recv() => break,
            Some(task) = eph_tasks_rx.recv() => {
                debug!("Received ephemeral task: {name}", name = task.name());
                ephemeral_tasks.push(task.logged());
            }
            Some(name) = ephemeral_tasks.next() => {
                debug!("Ephemeral task finished: {name}");
            }
            Some(name) = static_tasks.next() => {
                result = Err(Error::PrematureFinish { name });
                break shutdown.send();
            }
        }
    }

    let mut all_tasks = static_tasks
        .into_iter()
        .chain(ephemeral_tasks.into_iter())
        .collect::<FuturesUnordered<_>>();

    let shutdown_timeout_fut = tokio::time::sleep(shutdown_timeout);
    tokio::pin!(shutdown_timeout_fut);

    while !all_tasks.is_empty() {
        tokio::select! {
            Some(_name) = all_tasks.next() => (),
            () = &mut shutdown_timeout_fut => {
                let hung_tasks = all_tasks
                    .iter()
                    .map(|task| task.0.name().to_owned())
                    .collect::<Vec<_>>();
                return Err(Error::Hung { hung_tasks });
            }
        }
    }

    result
}

/// [`try_join_tasks_and_shutdown`], logging the outcome instead of
/// returning it.
pub async fn join_tasks_and_shutdown(
    name: &str,
    static_tasks: Vec<LmTask<()>>,
    eph_tasks_rx: mpsc::Receiver<LmTask<()>>,
    shutdown: NotifyOnce,
    shutdown_timeout: Duration,
) {
    let result = try_join_tasks_and_shutdown(
        static_tasks,
        eph_tasks_rx,
        shutdown,
        shutdown_timeout,
    )
    .await;

    match result {
        Ok(()) => info!("{name} tasks finished."),
        Err(e) => error!("{name} tasks errored: {e:#}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn named_task_resolves_to_output() {
        let task = LmTask::spawn("adder", async { 2 + 2 });
        assert_eq!(task.await, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn static_task_premature_finish_errors() {
        let tasks = vec![LmTask::spawn("short-lived", async {})];
        let (_tx, rx) = mpsc::channel(1);
        let shutdown = NotifyOnce::new();
        let result = try_join_tasks_and_shutdown(
            tasks,
            rx,
            shutdown,
            Duration::from_secs(1),
        )
        .await;
        assert!(matches!(result, Err(Error::PrematureFinish { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn clean_shutdown_joins_all() {
        let mut waiter = NotifyOnce::new();
        let shutdown = waiter.clone();
        let tasks = vec![LmTask::spawn("waiter", async move {
            waiter.recv().await;
        })];
        let (_tx, rx) = mpsc::channel(1);
        shutdown.send();
        let result = try_join_tasks_and_shutdown(
            tasks,
            rx,
            shutdown,
            Duration::from_secs(1),
        )
        .await;
        assert!(result.is_ok());
    }
}
