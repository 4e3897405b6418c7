//! Externally observable handle for an in-flight task.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::error::{GridError, Result};
use crate::scheduler::run::TaskMsg;
use crate::session::TaskId;

enum State<R> {
    Active {
        listeners: Vec<Box<dyn FnOnce(Result<R>) + Send>>,
    },
    Done(Result<R>),
}

struct Shared<R> {
    task_id: TaskId,
    state: Mutex<State<R>>,
    done_tx: watch::Sender<bool>,
    cancel_requested: AtomicBool,
    ctl: mpsc::UnboundedSender<TaskMsg>,
}

/// Handle representing in-flight or completed task state.
///
/// Cheap to clone; every clone observes the same terminal result.
pub struct TaskFuture<R> {
    shared: Arc<Shared<R>>,
}

impl<R> Clone for TaskFuture<R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<R: Clone + Send + 'static> TaskFuture<R> {
    pub(crate) fn new(
        task_id: TaskId,
        ctl: mpsc::UnboundedSender<TaskMsg>,
    ) -> (Self, TaskCompleter<R>) {
        let (done_tx, _) = watch::channel(false);
        let shared = Arc::new(Shared {
            task_id,
            state: Mutex::new(State::Active {
                listeners: Vec::new(),
            }),
            done_tx,
            cancel_requested: AtomicBool::new(false),
            ctl,
        });
        (
            Self {
                shared: shared.clone(),
            },
            TaskCompleter { shared },
        )
    }

    pub fn task_id(&self) -> TaskId {
        self.shared.task_id
    }

    pub fn is_done(&self) -> bool {
        matches!(
            &*self.shared.state.lock().expect("future lock poisoned"),
            State::Done(_)
        )
    }

    /// The terminal result, if the task already completed.
    pub fn try_get(&self) -> Option<Result<R>> {
        match &*self.shared.state.lock().expect("future lock poisoned") {
            State::Done(res) => Some(res.clone()),
            State::Active { .. } => None,
        }
    }

    /// Block until the task reaches a terminal state.
    pub async fn get(&self) -> Result<R> {
        let mut done_rx = self.shared.done_tx.subscribe();
        loop {
            if let Some(res) = self.try_get() {
                return res;
            }
            if done_rx.changed().await.is_err() {
                // Sender lives in the shared state, so this cannot happen
                // while the future is alive.
                return Err(GridError::Internal("task future abandoned".into()));
            }
        }
    }

    /// Like [`get`](Self::get) but gives up after `timeout`. Raising the
    /// wait timeout does not cancel the task.
    pub async fn get_timeout(&self, timeout: Duration) -> Result<R> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| GridError::WaitTimeout)?
    }

    /// Request cancellation. The first effective call returns true; calls
    /// on an already-cancelled or terminal future return false.
    pub fn cancel(&self) -> bool {
        if self.is_done() {
            return false;
        }
        if self.shared.cancel_requested.swap(true, Ordering::SeqCst) {
            return false;
        }
        let _ = self.shared.ctl.send(TaskMsg::Cancel);
        true
    }

    /// Register a completion listener. Fires exactly once, off the
    /// completing thread, after the terminal state is reached; a listener
    /// registered after completion fires immediately (still off-thread).
    pub fn listen<F>(&self, f: F)
    where
        F: FnOnce(Result<R>) + Send + 'static,
    {
        let result = {
            let mut state = self.shared.state.lock().expect("future lock poisoned");
            match &mut *state {
                State::Active { listeners } => {
                    listeners.push(Box::new(f));
                    return;
                }
                State::Done(res) => res.clone(),
            }
        };
        tokio::spawn(async move { f(result) });
    }
}

/// Completion side of a [`TaskFuture`], held by the task loop.
pub(crate) struct TaskCompleter<R> {
    shared: Arc<Shared<R>>,
}

impl<R: Clone + Send + 'static> TaskCompleter<R> {
    /// Move the future to its terminal state. Only the first completion
    /// takes effect.
    pub(crate) fn complete(&self, result: Result<R>) {
        let previous = {
            let mut state = self.shared.state.lock().expect("future lock poisoned");
            if matches!(&*state, State::Done(_)) {
                return;
            }
            std::mem::replace(&mut *state, State::Done(result.clone()))
        };
        let _ = self.shared.done_tx.send(true);
        let State::Active { listeners } = previous else {
            return;
        };
        for listener in listeners {
            let res = result.clone();
            tokio::spawn(async move { listener(res) });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use uuid::Uuid;

    fn future() -> (
        TaskFuture<i64>,
        TaskCompleter<i64>,
        mpsc::UnboundedReceiver<TaskMsg>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (fut, completer) = TaskFuture::new(Uuid::new_v4(), tx);
        (fut, completer, rx)
    }

    #[tokio::test]
    async fn get_blocks_until_complete() {
        let (fut, completer, _rx) = future();
        assert!(!fut.is_done());
        let waiter = {
            let fut = fut.clone();
            tokio::spawn(async move { fut.get().await })
        };
        tokio::task::yield_now().await;
        completer.complete(Ok(7));
        assert_eq!(waiter.await.unwrap().unwrap(), 7);
        assert_eq!(fut.try_get().unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn get_timeout_does_not_cancel() {
        let (fut, completer, mut rx) = future();
        let err = fut.get_timeout(Duration::from_millis(10)).await.unwrap_err();
        assert!(matches!(err, GridError::WaitTimeout));
        // No cancel message was sent on behalf of the timed-out wait.
        assert!(rx.try_recv().is_err());
        completer.complete(Ok(1));
        assert_eq!(fut.get().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cancel_is_idempotent() {
        let (fut, completer, mut rx) = future();
        assert!(fut.cancel());
        assert!(!fut.cancel());
        assert!(matches!(rx.try_recv().unwrap(), TaskMsg::Cancel));
        assert!(rx.try_recv().is_err());
        completer.complete(Err(GridError::TaskCancelled));
        assert!(!fut.cancel());
    }

    #[tokio::test]
    async fn listeners_fire_exactly_once() {
        let (fut, completer, _rx) = future();
        let fired = Arc::new(AtomicUsize::new(0));

        let before = fired.clone();
        fut.listen(move |_res| {
            before.fetch_add(1, Ordering::SeqCst);
        });

        completer.complete(Ok(3));
        completer.complete(Ok(9)); // ignored

        let after = fired.clone();
        fut.listen(move |res| {
            assert_eq!(res.unwrap(), 3);
            after.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 2);
        assert_eq!(fut.get().await.unwrap(), 3);
    }
}
