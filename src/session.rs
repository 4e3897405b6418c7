//! Shared per-task state visible to every job of the task.
//!
//! The session holds the mutable attribute map and the sibling registry.
//! Attribute writes are read-after-write consistent for the setter and
//! wake every blocked waiter through a watch channel, so waits never
//! poll and never miss an update. The sibling registry only grows.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use uuid::Uuid;

use crate::error::{GridError, Result};

pub type TaskId = Uuid;
pub type JobId = Uuid;

/// Shared attribute store and sibling registry for one task execution.
///
/// Created at task submission and closed when the task reaches a terminal
/// state; every job of the task holds a reference to it.
#[derive(Debug)]
pub struct TaskSession {
    task_id: TaskId,
    task_name: String,
    topology_version: u64,
    inner: Mutex<SessionInner>,
    rev_tx: watch::Sender<u64>,
}

#[derive(Debug, Default)]
struct SessionInner {
    attrs: HashMap<String, Value>,
    siblings: Vec<JobId>,
    closed: bool,
}

impl TaskSession {
    pub fn new(task_id: TaskId, task_name: impl Into<String>, topology_version: u64) -> Self {
        let (rev_tx, _) = watch::channel(0u64);
        Self {
            task_id,
            task_name: task_name.into(),
            topology_version,
            inner: Mutex::new(SessionInner::default()),
            rev_tx,
        }
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    pub fn task_name(&self) -> &str {
        &self.task_name
    }

    /// Topology version captured at task submission.
    pub fn topology_version(&self) -> u64 {
        self.topology_version
    }

    /// Set an attribute and wake all waiters.
    pub fn set_attribute(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.closed {
            return Err(GridError::SessionClosed);
        }
        inner.attrs.insert(key.into(), value);
        drop(inner);
        self.rev_tx.send_modify(|rev| *rev += 1);
        Ok(())
    }

    /// Set several attributes atomically, waking waiters once.
    pub fn set_attributes(&self, attrs: impl IntoIterator<Item = (String, Value)>) -> Result<()> {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if inner.closed {
            return Err(GridError::SessionClosed);
        }
        inner.attrs.extend(attrs);
        drop(inner);
        self.rev_tx.send_modify(|rev| *rev += 1);
        Ok(())
    }

    pub fn get_attribute(&self, key: &str) -> Option<Value> {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.attrs.get(key).cloned()
    }

    /// Snapshot of the whole attribute map.
    pub fn attributes(&self) -> HashMap<String, Value> {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.attrs.clone()
    }

    /// Block until the attribute is set (by any job on any node).
    pub async fn wait_for_attribute(&self, key: &str, timeout: Option<Duration>) -> Result<Value> {
        self.wait(key, None, timeout).await
    }

    /// Block until the attribute holds the expected value.
    pub async fn wait_for_attribute_eq(
        &self,
        key: &str,
        expected: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        self.wait(key, Some(expected), timeout).await
    }

    async fn wait(&self, key: &str, expected: Option<&Value>, timeout: Option<Duration>) -> Result<Value> {
        let fut = self.wait_inner(key, expected);
        match timeout {
            Some(t) => tokio::time::timeout(t, fut)
                .await
                .map_err(|_| GridError::WaitTimeout)?,
            None => fut.await,
        }
    }

    async fn wait_inner(&self, key: &str, expected: Option<&Value>) -> Result<Value> {
        // Subscribe before the first check so a write between the check and
        // the wait still wakes us.
        let mut rev_rx = self.rev_tx.subscribe();
        loop {
            {
                let inner = self.inner.lock().expect("session lock poisoned");
                if inner.closed {
                    return Err(GridError::SessionClosed);
                }
                if let Some(value) = inner.attrs.get(key) {
                    match expected {
                        None => return Ok(value.clone()),
                        Some(e) if value == e => return Ok(value.clone()),
                        Some(_) => {}
                    }
                }
            }
            rev_rx
                .changed()
                .await
                .map_err(|_| GridError::SessionClosed)?;
        }
    }

    /// Register a sibling job id. The registry only grows; duplicates are
    /// ignored. Must happen before the job is dispatched.
    pub fn add_sibling(&self, job_id: JobId) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        if !inner.siblings.contains(&job_id) {
            inner.siblings.push(job_id);
        }
    }

    /// Ordered sibling job ids mapped so far.
    pub fn siblings(&self) -> Vec<JobId> {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.siblings.clone()
    }

    pub fn sibling_count(&self) -> usize {
        let inner = self.inner.lock().expect("session lock poisoned");
        inner.siblings.len()
    }

    /// Tear the session down: clears the attribute store and wakes all
    /// waiters with [`GridError::SessionClosed`].
    pub fn close(&self) {
        let mut inner = self.inner.lock().expect("session lock poisoned");
        inner.closed = true;
        inner.attrs.clear();
        drop(inner);
        self.rev_tx.send_modify(|rev| *rev += 1);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().expect("session lock poisoned").closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    fn session() -> Arc<TaskSession> {
        Arc::new(TaskSession::new(Uuid::new_v4(), "test-task", 1))
    }

    #[tokio::test]
    async fn set_then_wait_returns_immediately() {
        let ses = session();
        ses.set_attribute("color", json!("green")).unwrap();
        let v = ses.wait_for_attribute("color", None).await.unwrap();
        assert_eq!(v, json!("green"));
    }

    #[tokio::test]
    async fn wait_wakes_on_set() {
        let ses = session();
        let waiter = {
            let ses = ses.clone();
            tokio::spawn(async move { ses.wait_for_attribute("flag", None).await })
        };
        tokio::task::yield_now().await;
        ses.set_attribute("flag", json!(true)).unwrap();
        let v = waiter.await.unwrap().unwrap();
        assert_eq!(v, json!(true));
    }

    #[tokio::test]
    async fn wait_for_eq_skips_other_values() {
        let ses = session();
        let waiter = {
            let ses = ses.clone();
            tokio::spawn(async move {
                ses.wait_for_attribute_eq("state", &json!("ready"), None).await
            })
        };
        tokio::task::yield_now().await;
        ses.set_attribute("state", json!("starting")).unwrap();
        tokio::task::yield_now().await;
        ses.set_attribute("state", json!("ready")).unwrap();
        let v = waiter.await.unwrap().unwrap();
        assert_eq!(v, json!("ready"));
    }

    #[tokio::test]
    async fn wait_times_out() {
        let ses = session();
        let err = ses
            .wait_for_attribute("missing", Some(Duration::from_millis(20)))
            .await
            .unwrap_err();
        assert!(matches!(err, GridError::WaitTimeout));
    }

    #[tokio::test]
    async fn close_wakes_waiters_with_error() {
        let ses = session();
        let waiter = {
            let ses = ses.clone();
            tokio::spawn(async move { ses.wait_for_attribute("never", None).await })
        };
        tokio::task::yield_now().await;
        ses.close();
        let err = waiter.await.unwrap().unwrap_err();
        assert!(matches!(err, GridError::SessionClosed));
        assert!(ses.is_closed());
    }

    #[test]
    fn set_after_close_fails() {
        let ses = TaskSession::new(Uuid::new_v4(), "t", 0);
        ses.close();
        assert!(ses.set_attribute("k", json!(1)).is_err());
    }

    #[test]
    fn siblings_grow_only_no_duplicates() {
        let ses = TaskSession::new(Uuid::new_v4(), "t", 0);
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        ses.add_sibling(a);
        ses.add_sibling(b);
        ses.add_sibling(a);
        assert_eq!(ses.siblings(), vec![a, b]);
        assert_eq!(ses.sibling_count(), 2);
    }
}
