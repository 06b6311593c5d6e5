use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::debug;

use crate::store::client::{StatusStoreError, StatusStoreTrait, StatusSubscription, Subscribers};
use crate::store::document::{get_path, remove_path, set_path};
use crate::store::status::{ShadeStatus, StatusPath};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOperationKind {
    Set(Value),
    Delete,
}

/// A write that reached the store, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOperation {
    pub path: StatusPath,
    pub kind: StoreOperationKind,
}

/// In-process status store.
///
/// Every mutation is applied and broadcast under one lock, so subscribers see
/// writes in the order the store accepted them and concurrent writes to the
/// same field resolve to whichever arrived last.
#[derive(Clone, Default)]
pub struct MemoryStatusStore {
    document: Arc<Mutex<Value>>,
    operations: Arc<Mutex<Vec<StoreOperation>>>,
    subscribers: Subscribers,
    failing: Arc<AtomicBool>,
}

impl MemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(status: &ShadeStatus) -> Self {
        let document = serde_json::to_value(status).unwrap_or(Value::Null);
        Self {
            document: Arc::new(Mutex::new(document)),
            ..Default::default()
        }
    }

    /// Makes every subsequent write and delete fail until switched off.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn operations(&self) -> Vec<StoreOperation> {
        self.operations.lock().await.clone()
    }

    pub async fn clear_operations(&self) {
        self.operations.lock().await.clear();
    }

    pub async fn document(&self) -> Value {
        self.document.lock().await.clone()
    }

    async fn apply(&self, path: StatusPath, kind: StoreOperationKind) -> Result<(), StatusStoreError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(StatusStoreError::Write {
                path,
                message: "store unavailable".to_string(),
            });
        }
        let mut document = self.document.lock().await;
        match &kind {
            StoreOperationKind::Set(value) => set_path(&mut document, path.segments(), value.clone()),
            StoreOperationKind::Delete => {
                remove_path(&mut document, path.segments());
            }
        }
        debug!("Memory store {path} <- {kind:?}");
        self.operations
            .lock()
            .await
            .push(StoreOperation { path, kind });
        let event = ShadeStatus::from_snapshot(&document);
        self.subscribers.notify(event).await;
        Ok(())
    }
}

#[async_trait]
impl StatusStoreTrait for MemoryStatusStore {
    async fn read(&self, path: StatusPath) -> Result<Value, StatusStoreError> {
        let document = self.document.lock().await;
        Ok(get_path(&document, path.segments())
            .cloned()
            .unwrap_or(Value::Null))
    }

    async fn write(&self, path: StatusPath, value: Value) -> Result<(), StatusStoreError> {
        if value.is_null() {
            return self.delete(path).await;
        }
        self.apply(path, StoreOperationKind::Set(value)).await
    }

    async fn delete(&self, path: StatusPath) -> Result<(), StatusStoreError> {
        self.apply(path, StoreOperationKind::Delete).await
    }

    async fn subscribe(&self) -> Result<StatusSubscription, StatusStoreError> {
        let document = self.document.lock().await;
        let initial = ShadeStatus::from_snapshot(&document);
        Ok(self.subscribers.add(Some(initial)).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::status::CountdownModel;
    use serde_json::json;

    #[tokio::test]
    async fn subscribe_delivers_current_record_first() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        let mut subscription = store.subscribe().await.unwrap();
        let first = subscription.next().await.unwrap().unwrap();
        assert_eq!(first, ShadeStatus::default());
    }

    #[tokio::test]
    async fn empty_store_reports_not_found() {
        let store = MemoryStatusStore::new();
        let mut subscription = store.subscribe().await.unwrap();
        assert_eq!(
            subscription.next().await.unwrap(),
            Err(StatusStoreError::NotFound)
        );
        assert_eq!(store.read(StatusPath::Root).await.unwrap(), Value::Null);
    }

    #[tokio::test]
    async fn field_write_pushes_snapshot() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        let mut subscription = store.subscribe().await.unwrap();
        subscription.next().await;

        store
            .write(StatusPath::CountdownSecondsLeft, json!(600))
            .await
            .unwrap();

        let status = subscription.next().await.unwrap().unwrap();
        assert_eq!(
            status.countdown_model,
            Some(CountdownModel { seconds_left: 600 })
        );
        assert_eq!(
            store.read(StatusPath::CountdownSecondsLeft).await.unwrap(),
            json!(600)
        );
    }

    #[tokio::test]
    async fn delete_removes_countdown_subtree() {
        let status = ShadeStatus {
            countdown_model: Some(CountdownModel { seconds_left: 90 }),
            ..Default::default()
        };
        let store = MemoryStatusStore::with_status(&status);
        store.delete(StatusPath::CountdownModel).await.unwrap();

        let document = store.document().await;
        assert!(document.get("countdownModel").is_none());
        assert_eq!(
            store.operations().await,
            vec![StoreOperation {
                path: StatusPath::CountdownModel,
                kind: StoreOperationKind::Delete,
            }]
        );
    }

    #[tokio::test]
    async fn failing_store_rejects_writes_untouched() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        store.set_failing(true);
        let result = store.write(StatusPath::ManualShade, json!(45)).await;
        assert!(matches!(result, Err(StatusStoreError::Write { .. })));
        assert!(store.operations().await.is_empty());
        assert_eq!(store.read(StatusPath::ManualShade).await.unwrap(), json!(30));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrent_writers_last_one_wins() {
        let store = MemoryStatusStore::with_status(&ShadeStatus::default());
        let first = {
            let store = store.clone();
            tokio::spawn(async move { store.write(StatusPath::ManualShade, json!(20)).await })
        };
        let second = {
            let store = store.clone();
            tokio::spawn(async move { store.write(StatusPath::ManualShade, json!(45)).await })
        };
        first.await.unwrap().unwrap();
        second.await.unwrap().unwrap();

        let operations = store.operations().await;
        assert_eq!(operations.len(), 2);
        let StoreOperationKind::Set(last) = &operations[1].kind else {
            panic!("expected a set operation");
        };
        let persisted = store.read(StatusPath::ManualShade).await.unwrap();
        assert_eq!(&persisted, last);
        assert!(persisted == json!(20) || persisted == json!(45));
    }
}
