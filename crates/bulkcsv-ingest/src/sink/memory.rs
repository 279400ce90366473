//! In-process sink for dry runs and tests

use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use super::{DocumentSink, StoreAck, StoreError};
use crate::document::Document;

type RejectFn = dyn Fn(&Document) -> Option<String> + Send + Sync;

/// Keeps every stored document in memory, in submission order
#[derive(Clone)]
pub struct MemorySink {
    target: String,
    documents: Arc<Mutex<Vec<Document>>>,
    reject: Option<Arc<RejectFn>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            documents: Arc::default(),
            reject: None,
        }
    }

    /// Refuse any document for which `reject` returns a reason
    pub fn rejecting(
        mut self,
        reject: impl Fn(&Document) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        self.reject = Some(Arc::new(reject));
        self
    }

    pub fn documents(&self) -> Vec<Document> {
        self.documents.lock().map(|docs| docs.clone()).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.documents.lock().map(|docs| docs.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentSink for MemorySink {
    async fn store(&self, document: &Document) -> Result<StoreAck, StoreError> {
        if let Some(reason) = self.reject.as_ref().and_then(|reject| reject(document)) {
            return Err(StoreError::Rejected {
                target: self.target.clone(),
                reason,
            });
        }

        let mut docs = self.documents.lock().map_err(|_| StoreError::Rejected {
            target: self.target.clone(),
            reason: "document buffer poisoned".to_string(),
        })?;
        docs.push(document.clone());

        Ok(StoreAck {
            id: Some(docs.len().to_string()),
        })
    }

    fn describe(&self) -> String {
        format!("memory {}", self.target)
    }
}
