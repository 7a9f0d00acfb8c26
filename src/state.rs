//! Application state: configuration, the store, the optional generation
//! client, the text extractor, and per-(learner, document) locks.
//!
//! Everything is injected at construction so tests can swap in the memory
//! store, a canned generation client and a plain-text extractor.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::config::AppConfig;
use crate::domain::DocId;
use crate::extract::TextExtractor;
use crate::openai::LlmClient;
use crate::store::Store;

pub struct AppState {
  pub config: AppConfig,
  pub store: Arc<dyn Store>,
  pub llm: Option<Arc<dyn LlmClient>>,
  pub extractor: Arc<dyn TextExtractor>,
  pub locks: ProgressLocks,
}

impl AppState {
  pub fn new(
    config: AppConfig,
    store: Arc<dyn Store>,
    llm: Option<Arc<dyn LlmClient>>,
    extractor: Arc<dyn TextExtractor>,
  ) -> Self {
    Self { config, store, llm, extractor, locks: ProgressLocks::default() }
  }

  pub fn llm(&self) -> Option<&dyn LlmClient> {
    self.llm.as_deref()
  }
}

/// Serialises reads and writes of one learner's progress on one document.
/// The map holds weak handles; an entry dies with its last guard and is
/// pruned on the next acquire.
#[derive(Default)]
pub struct ProgressLocks {
  inner: Mutex<HashMap<(String, DocId), Weak<Mutex<()>>>>,
}

impl ProgressLocks {
  pub async fn acquire(&self, learner: &str, doc_id: DocId) -> OwnedMutexGuard<()> {
    let lock = {
      let mut map = self.inner.lock().await;
      map.retain(|_, w| w.strong_count() > 0);
      let key = (learner.to_string(), doc_id);
      match map.get(&key).and_then(Weak::upgrade) {
        Some(lock) => lock,
        None => {
          let lock = Arc::new(Mutex::new(()));
          map.insert(key, Arc::downgrade(&lock));
          lock
        }
      }
    };
    lock.lock_owned().await
  }

  #[cfg(test)]
  async fn len(&self) -> usize {
    self.inner.lock().await.len()
  }
}
