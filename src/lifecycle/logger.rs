//! Per-module structured log stream.
//!
//! Every record lands in `module_logs` and is published on the module's
//! WebSocket topic. DB failures degrade to process-level warnings so a
//! broken log table never takes the lifecycle operation down with it.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use pan_bagnat_common::topics::module_topic;
use pan_bagnat_common::types::{Event, LogLevel};

use crate::store::Store;
use crate::ws::WsRegistry;

/// Receiver of streamed command output, one call per line.
#[async_trait]
pub trait LogSink: Send + Sync {
    async fn log(&self, level: LogLevel, message: &str);

    async fn info(&self, message: &str) {
        self.log(LogLevel::Info, message).await;
    }

    async fn warn(&self, message: &str) {
        self.log(LogLevel::Warn, message).await;
    }

    async fn error(&self, message: &str) {
        self.log(LogLevel::Error, message).await;
    }
}

pub struct ModuleLogger {
    store: Store,
    registry: Arc<WsRegistry>,
    module_id: String,
}

impl ModuleLogger {
    pub fn new(store: Store, registry: Arc<WsRegistry>, module_id: &str) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            module_id: module_id.to_string(),
        })
    }
}

#[async_trait]
impl LogSink for ModuleLogger {
    async fn log(&self, level: LogLevel, message: &str) {
        let payload = match self
            .store
            .insert_module_log(&self.module_id, level, message, serde_json::json!({}))
            .await
        {
            Ok(row) => serde_json::to_value(&row).unwrap_or_default(),
            Err(e) => {
                warn!(module = %self.module_id, "failed to persist module log: {e}");
                serde_json::json!({
                    "module_id": self.module_id,
                    "level": level.as_str(),
                    "message": message,
                })
            }
        };
        let mut event = Event::new(
            "module_log",
            Some(module_topic(&self.module_id)),
            payload,
        );
        event.module_id = Some(self.module_id.clone());
        self.registry.push(event);
    }
}

/// In-memory sink for tests.
#[cfg(test)]
pub mod test_sink {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct VecSink {
        pub lines: Mutex<Vec<(LogLevel, String)>>,
    }

    impl VecSink {
        pub fn messages(&self, level: LogLevel) -> Vec<String> {
            self.lines
                .lock()
                .unwrap()
                .iter()
                .filter(|(l, _)| *l == level)
                .map(|(_, m)| m.clone())
                .collect()
        }
    }

    #[async_trait]
    impl LogSink for VecSink {
        async fn log(&self, level: LogLevel, message: &str) {
            self.lines.lock().unwrap().push((level, message.to_string()));
        }
    }
}
