use std::sync::Arc;

use dashmap::DashMap;
use llm_core::TextGenerator;
use tts_core::SpeechSynthesizer;
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::metrics::StreamMetrics;
use crate::pipeline::CancelFlag;

#[derive(Clone)]
pub struct AppState {
    pub generator: Arc<dyn TextGenerator>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
    pub config: ServerConfig,
    pub metrics: Arc<StreamMetrics>,
    pub streams: Arc<StreamRegistry>,
}

impl AppState {
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        config: ServerConfig,
    ) -> Self {
        Self {
            generator,
            synthesizer,
            config,
            metrics: Arc::new(StreamMetrics::new()),
            streams: Arc::new(StreamRegistry::default()),
        }
    }
}

/// Cancellation handles of the streams currently being served, by stream id.
/// Only the flags are shared; each pipeline is still private to its request.
#[derive(Debug, Default)]
pub struct StreamRegistry {
    live: DashMap<Uuid, CancelFlag>,
}

impl StreamRegistry {
    pub fn register(self: &Arc<Self>, flag: CancelFlag) -> StreamTicket {
        let id = Uuid::new_v4();
        self.live.insert(id, flag.clone());
        StreamTicket {
            id,
            flag,
            registry: Arc::clone(self),
        }
    }

    /// Returns false when no live stream has this id
    pub fn cancel(&self, id: &Uuid) -> bool {
        match self.live.get(id) {
            Some(entry) => {
                entry.value().cancel();
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }
}

/// Registration of one live stream; dropping it cancels and unregisters.
#[derive(Debug)]
pub struct StreamTicket {
    id: Uuid,
    flag: CancelFlag,
    registry: Arc<StreamRegistry>,
}

impl StreamTicket {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for StreamTicket {
    fn drop(&mut self) {
        self.flag.cancel();
        self.registry.live.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_reaches_registered_flag() {
        let registry = Arc::new(StreamRegistry::default());
        let flag = CancelFlag::new();
        let ticket = registry.register(flag.clone());

        assert!(registry.cancel(&ticket.id()));
        assert!(flag.is_cancelled());
        assert!(!registry.cancel(&Uuid::new_v4()));
    }

    #[test]
    fn test_dropping_ticket_unregisters() {
        let registry = Arc::new(StreamRegistry::default());
        let flag = CancelFlag::new();
        let ticket = registry.register(flag.clone());
        let id = ticket.id();
        assert_eq!(registry.len(), 1);

        drop(ticket);
        assert!(registry.is_empty());
        assert!(flag.is_cancelled());
        assert!(!registry.cancel(&id));
    }
}
