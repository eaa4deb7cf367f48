//! Optional lazy-initialized image-to-text extractor. (spec §4.5, §9)

use tokio::sync::Mutex;

/// Pluggable OCR backend. The crate ships a `NullOcrEngine` so the
/// pipeline is fully testable without a real vision backend linked in;
/// a concrete engine can be wired in later behind the same trait.
pub trait OcrEngine: Send + Sync {
    fn extract(&self, path: &str) -> Option<String>;
}

pub struct NullOcrEngine;

impl OcrEngine for NullOcrEngine {
    fn extract(&self, _path: &str) -> Option<String> {
        None
    }
}

enum EngineState {
    Uninitialized,
    Available(Box<dyn OcrEngine>),
    Unavailable,
}

/// Wraps an `OcrEngine` with one-shot, mutex-guarded lazy init. Not
/// required to be concurrent-safe on its own (spec §5); callers
/// (the Orchestrator) serialize `extract` calls through this adapter.
pub struct OcrAdapter {
    state: Mutex<EngineState>,
    factory: Box<dyn Fn() -> Option<Box<dyn OcrEngine>> + Send + Sync>,
}

impl OcrAdapter {
    pub fn new<F>(factory: F) -> Self
    where
        F: Fn() -> Option<Box<dyn OcrEngine>> + Send + Sync + 'static,
    {
        Self { state: Mutex::new(EngineState::Uninitialized), factory: Box::new(factory) }
    }

    /// No engine configured: `available()` is always false and
    /// `extract()` always `None`.
    pub fn disabled() -> Self {
        Self::new(|| None)
    }

    pub async fn available(&self) -> bool {
        self.ensure_init().await;
        matches!(*self.state.lock().await, EngineState::Available(_))
    }

    pub async fn extract(&self, path: &str) -> Option<String> {
        self.ensure_init().await;
        let guard = self.state.lock().await;
        match &*guard {
            EngineState::Available(engine) => engine.extract(path),
            _ => None,
        }
    }

    async fn ensure_init(&self) {
        let mut guard = self.state.lock().await;
        if let EngineState::Uninitialized = *guard {
            *guard = match (self.factory)() {
                Some(engine) => EngineState::Available(engine),
                None => EngineState::Unavailable,
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_adapter_is_never_available() {
        let adapter = OcrAdapter::disabled();
        assert!(!adapter.available().await);
        assert_eq!(adapter.extract("x.png").await, None);
    }

    struct EchoEngine;
    impl OcrEngine for EchoEngine {
        fn extract(&self, path: &str) -> Option<String> {
            Some(format!("text-from:{path}"))
        }
    }

    #[tokio::test]
    async fn lazy_init_only_runs_once_and_then_serves() {
        let adapter = OcrAdapter::new(|| Some(Box::new(EchoEngine) as Box<dyn OcrEngine>));
        assert!(adapter.available().await);
        assert_eq!(adapter.extract("a.png").await, Some("text-from:a.png".to_string()));
        assert_eq!(adapter.extract("b.png").await, Some("text-from:b.png".to_string()));
    }
}
