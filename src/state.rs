//! Shared application state.
//!
//! DESIGN
//! ======
//! `AppState` wires one backend, one rate limiter and one result cache into
//! a single orchestrator, and owns the background sweep task. Clone is
//! cheap; every field is Arc-wrapped.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinHandle;
use tracing::info;

use crate::backend::AnalysisBackend;
use crate::backend::ProcessInvoker;
use crate::cache::ResultCache;
use crate::config::GatewayConfig;
use crate::rate_limit::RateLimiter;
use crate::services::orchestrator::AnalysisOrchestrator;
use crate::services::sweep;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub orchestrator: Arc<AnalysisOrchestrator>,
    sweeper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl AppState {
    /// State backed by the external analysis CLI described in `config`.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let backend = Arc::new(ProcessInvoker::new(config.invoker.clone()));
        Self::with_backend(config, backend)
    }

    #[must_use]
    pub fn with_backend(config: GatewayConfig, backend: Arc<dyn AnalysisBackend>) -> Self {
        let orchestrator = AnalysisOrchestrator::new(
            backend,
            RateLimiter::new(config.rate_limit),
            ResultCache::new(),
            config.defaults,
        );
        Self { config: Arc::new(config), orchestrator: Arc::new(orchestrator), sweeper: Arc::new(Mutex::new(None)) }
    }

    /// Start the background sweep. A running sweep is left in place.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_sweeper(&self) {
        let mut slot = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return;
        }
        *slot = Some(sweep::spawn_sweep_task(
            self.orchestrator.cache().clone(),
            self.orchestrator.limiter().clone(),
            self.config.sweep_interval,
        ));
    }

    #[must_use]
    pub fn sweeper_running(&self) -> bool {
        self.sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Stop the sweep and shut the orchestrator down.
    pub fn shutdown(&self) {
        if let Some(handle) = self.sweeper.lock().unwrap_or_else(PoisonError::into_inner).take() {
            handle.abort();
        }
        self.orchestrator.shutdown();
        info!("state: shut down");
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================

#[cfg(test)]
pub mod test_helpers {
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;
    use crate::backend::types::{AnalysisRequest, AnalysisResponse, BackendError, InvokerStatus, Recommendation};

    /// Successful response with the given analysis text.
    #[must_use]
    pub fn ok_response(analysis: &str) -> AnalysisResponse {
        AnalysisResponse {
            success: true,
            analysis: Some(analysis.into()),
            confidence: Some(70.0),
            recommendation: Some(Recommendation::Hold),
            execution_time_ms: Some(5),
            ..AnalysisResponse::default()
        }
    }

    /// Backend that replays scripted results, then succeeds with "done".
    pub struct ScriptedBackend {
        script: Mutex<VecDeque<Result<AnalysisResponse, BackendError>>>,
        calls: AtomicUsize,
        available: bool,
        initialized: AtomicBool,
    }

    impl ScriptedBackend {
        #[must_use]
        pub fn new(script: Vec<Result<AnalysisResponse, BackendError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                available: true,
                initialized: AtomicBool::new(false),
            }
        }

        /// A backend whose probe always fails.
        #[must_use]
        pub fn unavailable() -> Self {
            Self { available: false, ..Self::new(vec![]) }
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl AnalysisBackend for ScriptedBackend {
        async fn initialize(&self) -> Result<(), BackendError> {
            if !self.available {
                return Err(BackendError::ProbeFailed("`mock` is not runnable".into()));
            }
            self.initialized.store(true, Ordering::SeqCst);
            Ok(())
        }

        async fn analyze(&self, _request: &AnalysisRequest) -> Result<AnalysisResponse, BackendError> {
            if !self.initialized.load(Ordering::SeqCst) {
                return Err(BackendError::NotInitialized);
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| Ok(ok_response("done")))
        }

        fn status(&self) -> InvokerStatus {
            InvokerStatus { initialized: self.initialized.load(Ordering::SeqCst), pending_requests: 0 }
        }

        fn shutdown(&self) {
            self.initialized.store(false, Ordering::SeqCst);
        }
    }

    /// State over a scripted backend with default config.
    #[must_use]
    pub fn test_app_state(backend: Arc<ScriptedBackend>) -> AppState {
        AppState::with_backend(GatewayConfig::default(), backend)
    }
}

#[cfg(test)]
#[path = "state_test.rs"]
mod tests;
