//! Fault injection for deterministic testing
//!
//! TigerStyle: explicit fault types, probabilistic injection.

use crate::rng::DeterministicRng;
use naiad_core::io::RngProvider;
use std::sync::atomic::{AtomicU64, Ordering};

/// Faults the simulation providers know how to inject.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FaultType {
    /// Graph store write operation fails
    GraphWriteFail,
    /// Graph store read operation fails
    GraphReadFail,
    /// Structured LLM call fails outright
    LlmFailure,
    /// Structured LLM call times out
    LlmTimeout,
    /// LLM returns a payload the schema rejects
    LlmMalformedPayload,
    /// Embedding call fails
    EmbeddingFailure,
}

impl FaultType {
    /// Human-readable name for this fault type.
    pub fn name(&self) -> &'static str {
        match self {
            FaultType::GraphWriteFail => "graph_write_fail",
            FaultType::GraphReadFail => "graph_read_fail",
            FaultType::LlmFailure => "llm_failure",
            FaultType::LlmTimeout => "llm_timeout",
            FaultType::LlmMalformedPayload => "llm_malformed_payload",
            FaultType::EmbeddingFailure => "embedding_failure",
        }
    }
}

/// Configuration for a fault injection rule.
#[derive(Debug, Clone)]
pub struct FaultConfig {
    /// The type of fault to inject
    pub fault_type: FaultType,
    /// Probability of injection (0.0 - 1.0)
    pub probability: f64,
    /// Optional substring filter on operation names
    pub operation_filter: Option<String>,
    /// Only trigger after this many operations
    pub after_operations: u64,
    /// Maximum number of times to trigger
    pub max_triggers: Option<u64>,
}

impl FaultConfig {
    /// Create a new fault configuration.
    pub fn new(fault_type: FaultType, probability: f64) -> Self {
        debug_assert!(
            (0.0..=1.0).contains(&probability),
            "probability must be in [0, 1]"
        );

        Self {
            fault_type,
            probability,
            operation_filter: None,
            after_operations: 0,
            max_triggers: None,
        }
    }

    /// Restrict to operations whose name contains `filter`.
    pub fn with_filter(mut self, filter: impl Into<String>) -> Self {
        self.operation_filter = Some(filter.into());
        self
    }

    /// Wait this many operations before becoming eligible.
    pub fn after(mut self, operations: u64) -> Self {
        self.after_operations = operations;
        self
    }

    /// Cap the number of triggers.
    pub fn max_triggers(mut self, max: u64) -> Self {
        self.max_triggers = Some(max);
        self
    }
}

/// Fault injector shared by the simulation providers.
#[derive(Debug)]
pub struct FaultInjector {
    faults: Vec<FaultState>,
    rng: DeterministicRng,
    operation_count: AtomicU64,
}

#[derive(Debug)]
struct FaultState {
    config: FaultConfig,
    trigger_count: AtomicU64,
}

impl FaultInjector {
    /// Create a fault injector with no rules.
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            faults: Vec::new(),
            rng,
            operation_count: AtomicU64::new(0),
        }
    }

    /// Register a fault rule.
    pub fn register(&mut self, config: FaultConfig) {
        self.faults.push(FaultState {
            config,
            trigger_count: AtomicU64::new(0),
        });
    }

    /// Check whether a fault fires for the given operation.
    pub fn should_inject(&self, operation: &str) -> Option<FaultType> {
        let op_count = self.operation_count.fetch_add(1, Ordering::SeqCst);

        for fault_state in &self.faults {
            let config = &fault_state.config;

            if let Some(filter) = &config.operation_filter {
                if !operation.contains(filter.as_str()) {
                    continue;
                }
            }

            if op_count < config.after_operations {
                continue;
            }

            let trigger_count = fault_state.trigger_count.load(Ordering::SeqCst);
            if let Some(max) = config.max_triggers {
                if trigger_count >= max {
                    continue;
                }
            }

            if self.rng.gen_bool(config.probability) {
                fault_state.trigger_count.fetch_add(1, Ordering::SeqCst);

                tracing::debug!(
                    fault = config.fault_type.name(),
                    operation = operation,
                    trigger_count = trigger_count + 1,
                    "injecting fault"
                );

                return Some(config.fault_type.clone());
            }
        }

        None
    }

    /// Total number of operations observed.
    pub fn operation_count(&self) -> u64 {
        self.operation_count.load(Ordering::SeqCst)
    }

    /// Per-rule statistics.
    pub fn stats(&self) -> Vec<FaultStats> {
        self.faults
            .iter()
            .map(|state| FaultStats {
                fault_type: state.config.fault_type.name().to_string(),
                probability: state.config.probability,
                trigger_count: state.trigger_count.load(Ordering::SeqCst),
            })
            .collect()
    }
}

/// Statistics for one registered fault rule.
#[derive(Debug, Clone)]
pub struct FaultStats {
    pub fault_type: String,
    pub probability: f64,
    pub trigger_count: u64,
}

/// Builder for a [`FaultInjector`] with multiple rules.
pub struct FaultInjectorBuilder {
    rng: DeterministicRng,
    faults: Vec<FaultConfig>,
}

impl FaultInjectorBuilder {
    pub fn new(rng: DeterministicRng) -> Self {
        Self {
            rng,
            faults: Vec::new(),
        }
    }

    /// Add a fault rule.
    pub fn with_fault(mut self, config: FaultConfig) -> Self {
        self.faults.push(config);
        self
    }

    /// Add read+write graph store faults at the given probability.
    pub fn with_graph_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::GraphWriteFail, probability))
            .with_fault(FaultConfig::new(FaultType::GraphReadFail, probability))
    }

    /// Add LLM faults at the given probability.
    pub fn with_llm_faults(self, probability: f64) -> Self {
        self.with_fault(FaultConfig::new(FaultType::LlmFailure, probability))
            .with_fault(FaultConfig::new(FaultType::LlmTimeout, probability / 2.0))
    }

    pub fn build(self) -> FaultInjector {
        let mut injector = FaultInjector::new(self.rng);
        for config in self.faults {
            injector.register(config);
        }
        injector
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_injection_certain() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::GraphWriteFail, 1.0));

        for _ in 0..10 {
            assert!(injector.should_inject("upsert_entity").is_some());
        }
    }

    #[test]
    fn test_fault_injection_never() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::GraphWriteFail, 0.0));

        for _ in 0..100 {
            assert!(injector.should_inject("upsert_entity").is_none());
        }
    }

    #[test]
    fn test_fault_injection_filter() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::LlmFailure, 1.0).with_filter("extract"));

        assert!(injector.should_inject("llm_extract").is_some());
        assert!(injector.should_inject("llm_merge").is_none());
    }

    #[test]
    fn test_fault_injection_max_triggers() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::EmbeddingFailure, 1.0).max_triggers(2));

        assert!(injector.should_inject("embed").is_some());
        assert!(injector.should_inject("embed").is_some());
        assert!(injector.should_inject("embed").is_none());
    }

    #[test]
    fn test_fault_injection_after() {
        let mut injector = FaultInjector::new(DeterministicRng::new(42));
        injector.register(FaultConfig::new(FaultType::GraphReadFail, 1.0).after(3));

        assert!(injector.should_inject("read").is_none());
        assert!(injector.should_inject("read").is_none());
        assert!(injector.should_inject("read").is_none());
        assert!(injector.should_inject("read").is_some());
    }

    #[test]
    fn test_builder() {
        let injector = FaultInjectorBuilder::new(DeterministicRng::new(42))
            .with_graph_faults(0.1)
            .with_llm_faults(0.05)
            .build();

        assert_eq!(injector.stats().len(), 4);
    }
}
