//! Phase gate
//!
//! Tools carry a phase number; clients only see tools whose phase is at or
//! below the runtime-configurable current phase. The exposed name set is
//! cached and rebuilt when the phase changes.

use std::collections::BTreeSet;
use std::sync::RwLock;
use tracing::info;

use crate::error::{EngineError, Result};
use crate::mcp::tool::ToolRegistry;

pub struct PhaseGate {
    max_phase: u8,
    current: RwLock<u8>,
    cache: RwLock<Option<(u8, BTreeSet<&'static str>)>>,
}

impl PhaseGate {
    pub fn new(current_phase: u8, max_phase: u8) -> Result<Self> {
        if current_phase < 1 || current_phase > max_phase {
            return Err(EngineError::InvalidInput(format!(
                "phase must be in 1..={max_phase}, got {current_phase}"
            )));
        }
        Ok(Self {
            max_phase,
            current: RwLock::new(current_phase),
            cache: RwLock::new(None),
        })
    }

    pub fn current_phase(&self) -> u8 {
        *self.current.read().expect("phase lock poisoned")
    }

    /// Change the phase; rejects values outside `1..=max_phase` and
    /// invalidates the exposure cache.
    pub fn set_phase(&self, phase: u8) -> Result<()> {
        if phase < 1 || phase > self.max_phase {
            return Err(EngineError::InvalidInput(format!(
                "phase must be in 1..={}, got {phase}",
                self.max_phase
            )));
        }
        *self.current.write().expect("phase lock poisoned") = phase;
        *self.cache.write().expect("phase cache poisoned") = None;
        info!(phase, "phase changed");
        Ok(())
    }

    /// Whether a tool name is exposed at the current phase.
    pub fn is_exposed(&self, registry: &ToolRegistry, name: &str) -> bool {
        let phase = self.current_phase();

        {
            let cache = self.cache.read().expect("phase cache poisoned");
            if let Some((cached_phase, names)) = cache.as_ref() {
                if *cached_phase == phase {
                    return names.contains(name);
                }
            }
        }

        let names: BTreeSet<&'static str> = registry.names_for_phase(phase).into_iter().collect();
        let exposed = names.contains(name);
        *self.cache.write().expect("phase cache poisoned") = Some((phase, names));
        exposed
    }

    /// Sorted names exposed at the current phase.
    pub fn exposed(&self, registry: &ToolRegistry) -> Vec<&'static str> {
        let phase = self.current_phase();
        // Reuse / refresh the cache through is_exposed's fill path
        let _ = self.is_exposed(registry, "");
        let cache = self.cache.read().expect("phase cache poisoned");
        match cache.as_ref() {
            Some((cached_phase, names)) if *cached_phase == phase => {
                names.iter().copied().collect()
            }
            _ => registry.names_for_phase(phase),
        }
    }
}
