//! Error statistics tracking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use log::info;
use strum::IntoEnumIterator;

use super::types::ErrorType;

/// Lock-free per-category error counters for a crawler run.
pub struct ErrorStats {
    counts: HashMap<ErrorType, AtomicUsize>,
}

impl ErrorStats {
    pub fn new() -> Self {
        Self {
            counts: ErrorType::iter()
                .map(|t| (t, AtomicUsize::new(0)))
                .collect(),
        }
    }

    pub fn increment(&self, error_type: ErrorType) {
        if let Some(count) = self.counts.get(&error_type) {
            count.fetch_add(1, Ordering::SeqCst);
        }
    }

    pub fn get_count(&self, error_type: ErrorType) -> usize {
        self.counts
            .get(&error_type)
            .map(|c| c.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Logs all non-zero counters, typically at shutdown.
    pub fn log_summary(&self) {
        let mut any = false;
        for error_type in ErrorType::iter() {
            let count = self.get_count(error_type);
            if count > 0 {
                if !any {
                    info!("Error counts:");
                    any = true;
                }
                info!("   {}: {}", error_type.as_str(), count);
            }
        }
    }
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self::new()
    }
}
