//! The pairing code currently shown to the user.
//!
//! One code is live at a time.  The acceptor reads it once per accepted
//! connection, so rotating the code affects only connections accepted after
//! the rotation.

use std::sync::{Arc, RwLock};

/// Shared slot holding the live pairing code.
#[derive(Debug, Clone)]
pub struct PairingCodeSlot {
    code: Arc<RwLock<String>>,
}

impl PairingCodeSlot {
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: Arc::new(RwLock::new(code.into())),
        }
    }

    pub fn current(&self) -> String {
        self.code
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Installs `code` as the live code.
    pub fn replace(&self, code: impl Into<String>) {
        *self
            .code
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = code.into();
    }
}
