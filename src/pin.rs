//! Certificate pinning.
//!
//! A pin is the base64-encoded SHA-256 digest of a certificate's
//! SubjectPublicKeyInfo (the HPKP `pin-sha256` format), so a pin survives
//! certificate renewal as long as the key is kept.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha2::{Digest, Sha256};

use crate::error::PinError;
use crate::verify::PeerCertificate;

/// `pin-sha256` of a DER-encoded SubjectPublicKeyInfo.
pub fn spki_pin(spki_der: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(spki_der))
}

/// Trusted public-key identities for one `host:port`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PinManager {
    pins: HashSet<String>,
}

impl PinManager {
    /// Create a manager from `pin-sha256` values.
    pub fn new<I, S>(pins: I) -> Result<Self, PinError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut manager = Self::default();
        for pin in pins {
            manager.add_pin(pin.as_ref())?;
        }
        Ok(manager)
    }

    /// Pin every certificate of a chain.
    pub fn from_certificates<'a, I>(certs: I) -> Self
    where
        I: IntoIterator<Item = &'a PeerCertificate>,
    {
        Self {
            pins: certs.into_iter().map(|c| c.spki_pin()).collect(),
        }
    }

    /// Add one `pin-sha256` value. Returns whether it was new.
    pub fn add_pin(&mut self, pin: &str) -> Result<bool, PinError> {
        let pin = pin.trim();
        let pin = pin.strip_prefix("sha256/").unwrap_or(pin);
        match STANDARD.decode(pin) {
            Ok(digest) if digest.len() == 32 => Ok(self.pins.insert(pin.to_string())),
            _ => Err(PinError::InvalidPin(pin.to_string())),
        }
    }

    /// True if `cert`'s public key is pinned.
    pub fn verify(&self, cert: &PeerCertificate) -> bool {
        self.pins.contains(&cert.spki_pin())
    }

    pub fn pins(&self) -> impl Iterator<Item = &str> {
        self.pins.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.pins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pins.is_empty()
    }
}

/// Pin managers keyed by `host:port`, shared by every in-flight attempt of a
/// session.
#[derive(Debug, Default)]
pub struct PinRegistry {
    managers: RwLock<HashMap<String, Arc<PinManager>>>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Manager registered for `addr`.
    pub fn get(&self, addr: &str) -> Option<Arc<PinManager>> {
        self.managers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(addr)
            .cloned()
    }

    pub fn contains(&self, addr: &str) -> bool {
        self.managers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(addr)
    }

    /// Register `manager` for `addr`, replacing any previous one.
    pub fn insert(&self, addr: impl Into<String>, manager: PinManager) {
        self.managers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(addr.into(), Arc::new(manager));
    }

    /// Register `manager` unless another attempt registered one first.
    /// Returns the manager now in effect.
    pub fn insert_if_absent(&self, addr: &str, manager: PinManager) -> Arc<PinManager> {
        self.managers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(addr.to_string())
            .or_insert_with(|| Arc::new(manager))
            .clone()
    }

    /// Add pins to the manager for `addr`, creating it if needed.
    pub fn add_pins<I, S>(&self, addr: &str, pins: I) -> Result<(), PinError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut guard = self.managers.write().unwrap_or_else(|e| e.into_inner());
        let mut manager = guard
            .get(addr)
            .map(|m| PinManager::clone(m))
            .unwrap_or_default();
        for pin in pins {
            manager.add_pin(pin.as_ref())?;
        }
        guard.insert(addr.to_string(), Arc::new(manager));
        Ok(())
    }

    /// Remove the manager for `addr`.
    pub fn remove(&self, addr: &str) -> Option<Arc<PinManager>> {
        self.managers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(addr)
    }

    /// Fail-fast check run before any handshake byte is sent: a registered
    /// manager with no pins can never accept a chain.
    pub fn precheck(&self, addr: &str) -> Result<(), PinError> {
        match self.get(addr) {
            Some(manager) if manager.is_empty() => Err(PinError::EmptyPinSet(addr.to_string())),
            _ => Ok(()),
        }
    }
}
