//! Common test utilities shared across integration tests.

#![allow(dead_code, missing_docs)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use inboxkit_core::{
    AccountIdentity, Authorization, ClientOptions, EncryptionKey, Environment, IdentityNetwork,
    Installation, Namespace, NetworkError, Signer, SignerError, SignerKind,
};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use url::Url;

pub fn temp_root() -> tempfile::TempDir {
    tempfile::tempdir().expect("create temp dir")
}

pub fn options(root: &Path, env: Environment) -> ClientOptions {
    ClientOptions::default()
        .with_env(env)
        .with_db_directory(root)
}

pub fn key(byte: u8) -> EncryptionKey {
    EncryptionKey::from_bytes([byte; 32])
}

pub fn random_ethereum_identity() -> AccountIdentity {
    let mut address = [0u8; 20];
    OsRng.fill_bytes(&mut address);
    AccountIdentity::ethereum_str(&hex::encode(address)).expect("identity")
}

/// Signer with scripted behaviour that counts its calls.
pub struct TestSigner {
    identity: AccountIdentity,
    kind: SignerKind,
    failure: Option<SignerError>,
    delay: Duration,
    calls: AtomicUsize,
}

impl TestSigner {
    pub fn new(identity: AccountIdentity) -> Self {
        Self {
            identity,
            kind: SignerKind::Eoa,
            failure: None,
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn random() -> Self {
        Self::new(random_ethereum_identity())
    }

    pub fn failing(mut self, failure: SignerError) -> Self {
        self.failure = Some(failure);
        self
    }

    pub fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn smart_contract(mut self, chain_id: u64) -> Self {
        self.kind = SignerKind::SmartContract {
            chain_id,
            block_number: None,
        };
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Signer for TestSigner {
    fn identity(&self) -> AccountIdentity {
        self.identity.clone()
    }

    fn kind(&self) -> SignerKind {
        self.kind
    }

    async fn sign_message(&self, message: &[u8]) -> Result<Vec<u8>, SignerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(Sha256::digest(message).to_vec()),
        }
    }
}

/// Network double that records every call and fails on request.
#[derive(Default)]
pub struct RecordingNetwork {
    calls: Mutex<Vec<String>>,
    fail_register: bool,
    fail_validate: bool,
}

impl RecordingNetwork {
    pub fn failing_register() -> Self {
        Self {
            fail_register: true,
            ..Self::default()
        }
    }

    pub fn failing_validate() -> Self {
        Self {
            fail_validate: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl IdentityNetwork for RecordingNetwork {
    async fn register_installation(
        &self,
        namespace: &Namespace,
        _installation: &Installation,
        _authorization: &Authorization,
    ) -> Result<(), NetworkError> {
        self.record(format!("register {}", namespace.remote_endpoint));
        if self.fail_register {
            return Err(NetworkError::Unreachable {
                endpoint: namespace.remote_endpoint.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(())
    }

    async fn validate_installation(
        &self,
        _namespace: &Namespace,
        installation: &Installation,
    ) -> Result<(), NetworkError> {
        self.record(format!("validate {}", installation.installation_id()));
        if self.fail_validate {
            return Err(NetworkError::Verification("unknown installation".to_string()));
        }
        Ok(())
    }

    async fn request_history_sync(
        &self,
        endpoint: &Url,
        _installation: &Installation,
    ) -> Result<(), NetworkError> {
        self.record(format!("history_sync {endpoint}"));
        Ok(())
    }
}

/// Network double whose calls never complete.
#[derive(Default)]
pub struct HangingNetwork;

impl IdentityNetwork for HangingNetwork {
    async fn register_installation(
        &self,
        _namespace: &Namespace,
        _installation: &Installation,
        _authorization: &Authorization,
    ) -> Result<(), NetworkError> {
        std::future::pending().await
    }

    async fn validate_installation(
        &self,
        _namespace: &Namespace,
        _installation: &Installation,
    ) -> Result<(), NetworkError> {
        std::future::pending().await
    }

    async fn request_history_sync(
        &self,
        _endpoint: &Url,
        _installation: &Installation,
    ) -> Result<(), NetworkError> {
        std::future::pending().await
    }
}
