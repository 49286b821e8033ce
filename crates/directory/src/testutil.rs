//! Test collaborators and factories for directory tests.
//!
//! Feature-gated behind `testutil`.
//!
//! ```toml
//! [dev-dependencies]
//! identity-directory = { path = "../directory", features = ["testutil"] }
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use async_trait::async_trait;
use identity_directory_storage::{MemoryBackend, StorageBackend};
use parking_lot::Mutex;

use crate::{
    config::{DirectoryConfig, ScatterMode},
    credentials::{HashError, PasswordHasher},
    directory::{Directory, Notifier, NotifyError, SignUp},
    model::{NewProfile, TokenPurpose},
    service::ProfileService,
};

/// Reversible stand-in for a real password hasher: `hash("pw")` is
/// `"fake$pw"`.
#[derive(Debug, Default)]
pub struct FakeHasher {
    failing: AtomicBool,
}

impl FakeHasher {
    /// Creates a working hasher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent `hash` call fail.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

impl PasswordHasher for FakeHasher {
    fn hash(&self, plaintext: &str) -> Result<String, HashError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(HashError("injected hashing failure".into()));
        }
        Ok(format!("fake${plaintext}"))
    }

    fn verify(&self, plaintext: &str, hash: &str) -> bool {
        hash.strip_prefix("fake$") == Some(plaintext)
    }
}

/// A link handed to [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentLink {
    /// Which workflow the link belongs to.
    pub purpose: TokenPurpose,
    /// Recipient.
    pub email: String,
    /// Token carried by the link.
    pub token: String,
}

/// Notifier that records every link instead of delivering it.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentLink>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent delivery fail.
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// All links recorded so far, oldest first.
    #[must_use]
    pub fn sent(&self) -> Vec<SentLink> {
        self.sent.lock().clone()
    }

    /// The most recent link for `purpose` sent to `email`.
    #[must_use]
    pub fn last_token(&self, purpose: TokenPurpose, email: &str) -> Option<String> {
        self.sent
            .lock()
            .iter()
            .rev()
            .find(|link| link.purpose == purpose && link.email == email)
            .map(|link| link.token.clone())
    }

    fn record(&self, purpose: TokenPurpose, email: &str, token: &str) -> Result<(), NotifyError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("injected delivery failure".into()));
        }
        self.sent.lock().push(SentLink {
            purpose,
            email: email.to_owned(),
            token: token.to_owned(),
        });
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn registration_link(&self, email: &str, token: &str) -> Result<(), NotifyError> {
        self.record(TokenPurpose::Registration, email, token)
    }

    async fn restore_password_link(&self, email: &str, token: &str) -> Result<(), NotifyError> {
        self.record(TokenPurpose::RestorePassword, email, token)
    }
}

/// A [`Directory`] with handles on its test collaborators.
pub struct TestDirectory<B> {
    /// The directory under test.
    pub directory: Directory<B>,
    /// Its service, also reachable via [`Directory::profiles`].
    pub service: Arc<ProfileService<B>>,
    /// Its hasher.
    pub hasher: Arc<FakeHasher>,
    /// Its notifier.
    pub notifier: Arc<RecordingNotifier>,
}

/// Creates `count` empty in-memory partitions.
#[must_use]
pub fn memory_partitions(count: usize) -> Vec<MemoryBackend> {
    (0..count).map(|_| MemoryBackend::new()).collect()
}

/// Builds a [`ProfileService`] over `backends` with the given scatter mode.
///
/// # Panics
///
/// Panics if `backends` is empty.
#[must_use]
pub fn service_over<B: StorageBackend + 'static>(
    backends: Vec<B>,
    scatter_mode: ScatterMode,
) -> ProfileService<B> {
    let config = DirectoryConfig::builder()
        .partition_count(backends.len())
        .scatter_mode(scatter_mode)
        .build()
        .expect("valid test config");
    ProfileService::new(&config, backends).expect("service")
}

/// Builds a [`Directory`] over `backends` with fake collaborators.
#[must_use]
pub fn directory_over<B: StorageBackend + 'static>(
    backends: Vec<B>,
    scatter_mode: ScatterMode,
) -> TestDirectory<B> {
    let service = Arc::new(service_over(backends, scatter_mode));
    let hasher = Arc::new(FakeHasher::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let directory = Directory::new(
        Arc::clone(&service),
        Arc::clone(&hasher) as Arc<dyn PasswordHasher>,
        Arc::clone(&notifier) as Arc<dyn Notifier>,
    );
    TestDirectory { directory, service, hasher, notifier }
}

/// Builds a [`Directory`] over `partitions` fresh in-memory partitions.
#[must_use]
pub fn memory_directory(partitions: usize) -> TestDirectory<MemoryBackend> {
    directory_over(memory_partitions(partitions), ScatterMode::Sequential)
}

/// A [`NewProfile`] whose login and email derive from `external_id`.
#[must_use]
pub fn new_profile(external_id: &str) -> NewProfile {
    NewProfile::builder()
        .external_id(external_id)
        .login(external_id)
        .email(format!("{external_id}@example.com"))
        .password_hash("fake$secret")
        .build()
}

/// A [`SignUp`] request whose login and email derive from `external_id`,
/// with password `"secret"`.
#[must_use]
pub fn sign_up_request(external_id: &str) -> SignUp {
    SignUp::builder()
        .external_id(external_id)
        .login(external_id)
        .email(format!("{external_id}@example.com"))
        .password("secret")
        .build()
}
