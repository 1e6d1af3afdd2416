//! Mock secret bridge for testing
//!
//! Provides a scripted implementation of [`SecretBridge`] so scheduler
//! behavior can be tested without a real secret store. Configure expected
//! responses via builder methods, then assert on call counts and the
//! observed concurrency high-water mark.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{Entry, EntryId, SecretBridge};
use crate::error::{BridgeError, Result};

/// Mock bridge for tests.
///
/// # Example
/// ```ignore
/// let bridge = MockSecretBridge::new()
///     .with_entries(vec![entry("1", "GitHub")])
///     .await
///     .with_code("1", "123456")
///     .await;
///
/// let code = bridge.generate_code(&EntryId::new("1")).await?;
/// assert_eq!(code, "123456");
/// ```
pub struct MockSecretBridge {
    /// Entries returned from list_entries
    entries: Arc<Mutex<Vec<Entry>>>,
    /// Codes returned from generate_code, keyed by entry id
    codes: Arc<Mutex<HashMap<String, String>>>,
    /// Ids whose generate_code calls fail with InvalidSecret
    failing_ids: Arc<Mutex<HashMap<String, BridgeError>>>,
    /// Secret returned from decode_qr_image, None -> Decode error
    qr_secret: Arc<Mutex<Option<String>>>,
    /// Artificial latency applied to generate_code calls
    generate_latency: Arc<Mutex<Duration>>,
    /// Per-method call counters
    calls: Arc<Mutex<CallCounts>>,
    /// Currently outstanding generate_code calls
    in_flight: Arc<AtomicUsize>,
    /// Highest observed number of concurrent generate_code calls
    max_in_flight: Arc<AtomicUsize>,
}

/// Tracks bridge call counts for test verification
#[derive(Default, Debug, Clone)]
pub struct CallCounts {
    pub generate_code: usize,
    pub list_entries: usize,
    pub add_entry: usize,
    pub delete_entry: usize,
    pub rename_entry: usize,
    pub decode_qr_image: usize,
    /// generate_code calls broken down by entry id
    pub generate_by_id: HashMap<String, usize>,
}

impl Default for MockSecretBridge {
    fn default() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            codes: Arc::new(Mutex::new(HashMap::new())),
            failing_ids: Arc::new(Mutex::new(HashMap::new())),
            qr_secret: Arc::new(Mutex::new(None)),
            generate_latency: Arc::new(Mutex::new(Duration::ZERO)),
            calls: Arc::new(Mutex::new(CallCounts::default())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }
}

impl MockSecretBridge {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the entries returned by `list_entries`.
    pub async fn with_entries(self, entries: Vec<Entry>) -> Self {
        *self.entries.lock().await = entries;
        self
    }

    /// Script the code returned for an entry id.
    pub async fn with_code(self, id: impl Into<String>, code: impl Into<String>) -> Self {
        self.codes.lock().await.insert(id.into(), code.into());
        self
    }

    /// Make `generate_code` fail for an entry id.
    pub async fn with_failure(self, id: impl Into<String>, err: BridgeError) -> Self {
        self.failing_ids.lock().await.insert(id.into(), err);
        self
    }

    /// Script the secret returned by `decode_qr_image`.
    pub async fn with_qr_secret(self, secret: impl Into<String>) -> Self {
        *self.qr_secret.lock().await = Some(secret.into());
        self
    }

    /// Apply artificial latency to every `generate_code` call.
    pub async fn with_generate_latency(self, latency: Duration) -> Self {
        *self.generate_latency.lock().await = latency;
        self
    }

    /// Remove a scripted failure, as when the user fixes a broken entry.
    pub async fn clear_failure(&self, id: &str) {
        self.failing_ids.lock().await.remove(id);
    }

    /// Replace the scripted entry set after construction.
    pub async fn set_entries(&self, entries: Vec<Entry>) {
        let mut guard = self.entries.lock().await;
        *guard = entries;
    }

    /// Snapshot of call counts so far.
    pub async fn call_counts(&self) -> CallCounts {
        self.calls.lock().await.clone()
    }

    /// Highest number of generate_code calls ever outstanding at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Number of generate_code calls outstanding right now.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SecretBridge for MockSecretBridge {
    async fn generate_code(&self, id: &EntryId) -> Result<String> {
        {
            let mut calls = self.calls.lock().await;
            calls.generate_code += 1;
            *calls
                .generate_by_id
                .entry(id.as_str().to_string())
                .or_insert(0) += 1;
        }

        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);

        let latency = *self.generate_latency.lock().await;
        if latency > Duration::ZERO {
            tokio::time::sleep(latency).await;
        }

        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(err) = self.failing_ids.lock().await.get(id.as_str()) {
            return Err(err.clone().into());
        }

        let codes = self.codes.lock().await;
        match codes.get(id.as_str()) {
            Some(code) => Ok(code.clone()),
            None => Ok(format!("{:06}", id.as_str().len() * 111_111 % 1_000_000)),
        }
    }

    async fn list_entries(&self) -> Result<Vec<Entry>> {
        self.calls.lock().await.list_entries += 1;
        Ok(self.entries.lock().await.clone())
    }

    async fn add_entry(&self, name: &str, secret: &str) -> Result<()> {
        self.calls.lock().await.add_entry += 1;

        let mut entries = self.entries.lock().await;
        let id = EntryId::new(format!("mock-{}", entries.len() + 1));
        entries.push(Entry {
            id,
            name: name.to_string(),
            secret: secret.to_string(),
        });
        Ok(())
    }

    async fn delete_entry(&self, id: &EntryId) -> Result<()> {
        self.calls.lock().await.delete_entry += 1;

        let mut entries = self.entries.lock().await;
        let before = entries.len();
        entries.retain(|e| e.id != *id);
        if entries.len() == before {
            return Err(BridgeError::NotFound(id.to_string()).into());
        }
        Ok(())
    }

    async fn rename_entry(&self, id: &EntryId, new_name: &str) -> Result<()> {
        self.calls.lock().await.rename_entry += 1;

        let mut entries = self.entries.lock().await;
        match entries.iter_mut().find(|e| e.id == *id) {
            Some(entry) => {
                entry.name = new_name.to_string();
                Ok(())
            }
            None => Err(BridgeError::NotFound(id.to_string()).into()),
        }
    }

    async fn decode_qr_image(&self, _image: &[u8]) -> Result<String> {
        self.calls.lock().await.decode_qr_image += 1;

        match self.qr_secret.lock().await.clone() {
            Some(secret) => Ok(secret),
            None => Err(BridgeError::Decode("no QR code found in image".to_string()).into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, name: &str) -> Entry {
        Entry {
            id: EntryId::new(id),
            name: name.to_string(),
            secret: format!("secret-{id}"),
        }
    }

    #[tokio::test]
    async fn test_scripted_code() {
        let bridge = MockSecretBridge::new().with_code("1", "123456").await;

        let code = bridge.generate_code(&EntryId::new("1")).await.unwrap();
        assert_eq!(code, "123456");

        let counts = bridge.call_counts().await;
        assert_eq!(counts.generate_code, 1);
        assert_eq!(counts.generate_by_id.get("1"), Some(&1));
    }

    #[tokio::test]
    async fn test_scripted_failure() {
        let bridge = MockSecretBridge::new()
            .with_failure("bad", BridgeError::InvalidSecret("not base32".to_string()))
            .await;

        let result = bridge.generate_code(&EntryId::new("bad")).await;
        assert!(result.is_err());

        bridge.clear_failure("bad").await;
        let result = bridge.generate_code(&EntryId::new("bad")).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mutations_follow_reload_convention() {
        let bridge = MockSecretBridge::new().with_entries(vec![entry("1", "GitHub")]).await;

        bridge.add_entry("GitLab", "s").await.unwrap();
        let listed = bridge.list_entries().await.unwrap();
        assert_eq!(listed.len(), 2);

        bridge
            .rename_entry(&EntryId::new("1"), "Codeberg")
            .await
            .unwrap();
        let listed = bridge.list_entries().await.unwrap();
        assert_eq!(listed[0].name, "Codeberg");

        bridge.delete_entry(&EntryId::new("1")).await.unwrap();
        let listed = bridge.list_entries().await.unwrap();
        assert_eq!(listed.len(), 1);
    }

    #[tokio::test]
    async fn test_delete_unknown_entry_fails() {
        let bridge = MockSecretBridge::new();
        let result = bridge.delete_entry(&EntryId::new("ghost")).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_qr_decode_without_script_fails() {
        let bridge = MockSecretBridge::new();
        let result = bridge.decode_qr_image(&[0u8; 4]).await;
        assert!(result.is_err());

        let bridge = MockSecretBridge::new().with_qr_secret("JBSWY3DP").await;
        let secret = bridge.decode_qr_image(&[0u8; 4]).await.unwrap();
        assert_eq!(secret, "JBSWY3DP");
    }

    #[tokio::test]
    async fn test_in_flight_tracking() {
        let bridge = Arc::new(
            MockSecretBridge::new()
                .with_generate_latency(Duration::from_millis(20))
                .await,
        );

        let mut handles = Vec::new();
        for i in 0..4 {
            let b = bridge.clone();
            handles.push(tokio::spawn(async move {
                b.generate_code(&EntryId::new(format!("{i}"))).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(bridge.max_in_flight() >= 2);
        assert_eq!(bridge.in_flight(), 0);
    }
}
