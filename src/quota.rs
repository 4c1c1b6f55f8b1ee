//! Build-credit accounting
//!
//! Every build consumes one credit. The decrement must be atomic: two builds
//! started at the same moment by the same user must not both read "1 credit
//! left" and both proceed. The in-memory ledger uses a compare-and-swap loop
//! on a per-user atomic counter, the same way the token bucket consumes
//! tokens.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::RwLock;

/// Error type for quota operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuotaError {
    #[error("Insufficient credits for user {0}")]
    InsufficientFunds(String),
    #[error("Unknown user {0}")]
    UnknownUser(String),
}

/// Account state visible to the builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub user_id: String,
    pub available_credits: u64,
}

/// Quota/accounting backend
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, QuotaError>;

    /// Atomically consume one credit
    async fn decrement_credits(&self, user_id: &str) -> Result<(), QuotaError>;

    /// Give a credit back (build rejected before any work happened)
    async fn refund_credit(&self, user_id: &str) -> Result<(), QuotaError>;
}

/// In-memory ledger with lock-free per-user counters
pub struct InMemoryQuota {
    accounts: RwLock<HashMap<String, Arc<AtomicU64>>>,
    /// Credits granted to users seen for the first time (`None` = unknown users rejected)
    default_credits: Option<u64>,
}

impl InMemoryQuota {
    pub fn new(default_credits: Option<u64>) -> Self {
        Self {
            accounts: RwLock::new(HashMap::new()),
            default_credits,
        }
    }

    pub async fn set_credits(&self, user_id: &str, credits: u64) {
        let mut accounts = self.accounts.write().await;
        match accounts.get(user_id) {
            Some(counter) => counter.store(credits, Ordering::SeqCst),
            None => {
                accounts.insert(user_id.to_string(), Arc::new(AtomicU64::new(credits)));
            }
        }
    }

    async fn counter(&self, user_id: &str) -> Result<Arc<AtomicU64>, QuotaError> {
        if let Some(counter) = self.accounts.read().await.get(user_id) {
            return Ok(counter.clone());
        }
        let credits = self
            .default_credits
            .ok_or_else(|| QuotaError::UnknownUser(user_id.to_string()))?;
        let mut accounts = self.accounts.write().await;
        Ok(accounts
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(credits)))
            .clone())
    }
}

#[async_trait]
impl QuotaLedger for InMemoryQuota {
    async fn get_user_profile(&self, user_id: &str) -> Result<UserProfile, QuotaError> {
        let counter = self.counter(user_id).await?;
        Ok(UserProfile {
            user_id: user_id.to_string(),
            available_credits: counter.load(Ordering::SeqCst),
        })
    }

    async fn decrement_credits(&self, user_id: &str) -> Result<(), QuotaError> {
        let counter = self.counter(user_id).await?;
        loop {
            let current = counter.load(Ordering::Relaxed);
            if current == 0 {
                return Err(QuotaError::InsufficientFunds(user_id.to_string()));
            }
            match counter.compare_exchange(current, current - 1, Ordering::SeqCst, Ordering::Relaxed) {
                Ok(_) => return Ok(()),
                Err(_) => continue, // Another session got there first, retry
            }
        }
    }

    async fn refund_credit(&self, user_id: &str) -> Result<(), QuotaError> {
        let counter = self.counter(user_id).await?;
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_decrement_until_empty() {
        let quota = InMemoryQuota::new(None);
        quota.set_credits("u1", 2).await;

        quota.decrement_credits("u1").await.unwrap();
        quota.decrement_credits("u1").await.unwrap();
        assert_eq!(
            quota.decrement_credits("u1").await,
            Err(QuotaError::InsufficientFunds("u1".into()))
        );
        assert_eq!(quota.get_user_profile("u1").await.unwrap().available_credits, 0);
    }

    #[tokio::test]
    async fn test_unknown_user_rejected_without_default() {
        let quota = InMemoryQuota::new(None);
        assert!(matches!(
            quota.get_user_profile("ghost").await,
            Err(QuotaError::UnknownUser(_))
        ));
    }

    #[tokio::test]
    async fn test_default_grant() {
        let quota = InMemoryQuota::new(Some(3));
        assert_eq!(quota.get_user_profile("new").await.unwrap().available_credits, 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_decrements_never_overdraw() {
        let quota = Arc::new(InMemoryQuota::new(None));
        quota.set_credits("u1", 10).await;

        let mut handles = Vec::new();
        for _ in 0..50 {
            let quota = quota.clone();
            handles.push(tokio::spawn(async move { quota.decrement_credits("u1").await.is_ok() }));
        }
        let mut granted = 0;
        for h in handles {
            if h.await.unwrap() {
                granted += 1;
            }
        }

        assert_eq!(granted, 10);
        assert_eq!(quota.get_user_profile("u1").await.unwrap().available_credits, 0);
    }
}
