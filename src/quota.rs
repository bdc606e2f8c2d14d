//! Storage quota
//!
//! The upload engine reads the cached snapshot for its pre-flight check and
//! asks for a refresh after every successful upload. It never writes quota
//! state itself.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::api::{ApiClient, ApiError, QuotaDto};

/// Bytes used and allowed for the current user
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QuotaSnapshot {
    pub used: u64,
    pub limit: u64,
    pub tier_name: String,
}

impl QuotaSnapshot {
    pub fn new(used: u64, limit: u64) -> Self {
        Self {
            used,
            limit,
            tier_name: String::new(),
        }
    }

    /// Whether a file of `size` bytes fits in the remaining space
    pub fn allows(&self, size: u64) -> bool {
        size <= self.limit
            && self
                .used
                .checked_add(size)
                .is_some_and(|total| total <= self.limit)
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.used)
    }

    /// Used share of the limit, 0 to 100; 0 while the limit is unknown
    pub fn usage_percent(&self) -> u8 {
        if self.limit == 0 {
            return 0;
        }
        let pct = (self.used as f64 / self.limit as f64 * 100.0).round();
        pct.min(100.0) as u8
    }
}

impl From<QuotaDto> for QuotaSnapshot {
    fn from(dto: QuotaDto) -> Self {
        Self {
            used: dto.used,
            limit: dto.limit,
            tier_name: dto.tier_name,
        }
    }
}

/// Source of quota information
#[async_trait]
pub trait QuotaProvider: Send + Sync {
    /// Last known quota, without I/O
    fn snapshot(&self) -> QuotaSnapshot;

    /// Reload the quota from its source and cache it
    async fn refresh(&self) -> Result<QuotaSnapshot, ApiError>;
}

/// Quota read from `GET /api/user/quotas`
pub struct HttpQuotaProvider {
    client: Arc<ApiClient>,
    cached: RwLock<QuotaSnapshot>,
}

impl HttpQuotaProvider {
    /// The cache starts empty (`limit` 0) until the first refresh
    pub fn new(client: Arc<ApiClient>) -> Self {
        Self {
            client,
            cached: RwLock::new(QuotaSnapshot::default()),
        }
    }
}

#[async_trait]
impl QuotaProvider for HttpQuotaProvider {
    fn snapshot(&self) -> QuotaSnapshot {
        self.cached.read().clone()
    }

    async fn refresh(&self) -> Result<QuotaSnapshot, ApiError> {
        let snapshot = match self.client.fetch_quota().await {
            Ok(dto) => QuotaSnapshot::from(dto),
            // The server answers 404 while the user owns no files
            Err(ApiError::Status { status: 404, .. }) => {
                let cached = self.cached.read();
                QuotaSnapshot {
                    used: 0,
                    limit: cached.limit,
                    tier_name: cached.tier_name.clone(),
                }
            }
            Err(e) => return Err(e),
        };

        tracing::debug!(
            used = snapshot.used,
            limit = snapshot.limit,
            tier = %snapshot.tier_name,
            "Quota refreshed"
        );
        *self.cached.write() = snapshot.clone();
        Ok(snapshot)
    }
}

/// Fixed in-memory quota
#[derive(Debug, Default)]
pub struct StaticQuota {
    snapshot: RwLock<QuotaSnapshot>,
}

impl StaticQuota {
    pub fn new(used: u64, limit: u64) -> Self {
        Self {
            snapshot: RwLock::new(QuotaSnapshot::new(used, limit)),
        }
    }

    /// No effective limit
    pub fn unlimited() -> Self {
        Self::new(0, u64::MAX)
    }

    pub fn set(&self, snapshot: QuotaSnapshot) {
        *self.snapshot.write() = snapshot;
    }
}

#[async_trait]
impl QuotaProvider for StaticQuota {
    fn snapshot(&self) -> QuotaSnapshot {
        self.snapshot.read().clone()
    }

    async fn refresh(&self) -> Result<QuotaSnapshot, ApiError> {
        Ok(self.snapshot())
    }
}
