use std::sync::Arc;

use domains::RateLimiter;
use services::{AdSelector, EngagementRecorder, RequestContext, TokenTrustCache};

use crate::metrics::ApiMetrics;

/// Shared by every handler; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub selector: Arc<AdSelector>,
    pub engagement: Arc<EngagementRecorder>,
    pub trust: Arc<TokenTrustCache>,
    pub limiter: Arc<dyn RateLimiter>,
    pub metrics: Arc<ApiMetrics>,
    /// Origin used when synthesizing image URLs.
    pub public_domain: Arc<str>,
}

impl AppState {
    pub fn context(&self) -> RequestContext {
        RequestContext::new(self.public_domain.as_ref())
    }
}
