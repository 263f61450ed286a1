//! Request counters exposed on `/metrics` in OpenMetrics text.

use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;

use domains::{SlotType, Validation};

pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct SlotLabels {
    pub slot: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub outcome: String,
}

pub struct ApiMetrics {
    registry: Registry,
    ads_served: Family<SlotLabels, Counter>,
    ads_unavailable: Family<SlotLabels, Counter>,
    rate_limited: Counter,
    token_validations: Family<OutcomeLabels, Counter>,
}

impl Default for ApiMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ApiMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let ads_served = Family::<SlotLabels, Counter>::default();
        let ads_unavailable = Family::<SlotLabels, Counter>::default();
        let rate_limited = Counter::default();
        let token_validations = Family::<OutcomeLabels, Counter>::default();

        // The text encoder appends `_total` to counter names.
        registry.register("ads_served", "Ads handed to game clients", ads_served.clone());
        registry.register(
            "ads_unavailable",
            "Ad requests with no eligible candidate",
            ads_unavailable.clone(),
        );
        registry.register("rate_limited", "Requests rejected by the rate limiter", rate_limited.clone());
        registry.register(
            "token_validations",
            "Game token checks by outcome",
            token_validations.clone(),
        );

        Self {
            registry,
            ads_served,
            ads_unavailable,
            rate_limited,
            token_validations,
        }
    }

    pub fn ad_served(&self, slot: SlotType) {
        self.ads_served.get_or_create(&slot_labels(slot)).inc();
    }

    pub fn ad_unavailable(&self, slot: SlotType) {
        self.ads_unavailable.get_or_create(&slot_labels(slot)).inc();
    }

    pub fn rate_limited(&self) {
        self.rate_limited.inc();
    }

    /// `None` records a validator failure.
    pub fn token_validation(&self, outcome: Option<&Validation>) {
        let outcome = match outcome {
            Some(Validation::Valid) => "valid",
            Some(Validation::Invalid { .. }) => "invalid",
            None => "error",
        };
        self.token_validations
            .get_or_create(&OutcomeLabels { outcome: outcome.to_string() })
            .inc();
    }

    pub fn render(&self) -> Result<String, std::fmt::Error> {
        let mut out = String::new();
        encode(&mut out, &self.registry)?;
        Ok(out)
    }
}

fn slot_labels(slot: SlotType) -> SlotLabels {
    SlotLabels { slot: slot.as_str().to_string() }
}
