//! Feature engineering for stage forecasting
//!
//! - `manifest`: the versioned slot layout shared with training
//! - `guard`: leakage allow-list, enforced while a manifest is defined
//! - `transformer`: observation + history window -> feature vector

pub mod guard;
pub mod manifest;
pub mod transformer;

pub use guard::{AllowEntry, LeakageGuard, LeakageViolation, ALLOW_LIST};
pub use manifest::{
    CalendarFeature, FeatureDefinition, FeatureKind, FeatureManifest, ManifestBuilder,
    ManifestError, PublishedManifest, V1_VERSION, V1_WIDTH,
};
pub use transformer::{FeatureTransformer, FeatureVector, SlotStatus};
