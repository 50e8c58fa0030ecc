//! # riskledger-engine
//!
//! The governing core. Resolves a profile's buckets for an execution, charges them
//! all-or-nothing through the bucket store, classifies each bucket into a severity
//! band, folds the band policies into one verdict, and records audit entries and
//! transition notifications.

pub mod band;
pub mod extend;
pub mod governor;
pub mod health;
pub mod ledger;
pub mod notify;
pub mod policy;
pub mod profile;
pub mod resolver;
pub mod verdict;

pub use band::classify;
pub use extend::AutoExtender;
pub use governor::{BandReading, Governor};
pub use health::{HealthSignals, StaticHealth};
pub use ledger::{BucketState, DEFAULT_STORE_TIMEOUT, Ledger, LedgerOutcome};
pub use notify::{ChannelRouter, EventBusSink, LogSink, NotificationSink, TransitionNotifier, WebhookSink};
pub use policy::{Directives, EffectivePolicy};
pub use profile::{Profile, ProfileRegistry};
pub use resolver::{BucketSelector, ResolvedBucket, resolve};
pub use verdict::{Extension, Verdict};
