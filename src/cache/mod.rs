//! Client-side query cache.
//!
//! - `store`: the shared key/value cache with freshness, versions and
//!   in-flight fetch tracking
//! - `events`: decoded server pushes
//! - `planner`: the static event → cache operation table
//! - `consumer`: applies plans to a cache handle

mod consumer;
mod events;
mod keys;
mod lock;
mod planner;
mod store;

pub(crate) use lock::lock as mutex_lock;

pub use consumer::{ApplyReport, CacheConsumer};
pub use events::{
    AdDetails, AdIntensityPayload, AdPayload, BattlePassPayload, ChapterPayload, EventAction,
    GenericPayload, ReceivedEvent, RolePayload, SeriesPayload, ServerEvent, SettingsPayload,
    SubscriptionPayload, SystemPayload, Topic, UserPayload,
};
pub use keys::QueryKey;
pub use planner::{CacheOp, InvalidationPlan, SystemNotice};
pub use store::{
    CacheChange, CacheEntry, CacheError, FetchTicket, Freshness, QueryCache, RestoreOutcome,
    Snapshot, Version,
};
