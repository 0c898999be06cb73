//! Invalidation planning.
//!
//! Translates server events into cache operations. The mapping is a static
//! table per topic: list keys are invalidated unconditionally, entity keys
//! when the payload names an entity, and entity keys are evicted when the
//! action is `deleted`. Plans for several events merge with deduplication.

use std::collections::HashSet;
use std::fmt;

use serde_json::Value;
use uuid::Uuid;

use super::events::{
    AdPayload, BattlePassPayload, ChapterPayload, EventAction, ReceivedEvent, RolePayload,
    SeriesPayload, ServerEvent, SettingsPayload, SubscriptionPayload, SystemPayload, UserPayload,
};
use super::keys::QueryKey;

const ADMIN_ADS: &str = "/api/admin/ads";
const ADS: &str = "/api/ads";
const ADS_PLACEMENT: &str = "/api/ads/placement";
const SERIES: &str = "/api/series";
const ADMIN_SERIES: &str = "/api/admin/series";
const SECTIONS: &str = "/api/sections";
const TRENDING: &str = "/api/trending";
const ADMIN_CHAPTERS: &str = "/api/admin/chapters";
const CHAPTERS: &str = "/api/chapters";
const SETTINGS: &str = "/api/settings";
const ADMIN_SETTINGS: &str = "/api/admin/settings";
const AD_INTENSITY: &str = "ad-intensity";
const ADMIN_USERS: &str = "/api/admin/users";
const USERS: &str = "/api/users";
const CURRENT_USER: &str = "/api/user";
const AUTH_USER: &str = "/api/auth/user";
const SUBSCRIPTIONS: &str = "/api/subscriptions";
const ADMIN_SUBSCRIPTIONS: &str = "/api/admin/subscriptions";
const SHOP: &str = "/api/shop";
const BATTLE_PASS: &str = "/api/battle-pass";
const ADMIN_BATTLE_PASS: &str = "/api/admin/battle-pass";
const BATTLE_PASS_SEASONS: &str = "/api/battle-pass/seasons";
const FLASH_SALES: &str = "/api/flash-sales";
const ADMIN_FLASH_SALES: &str = "/api/admin/flash-sales";
const ADMIN_COUPONS: &str = "/api/admin/coupons";
const COUPONS: &str = "/api/coupons";
const ADMIN_PACKAGES: &str = "/api/admin/packages";
const ADMIN_BUNDLES: &str = "/api/admin/bundles";
const PACKAGES: &str = "/api/packages";
const ADMIN_ROLES: &str = "/api/admin/roles";
const ROLES: &str = "/api/roles";
const CURRENCY: &str = "/api/currency";
const ADMIN_CURRENCY: &str = "/api/admin/currency";
const WALLET: &str = "/api/wallet";

/// One cache operation. Keys are prefixes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheOp {
    Invalidate(QueryKey),
    Evict(QueryKey),
    InvalidateAll,
}

/// A `system` event destined for the notification channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemNotice {
    pub kind: Option<String>,
    pub title: Option<String>,
    pub message: Option<String>,
    pub payload: Value,
}

impl From<&SystemPayload> for SystemNotice {
    fn from(payload: &SystemPayload) -> Self {
        Self {
            kind: payload.kind.clone(),
            title: payload.title.clone(),
            message: payload.message.clone(),
            payload: payload.raw.clone(),
        }
    }
}

/// Ordered, deduplicated cache operations for one or more events.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidationPlan {
    invalidate_keys: Vec<QueryKey>,
    evict_keys: Vec<QueryKey>,
    invalidate_all: bool,
    notices: Vec<SystemNotice>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "InvalidationPlan {{ invalidate: {}, evict: {}, invalidate_all: {}, notices: {} }}",
            self.invalidate_keys.len(),
            self.evict_keys.len(),
            self.invalidate_all,
            self.notices.len(),
        )
    }
}

impl InvalidationPlan {
    /// The plan for a single event.
    pub fn for_event(event: &ServerEvent) -> Self {
        let mut plan = Self::default();
        match event {
            ServerEvent::Ad(payload) => plan.ad(payload),
            ServerEvent::Series(payload) => plan.series(payload),
            ServerEvent::Chapter(payload) => plan.chapter(payload),
            ServerEvent::Settings(payload) => plan.settings(payload),
            ServerEvent::AdIntensity(_) => {
                plan.invalidate([SETTINGS, "ads"]);
                plan.invalidate([ADS]);
                plan.invalidate([AD_INTENSITY]);
            }
            ServerEvent::User(payload) => plan.user(payload),
            ServerEvent::Subscription(payload) => plan.subscription(payload),
            ServerEvent::BattlePass(payload) => plan.battle_pass(payload),
            ServerEvent::FlashSale(_) => {
                plan.invalidate([FLASH_SALES]);
                plan.invalidate([ADMIN_FLASH_SALES]);
                plan.invalidate([SHOP]);
            }
            ServerEvent::Coupon(_) => {
                plan.invalidate([ADMIN_COUPONS]);
                plan.invalidate([COUPONS]);
            }
            ServerEvent::Package(_) => {
                plan.invalidate([ADMIN_PACKAGES]);
                plan.invalidate([ADMIN_BUNDLES]);
                plan.invalidate([PACKAGES]);
                plan.invalidate([SHOP]);
            }
            ServerEvent::Role(payload) => plan.role(payload),
            ServerEvent::Currency(_) => {
                plan.invalidate([CURRENCY]);
                plan.invalidate([ADMIN_CURRENCY]);
                plan.invalidate([WALLET]);
            }
            ServerEvent::System(payload) => {
                if payload.is_maintenance() {
                    plan.invalidate_all = true;
                }
                plan.notices.push(SystemNotice::from(payload));
            }
            ServerEvent::Unknown { .. } => {}
        }
        plan
    }

    /// Merge the plans of a batch of events.
    ///
    /// Events are deduplicated by receipt id, operations by key.
    pub fn from_events(events: &[ReceivedEvent]) -> Self {
        let mut seen: HashSet<Uuid> = HashSet::new();
        let mut plan = Self::default();
        for received in events.iter().filter(|received| seen.insert(received.id)) {
            plan.merge(Self::for_event(&received.event));
        }
        plan
    }

    pub fn merge(&mut self, other: InvalidationPlan) {
        for key in other.invalidate_keys {
            self.push_invalidate(key);
        }
        for key in other.evict_keys {
            self.push_evict(key);
        }
        self.invalidate_all |= other.invalidate_all;
        self.notices.extend(other.notices);
    }

    /// Operations in execution order: invalidations, then the global flush,
    /// then evictions.
    pub fn ops(&self) -> Vec<CacheOp> {
        let mut ops: Vec<CacheOp> = self
            .invalidate_keys
            .iter()
            .cloned()
            .map(CacheOp::Invalidate)
            .collect();
        if self.invalidate_all {
            ops.push(CacheOp::InvalidateAll);
        }
        ops.extend(self.evict_keys.iter().cloned().map(CacheOp::Evict));
        ops
    }

    pub fn invalidations(&self) -> &[QueryKey] {
        &self.invalidate_keys
    }

    pub fn evictions(&self) -> &[QueryKey] {
        &self.evict_keys
    }

    pub fn is_global(&self) -> bool {
        self.invalidate_all
    }

    pub fn notices(&self) -> &[SystemNotice] {
        &self.notices
    }

    pub fn is_empty(&self) -> bool {
        self.invalidate_keys.is_empty()
            && self.evict_keys.is_empty()
            && !self.invalidate_all
            && self.notices.is_empty()
    }

    // ------------------------------------------------------------------------
    // Per-topic rules
    // ------------------------------------------------------------------------

    fn ad(&mut self, payload: &AdPayload) {
        self.invalidate([ADMIN_ADS]);
        self.invalidate([ADS]);
        if let Some(ad_id) = payload.ad_id.as_deref() {
            self.invalidate([ADMIN_ADS, ad_id]);
            self.evict_if_deleted(payload.action.as_ref(), [ADMIN_ADS, ad_id]);
        }
        if let Some(placement) = payload.placement() {
            self.invalidate([ADS_PLACEMENT, placement]);
        }
    }

    fn series(&mut self, payload: &SeriesPayload) {
        self.invalidate([SERIES]);
        self.invalidate([ADMIN_SERIES]);
        self.invalidate([SECTIONS]);
        self.invalidate([TRENDING]);
        if let Some(series_id) = payload.series_id.as_deref() {
            self.invalidate([SERIES, series_id]);
            self.evict_if_deleted(payload.action.as_ref(), [SERIES, series_id]);
        }
    }

    fn chapter(&mut self, payload: &ChapterPayload) {
        if let Some(series_id) = payload.series_id.as_deref() {
            self.invalidate([SERIES, series_id, "chapters"]);
            self.invalidate([ADMIN_CHAPTERS, series_id]);
        }
        if let Some(chapter_id) = payload.chapter_id.as_deref() {
            self.invalidate([CHAPTERS, chapter_id]);
            self.evict_if_deleted(payload.action.as_ref(), [CHAPTERS, chapter_id]);
        }
    }

    fn settings(&mut self, payload: &SettingsPayload) {
        self.invalidate([SETTINGS]);
        self.invalidate([ADMIN_SETTINGS]);
        if let Some(category) = payload.category.as_deref() {
            self.invalidate([SETTINGS, category]);
        }
    }

    fn user(&mut self, payload: &UserPayload) {
        self.invalidate([ADMIN_USERS]);
        self.invalidate([USERS]);
        if let Some(user_id) = payload.user_id.as_deref() {
            self.invalidate([USERS, user_id]);
            self.identity();
            self.evict_if_deleted(payload.action.as_ref(), [USERS, user_id]);
        }
    }

    fn subscription(&mut self, payload: &SubscriptionPayload) {
        self.invalidate([SUBSCRIPTIONS]);
        self.invalidate([ADMIN_SUBSCRIPTIONS]);
        self.invalidate([SHOP]);
        if let Some(package_id) = payload.package_id.as_deref() {
            self.invalidate([SUBSCRIPTIONS, package_id]);
            self.evict_if_deleted(payload.action.as_ref(), [SUBSCRIPTIONS, package_id]);
        }
    }

    fn battle_pass(&mut self, payload: &BattlePassPayload) {
        self.invalidate([BATTLE_PASS]);
        self.invalidate([ADMIN_BATTLE_PASS]);
        if let Some(season_id) = payload.season_id.as_deref() {
            self.invalidate([BATTLE_PASS_SEASONS, season_id]);
            self.evict_if_deleted(payload.action.as_ref(), [BATTLE_PASS_SEASONS, season_id]);
        }
    }

    fn role(&mut self, payload: &RolePayload) {
        self.invalidate([ADMIN_ROLES]);
        self.invalidate([ROLES]);
        if payload.action == Some(EventAction::PermissionsUpdated) {
            self.identity();
        }
    }

    /// The signed-in viewer's own session keys.
    fn identity(&mut self) {
        self.invalidate([CURRENT_USER]);
        self.invalidate([AUTH_USER]);
    }

    fn evict_if_deleted<const N: usize>(&mut self, action: Option<&EventAction>, key: [&str; N]) {
        if action.is_some_and(EventAction::is_deleted) {
            self.push_evict(QueryKey::from(key));
        }
    }

    fn invalidate<const N: usize>(&mut self, key: [&str; N]) {
        self.push_invalidate(QueryKey::from(key));
    }

    fn push_invalidate(&mut self, key: QueryKey) {
        if !self.invalidate_keys.contains(&key) {
            self.invalidate_keys.push(key);
        }
    }

    fn push_evict(&mut self, key: QueryKey) {
        if !self.evict_keys.contains(&key) {
            self.evict_keys.push(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn plan(topic: &str, payload: Value) -> InvalidationPlan {
        InvalidationPlan::for_event(&ServerEvent::from_parts(topic, payload))
    }

    #[test]
    fn series_update_invalidates_lists_and_entity() {
        let plan = plan("series", json!({"seriesId": "s1", "action": "updated"}));

        assert_eq!(
            plan.ops(),
            vec![
                CacheOp::Invalidate(QueryKey::from(["/api/series"])),
                CacheOp::Invalidate(QueryKey::from(["/api/admin/series"])),
                CacheOp::Invalidate(QueryKey::from(["/api/sections"])),
                CacheOp::Invalidate(QueryKey::from(["/api/trending"])),
                CacheOp::Invalidate(QueryKey::from(["/api/series", "s1"])),
            ]
        );
        assert!(plan.evictions().is_empty());
    }

    #[test]
    fn delete_evicts_after_invalidating() {
        let plan = plan("chapter", json!({"chapterId": "c9", "action": "deleted"}));

        assert_eq!(
            plan.ops(),
            vec![
                CacheOp::Invalidate(QueryKey::from(["/api/chapters", "c9"])),
                CacheOp::Evict(QueryKey::from(["/api/chapters", "c9"])),
            ]
        );
    }

    #[test]
    fn delete_without_id_never_evicts() {
        let plan = plan("series", json!({"action": "deleted"}));
        assert!(plan.evictions().is_empty());
        assert_eq!(plan.invalidations().len(), 4);
    }

    #[test]
    fn role_permissions_update_touches_identity() {
        let updated = plan("role", json!({"action": "permissions_updated"}));
        assert!(
            updated
                .invalidations()
                .contains(&QueryKey::from(["/api/auth/user"]))
        );

        let created = plan("role", json!({"action": "created"}));
        assert!(
            !created
                .invalidations()
                .contains(&QueryKey::from(["/api/auth/user"]))
        );
    }

    #[test]
    fn maintenance_flushes_everything_and_notifies() {
        let plan = plan("system", json!({"type": "maintenance", "message": "Back soon"}));

        assert!(plan.is_global());
        assert_eq!(plan.ops(), vec![CacheOp::InvalidateAll]);
        assert_eq!(plan.notices().len(), 1);
        assert_eq!(plan.notices()[0].message.as_deref(), Some("Back soon"));
    }

    #[test]
    fn other_system_events_only_notify() {
        let plan = plan("system", json!({"type": "announcement"}));

        assert!(plan.ops().is_empty());
        assert_eq!(plan.notices().len(), 1);
        assert!(!plan.is_empty());
    }

    #[test]
    fn unknown_topic_yields_empty_plan() {
        assert!(plan("poll", json!({"id": 1})).is_empty());
    }

    #[test]
    fn merge_deduplicates_keys() {
        let events = vec![
            ReceivedEvent::new(ServerEvent::from_parts("flashsale", json!({}))),
            ReceivedEvent::new(ServerEvent::from_parts("package", json!({}))),
        ];
        let plan = InvalidationPlan::from_events(&events);

        let shop = QueryKey::from(["/api/shop"]);
        let shop_ops = plan
            .ops()
            .into_iter()
            .filter(|op| *op == CacheOp::Invalidate(shop.clone()))
            .count();
        assert_eq!(shop_ops, 1);
        assert_eq!(plan.invalidations().len(), 6);
    }

    #[test]
    fn duplicate_deliveries_are_collapsed() {
        let event = ReceivedEvent::new(ServerEvent::from_parts(
            "system",
            json!({"type": "announcement"}),
        ));
        let plan = InvalidationPlan::from_events(&[event.clone(), event]);
        assert_eq!(plan.notices().len(), 1);
    }

    #[test]
    fn display_format() {
        let plan = InvalidationPlan::default();
        let display = format!("{}", plan);
        assert!(display.contains("InvalidationPlan"));
        assert!(display.contains("invalidate: 0"));
    }
}
