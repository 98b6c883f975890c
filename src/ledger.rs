//! Subscription and class-pack credit ledgers.
//!
//! Both are external collaborators of the booking engine. The in-memory
//! implementations keep each check-and-debit inside one critical section so
//! a balance can never be spent twice.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use utoipa::ToSchema;

use crate::error::BookingError;
use crate::models::{
    BalanceId, ClassPackId, ClassType, GymClass, GymClassId, MemberId, Money, OrderId,
    SubscriptionId, TenantId, TenantOwned,
};

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("{0} not found")]
    NotFound(String),
    #[error("class pack balance {0} has no classes remaining")]
    InsufficientCredits(BalanceId),
    #[error("subscription {0} has no classes remaining")]
    NoClassesRemaining(SubscriptionId),
    #[error("{0}")]
    Unusable(String),
    #[error("refund would exceed the {purchased} classes purchased on balance {balance}")]
    OverRefund { balance: BalanceId, purchased: u32 },
}

impl From<LedgerError> for BookingError {
    fn from(value: LedgerError) -> Self {
        match value {
            LedgerError::NotFound(what) => BookingError::NotFound(what),
            LedgerError::OverRefund { .. } => BookingError::State(value.to_string()),
            other => BookingError::Validation(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SubscriptionStatus {
    Active,
    Frozen,
    Cancelled,
    Expired,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub tenant_id: TenantId,
    pub member_id: MemberId,
    pub status: SubscriptionStatus,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// `None` means unlimited classes.
    pub classes_remaining: Option<u32>,
}

impl Subscription {
    pub fn is_active(&self, today: NaiveDate) -> bool {
        self.status == SubscriptionStatus::Active && today >= self.start_date && today <= self.end_date
    }

    pub fn has_classes_available(&self) -> bool {
        self.classes_remaining.is_none_or(|remaining| remaining > 0)
    }

    pub fn use_class(&mut self) -> Result<(), LedgerError> {
        match self.classes_remaining {
            None => Ok(()),
            Some(0) => Err(LedgerError::NoClassesRemaining(self.id)),
            Some(remaining) => {
                self.classes_remaining = Some(remaining - 1);
                Ok(())
            }
        }
    }

    pub fn refund_class(&mut self) {
        if let Some(remaining) = self.classes_remaining {
            self.classes_remaining = Some(remaining + 1);
        }
    }
}

impl TenantOwned for Subscription {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

#[async_trait]
pub trait SubscriptionLedger: Send + Sync {
    async fn find_active_by_member(
        &self,
        member_id: MemberId,
        today: NaiveDate,
    ) -> Result<Option<Subscription>, LedgerError>;
    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, LedgerError>;
    async fn use_class(&self, id: SubscriptionId) -> Result<Subscription, LedgerError>;
    async fn refund_class(&self, id: SubscriptionId) -> Result<Subscription, LedgerError>;
}

#[derive(Debug, Default)]
pub struct MemorySubscriptionLedger {
    subscriptions: Mutex<HashMap<SubscriptionId, Subscription>>,
}

impl MemorySubscriptionLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, subscription: Subscription) {
        self.subscriptions
            .lock()
            .await
            .insert(subscription.id, subscription);
    }
}

#[async_trait]
impl SubscriptionLedger for MemorySubscriptionLedger {
    async fn find_active_by_member(
        &self,
        member_id: MemberId,
        today: NaiveDate,
    ) -> Result<Option<Subscription>, LedgerError> {
        let subscriptions = self.subscriptions.lock().await;
        Ok(subscriptions
            .values()
            .filter(|sub| sub.member_id == member_id && sub.is_active(today))
            .max_by_key(|sub| sub.end_date)
            .cloned())
    }

    async fn subscription(&self, id: SubscriptionId) -> Result<Option<Subscription>, LedgerError> {
        Ok(self.subscriptions.lock().await.get(&id).cloned())
    }

    async fn use_class(&self, id: SubscriptionId) -> Result<Subscription, LedgerError> {
        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("subscription {id}")))?;
        subscription.use_class()?;
        Ok(subscription.clone())
    }

    async fn refund_class(&self, id: SubscriptionId) -> Result<Subscription, LedgerError> {
        let mut subscriptions = self.subscriptions.lock().await;
        let subscription = subscriptions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("subscription {id}")))?;
        subscription.refund_class();
        Ok(subscription.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClassPackStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ClassPack {
    pub id: ClassPackId,
    pub tenant_id: TenantId,
    pub name: String,
    pub class_count: u32,
    pub price: Money,
    pub validity_days: Option<u32>,
    /// Empty together with `valid_class_types` means any class.
    pub valid_class_ids: Vec<GymClassId>,
    pub valid_class_types: Vec<ClassType>,
    pub status: ClassPackStatus,
}

impl TenantOwned for ClassPack {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl ClassPack {
    pub fn is_valid_for_class(&self, gym_class: &GymClass) -> bool {
        if self.valid_class_ids.is_empty() && self.valid_class_types.is_empty() {
            return true;
        }
        self.valid_class_ids.contains(&gym_class.id)
            || self.valid_class_types.contains(&gym_class.class_type)
    }

    fn expiry_from(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.validity_days
            .map(|days| now + Duration::days(i64::from(days)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BalanceStatus {
    Active,
    Expired,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct MemberClassPackBalance {
    pub id: BalanceId,
    pub tenant_id: TenantId,
    pub member_id: MemberId,
    pub class_pack_id: ClassPackId,
    pub classes_purchased: u32,
    pub classes_remaining: u32,
    pub purchased_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub order_id: Option<OrderId>,
    pub status: BalanceStatus,
}

/// Result of returning a credit to a balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefundOutcome {
    Restored { remaining: u32 },
    /// The balance was cancelled; the credit is not returned.
    Forfeited,
}

impl TenantOwned for MemberClassPackBalance {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

impl MemberClassPackBalance {
    pub fn grant(member_id: MemberId, pack: &ClassPack, now: DateTime<Utc>) -> Self {
        Self {
            id: BalanceId::new(),
            tenant_id: pack.tenant_id,
            member_id,
            class_pack_id: pack.id,
            classes_purchased: pack.class_count,
            classes_remaining: pack.class_count,
            purchased_at: now,
            expires_at: pack.expiry_from(now),
            order_id: None,
            status: BalanceStatus::Active,
        }
    }

    pub fn from_purchase(
        member_id: MemberId,
        pack: &ClassPack,
        order_id: OrderId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            order_id: Some(order_id),
            ..Self::grant(member_id, pack, now)
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.status == BalanceStatus::Expired || self.expires_at.is_some_and(|at| at <= now)
    }

    pub fn can_use_credit(&self, now: DateTime<Utc>) -> bool {
        self.status == BalanceStatus::Active && self.classes_remaining > 0 && !self.is_expired(now)
    }

    pub fn use_class(&mut self, now: DateTime<Utc>) -> Result<(), LedgerError> {
        if self.status == BalanceStatus::Cancelled {
            return Err(LedgerError::Unusable(format!(
                "class pack balance {} is cancelled",
                self.id
            )));
        }
        if self.is_expired(now) {
            return Err(LedgerError::Unusable(format!(
                "class pack balance {} has expired",
                self.id
            )));
        }
        if self.classes_remaining == 0 {
            return Err(LedgerError::InsufficientCredits(self.id));
        }
        self.classes_remaining -= 1;
        Ok(())
    }

    pub fn refund_class(&mut self) -> Result<RefundOutcome, LedgerError> {
        if self.status == BalanceStatus::Cancelled {
            return Ok(RefundOutcome::Forfeited);
        }
        if self.classes_remaining >= self.classes_purchased {
            return Err(LedgerError::OverRefund {
                balance: self.id,
                purchased: self.classes_purchased,
            });
        }
        self.classes_remaining += 1;
        Ok(RefundOutcome::Restored {
            remaining: self.classes_remaining,
        })
    }
}

#[async_trait]
pub trait ClassPackLedger: Send + Sync {
    async fn save_pack(&self, pack: ClassPack) -> Result<ClassPack, LedgerError>;
    async fn pack(&self, id: ClassPackId) -> Result<Option<ClassPack>, LedgerError>;
    async fn save_balance(
        &self,
        balance: MemberClassPackBalance,
    ) -> Result<MemberClassPackBalance, LedgerError>;
    async fn find_balance(
        &self,
        id: BalanceId,
    ) -> Result<Option<MemberClassPackBalance>, LedgerError>;
    /// Usable balances: active, unexpired, with credits left.
    async fn find_active_by_member(
        &self,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberClassPackBalance>, LedgerError>;
    async fn use_class(
        &self,
        id: BalanceId,
        now: DateTime<Utc>,
    ) -> Result<MemberClassPackBalance, LedgerError>;
    async fn refund_class(&self, id: BalanceId) -> Result<RefundOutcome, LedgerError>;
    async fn cancel_balance(&self, id: BalanceId) -> Result<MemberClassPackBalance, LedgerError>;
    /// Marks active balances past their expiry as expired.
    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<BalanceId>, LedgerError>;
}

#[derive(Debug, Default)]
struct PackTables {
    packs: HashMap<ClassPackId, ClassPack>,
    balances: HashMap<BalanceId, MemberClassPackBalance>,
}

#[derive(Debug, Default)]
pub struct MemoryClassPackLedger {
    tables: Mutex<PackTables>,
}

impl MemoryClassPackLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClassPackLedger for MemoryClassPackLedger {
    async fn save_pack(&self, pack: ClassPack) -> Result<ClassPack, LedgerError> {
        self.tables.lock().await.packs.insert(pack.id, pack.clone());
        Ok(pack)
    }

    async fn pack(&self, id: ClassPackId) -> Result<Option<ClassPack>, LedgerError> {
        Ok(self.tables.lock().await.packs.get(&id).cloned())
    }

    async fn save_balance(
        &self,
        balance: MemberClassPackBalance,
    ) -> Result<MemberClassPackBalance, LedgerError> {
        self.tables
            .lock()
            .await
            .balances
            .insert(balance.id, balance.clone());
        Ok(balance)
    }

    async fn find_balance(
        &self,
        id: BalanceId,
    ) -> Result<Option<MemberClassPackBalance>, LedgerError> {
        Ok(self.tables.lock().await.balances.get(&id).cloned())
    }

    async fn find_active_by_member(
        &self,
        member_id: MemberId,
        now: DateTime<Utc>,
    ) -> Result<Vec<MemberClassPackBalance>, LedgerError> {
        let tables = self.tables.lock().await;
        let mut balances: Vec<MemberClassPackBalance> = tables
            .balances
            .values()
            .filter(|balance| balance.member_id == member_id && balance.can_use_credit(now))
            .cloned()
            .collect();
        // Soonest-expiring first, open-ended last.
        balances.sort_by_key(|balance| (balance.expires_at.is_none(), balance.expires_at));
        Ok(balances)
    }

    async fn use_class(
        &self,
        id: BalanceId,
        now: DateTime<Utc>,
    ) -> Result<MemberClassPackBalance, LedgerError> {
        let mut tables = self.tables.lock().await;
        let balance = tables
            .balances
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("class pack balance {id}")))?;
        balance.use_class(now)?;
        info!(
            balance_id = %id,
            remaining = balance.classes_remaining,
            "Class pack credit used"
        );
        Ok(balance.clone())
    }

    async fn refund_class(&self, id: BalanceId) -> Result<RefundOutcome, LedgerError> {
        let mut tables = self.tables.lock().await;
        let balance = tables
            .balances
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("class pack balance {id}")))?;
        let outcome = balance.refund_class()?;
        info!(balance_id = %id, ?outcome, "Class pack credit refunded");
        Ok(outcome)
    }

    async fn cancel_balance(&self, id: BalanceId) -> Result<MemberClassPackBalance, LedgerError> {
        let mut tables = self.tables.lock().await;
        let balance = tables
            .balances
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("class pack balance {id}")))?;
        balance.status = BalanceStatus::Cancelled;
        Ok(balance.clone())
    }

    async fn expire_due(&self, now: DateTime<Utc>) -> Result<Vec<BalanceId>, LedgerError> {
        let mut tables = self.tables.lock().await;
        let mut expired = Vec::new();
        for balance in tables.balances.values_mut() {
            if balance.status == BalanceStatus::Active
                && balance.expires_at.is_some_and(|at| at <= now)
            {
                balance.status = BalanceStatus::Expired;
                expired.push(balance.id);
            }
        }
        Ok(expired)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn pack(class_count: u32) -> ClassPack {
        ClassPack {
            id: ClassPackId::new(),
            tenant_id: TenantId::new(),
            name: "Ten Rides".to_string(),
            class_count,
            price: Money::new(50_000, "SAR"),
            validity_days: Some(30),
            valid_class_ids: Vec::new(),
            valid_class_types: Vec::new(),
            status: ClassPackStatus::Active,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 12, 1, 8, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_balance_never_goes_negative() {
        let ledger = MemoryClassPackLedger::new();
        let balance = MemberClassPackBalance::grant(MemberId::new(), &pack(1), now());
        ledger.save_balance(balance.clone()).await.unwrap();

        let used = ledger.use_class(balance.id, now()).await.unwrap();
        assert_eq!(used.classes_remaining, 0);

        let err = ledger.use_class(balance.id, now()).await.unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientCredits(_)));
        assert!(matches!(BookingError::from(err), BookingError::Validation(_)));
    }

    #[tokio::test]
    async fn test_refund_is_capped_at_purchased_count() {
        let ledger = MemoryClassPackLedger::new();
        let balance = MemberClassPackBalance::grant(MemberId::new(), &pack(2), now());
        ledger.save_balance(balance.clone()).await.unwrap();

        ledger.use_class(balance.id, now()).await.unwrap();
        assert_eq!(
            ledger.refund_class(balance.id).await.unwrap(),
            RefundOutcome::Restored { remaining: 2 }
        );
        let err = ledger.refund_class(balance.id).await.unwrap_err();
        assert!(matches!(err, LedgerError::OverRefund { .. }));
    }

    #[tokio::test]
    async fn test_refund_to_cancelled_balance_is_forfeited() {
        let ledger = MemoryClassPackLedger::new();
        let balance = MemberClassPackBalance::grant(MemberId::new(), &pack(2), now());
        ledger.save_balance(balance.clone()).await.unwrap();
        ledger.use_class(balance.id, now()).await.unwrap();
        ledger.cancel_balance(balance.id).await.unwrap();

        assert_eq!(
            ledger.refund_class(balance.id).await.unwrap(),
            RefundOutcome::Forfeited
        );
    }

    #[tokio::test]
    async fn test_expire_due_only_touches_lapsed_active_balances() {
        let ledger = MemoryClassPackLedger::new();
        let member = MemberId::new();
        let lapsed = MemberClassPackBalance::grant(member, &pack(5), now() - Duration::days(40));
        let fresh = MemberClassPackBalance::grant(member, &pack(5), now());
        ledger.save_balance(lapsed.clone()).await.unwrap();
        ledger.save_balance(fresh.clone()).await.unwrap();

        let expired = ledger.expire_due(now()).await.unwrap();
        assert_eq!(expired, vec![lapsed.id]);
        let usable = ledger.find_active_by_member(member, now()).await.unwrap();
        assert_eq!(usable.len(), 1);
        assert_eq!(usable[0].id, fresh.id);
    }

    #[test]
    fn test_pack_restrictions() {
        let mut class = crate::test_support::gym_class(TenantId::new());
        let mut restricted = pack(5);
        assert!(restricted.is_valid_for_class(&class));

        restricted.valid_class_types = vec![ClassType::PersonalTraining];
        assert!(!restricted.is_valid_for_class(&class));

        class.class_type = ClassType::PersonalTraining;
        assert!(restricted.is_valid_for_class(&class));

        restricted.valid_class_types.clear();
        restricted.valid_class_ids = vec![GymClassId::new()];
        assert!(!restricted.is_valid_for_class(&class));
    }

    #[test]
    fn test_subscription_class_allowance() {
        let today = NaiveDate::from_ymd_opt(2025, 12, 1).unwrap();
        let mut subscription = Subscription {
            id: SubscriptionId::new(),
            tenant_id: TenantId::new(),
            member_id: MemberId::new(),
            status: SubscriptionStatus::Active,
            start_date: today - Duration::days(10),
            end_date: today + Duration::days(20),
            classes_remaining: Some(1),
        };
        assert!(subscription.is_active(today));
        assert!(!subscription.is_active(today + Duration::days(21)));

        subscription.use_class().unwrap();
        assert!(!subscription.has_classes_available());
        assert!(subscription.use_class().is_err());

        subscription.classes_remaining = None;
        assert!(subscription.has_classes_available());
        assert!(subscription.use_class().is_ok());
    }
}
