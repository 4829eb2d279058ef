//! Governance Core — C6 (spec.md §3 "Governance hierarchy", §4.4).
//!
//! Hierarchical budget + rate-limit checks over VirtualKey → Team →
//! Customer, backed by sharded concurrent maps (spec.md §9 "Sync.Map-style
//! sharded maps") so reads stay lock-free on the hot path and writes take
//! only their own row's lock (spec.md §5 "Budget updates: per-budget
//! serialization via row lock; reads are lock-free snapshots").
//!
//! The source models a virtual key's owner as a team-or-customer pair of
//! nullable fields with a save-time check that exactly one is set. Here
//! [`Owner`] makes that exclusivity a type-level invariant instead —
//! "belongs to either a team or a customer, never both" becomes
//! unrepresentable rather than merely validated (spec.md §3).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use thiserror::Error;

use crate::schema::Provider;

/// Which link in the VirtualKey → Team → Customer chain a governance
/// failure occurred at (spec.md §8 testable property 6, error messages
/// "Team budget exceeded" / "Customer budget exceeded").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    VirtualKey,
    Team,
    Customer,
}

impl std::fmt::Display for Level {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Level::VirtualKey => "virtual key",
            Level::Team => "Team",
            Level::Customer => "Customer",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Error, Clone)]
pub enum GovernanceError {
    #[error("invalid budget: {0}")]
    InvalidBudget(String),
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),
    #[error("virtual key not found")]
    KeyNotFound,
    #[error("virtual key is disabled")]
    KeyInactive,
    #[error("model or provider not permitted for this key")]
    NotAllowed,
    #[error("{level} budget exceeded")]
    BudgetExceeded { level: Level },
    #[error("{level} rate limit exceeded")]
    RateLimited { level: Level },
}

impl GovernanceError {
    pub fn status_code(&self) -> u16 {
        match self {
            GovernanceError::InvalidBudget(_) | GovernanceError::InvalidRateLimit(_) => 400,
            GovernanceError::KeyNotFound => 404,
            GovernanceError::KeyInactive | GovernanceError::NotAllowed => 403,
            GovernanceError::BudgetExceeded { .. } | GovernanceError::RateLimited { .. } => 429,
        }
    }
}

/// `{id, max_limit, reset_duration, last_reset, current_usage}` (spec.md
/// §3). Never negative; a reset happens lazily on whichever of pre-hook
/// check or post-hook update next observes the window has elapsed,
/// exactly once per window (spec.md §8 testable property 8).
#[derive(Debug, Clone)]
pub struct Budget {
    pub id: String,
    pub max_limit: f64,
    pub reset_duration: Duration,
    pub last_reset: DateTime<Utc>,
    pub current_usage: f64,
}

impl Budget {
    pub fn new(id: impl Into<String>, max_limit: f64, reset_duration: Duration, now: DateTime<Utc>) -> Result<Self, GovernanceError> {
        if max_limit < 0.0 {
            return Err(GovernanceError::InvalidBudget("max_limit cannot be negative".into()));
        }
        Ok(Budget {
            id: id.into(),
            max_limit,
            reset_duration,
            last_reset: now,
            current_usage: 0.0,
        })
    }

    fn is_due(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.last_reset)
            .to_std()
            .map(|elapsed| elapsed >= self.reset_duration)
            .unwrap_or(true)
    }

    fn reset_if_due(&mut self, now: DateTime<Utc>) {
        if self.is_due(now) {
            self.current_usage = 0.0;
            self.last_reset = now;
        }
    }

    /// Pre-hook read (spec.md §4.4): a budget past its reset window is
    /// skipped rather than checked, since it will be zeroed on the next
    /// post-hook update.
    fn check(&self, now: DateTime<Utc>, level: Level) -> Result<(), GovernanceError> {
        if self.is_due(now) {
            return Ok(());
        }
        if self.current_usage > self.max_limit {
            return Err(GovernanceError::BudgetExceeded { level });
        }
        Ok(())
    }

    /// Post-hook update (spec.md §4.4, §8 testable property 7): reset if
    /// due, then add `cost`. Caller holds the row lock for the duration.
    fn apply_cost(&mut self, cost: f64, now: DateTime<Utc>) {
        self.reset_if_due(now);
        self.current_usage += cost;
    }
}

/// `{id, token_max?, token_reset?, token_usage, token_last_reset,
/// request_max?, request_reset?, request_usage, request_last_reset}`
/// (spec.md §3). A max without its reset counterpart is rejected at
/// construction (spec.md §3 invariant, §4.4 "an absent reset counterpart
/// is rejected at save-time").
#[derive(Debug, Clone)]
pub struct RateLimit {
    pub id: String,
    pub token_max: Option<u64>,
    pub token_reset: Option<Duration>,
    pub token_usage: u64,
    pub token_last_reset: DateTime<Utc>,
    pub request_max: Option<u64>,
    pub request_reset: Option<Duration>,
    pub request_usage: u64,
    pub request_last_reset: DateTime<Utc>,
}

impl RateLimit {
    pub fn new(
        id: impl Into<String>,
        token_max: Option<u64>,
        token_reset: Option<Duration>,
        request_max: Option<u64>,
        request_reset: Option<Duration>,
        now: DateTime<Utc>,
    ) -> Result<Self, GovernanceError> {
        if token_max.is_some() && token_reset.is_none() {
            return Err(GovernanceError::InvalidRateLimit(
                "token_max set without token_reset".into(),
            ));
        }
        if request_max.is_some() && request_reset.is_none() {
            return Err(GovernanceError::InvalidRateLimit(
                "request_max set without request_reset".into(),
            ));
        }
        Ok(RateLimit {
            id: id.into(),
            token_max,
            token_reset,
            token_usage: 0,
            token_last_reset: now,
            request_max,
            request_reset,
            request_usage: 0,
            request_last_reset: now,
        })
    }

    fn due(last_reset: DateTime<Utc>, reset: Option<Duration>, now: DateTime<Utc>) -> bool {
        match reset {
            None => false,
            Some(d) => now
                .signed_duration_since(last_reset)
                .to_std()
                .map(|elapsed| elapsed >= d)
                .unwrap_or(true),
        }
    }

    fn check(&self, now: DateTime<Utc>, level: Level) -> Result<(), GovernanceError> {
        if let Some(max) = self.token_max {
            if !Self::due(self.token_last_reset, self.token_reset, now) && self.token_usage > max {
                return Err(GovernanceError::RateLimited { level });
            }
        }
        if let Some(max) = self.request_max {
            if !Self::due(self.request_last_reset, self.request_reset, now) && self.request_usage > max {
                return Err(GovernanceError::RateLimited { level });
            }
        }
        Ok(())
    }

    /// Rate-limit usage is updated lock-free in the cache and lazily
    /// persisted (spec.md §4.4) — callers still serialize through the same
    /// row mutex as the budget it shares an entity with, for simplicity.
    fn apply_usage(&mut self, tokens: u64, now: DateTime<Utc>) {
        if Self::due(self.token_last_reset, self.token_reset, now) {
            self.token_usage = 0;
            self.token_last_reset = now;
        }
        if Self::due(self.request_last_reset, self.request_reset, now) {
            self.request_usage = 0;
            self.request_last_reset = now;
        }
        self.token_usage += tokens;
        self.request_usage += 1;
    }
}

#[derive(Debug, Clone)]
pub struct Customer {
    pub id: String,
    pub budget: Option<Budget>,
}

#[derive(Debug, Clone)]
pub struct Team {
    pub id: String,
    pub customer: Option<String>,
    pub budget: Option<Budget>,
}

/// A virtual key belongs to exactly one of these (spec.md §3 invariant).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    Team(String),
    Customer(String),
}

#[derive(Debug, Clone)]
pub struct VirtualKey {
    pub id: String,
    pub value: String,
    pub is_active: bool,
    pub allowed_models: Vec<String>,
    pub allowed_providers: Vec<Provider>,
    pub owner: Owner,
    pub budget: Option<Budget>,
    pub rate_limit: Option<RateLimit>,
}

impl VirtualKey {
    /// Empty allow-list means all models/providers are permitted
    /// (spec.md §4.4).
    fn permits(&self, model: &str, provider: Provider) -> bool {
        (self.allowed_models.is_empty() || self.allowed_models.iter().any(|m| m == model))
            && (self.allowed_providers.is_empty() || self.allowed_providers.contains(&provider))
    }
}

type Row<T> = Arc<Mutex<T>>;

/// The governance cache: sharded concurrent maps keyed by entity id, VK
/// lookup additionally keyed by the opaque VK value clients present.
#[derive(Default)]
pub struct GovernanceStore {
    virtual_keys_by_value: DashMap<String, String>,
    virtual_keys: DashMap<String, Row<VirtualKey>>,
    teams: DashMap<String, Row<Team>>,
    customers: DashMap<String, Row<Customer>>,
}

impl GovernanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_virtual_key(&self, vk: VirtualKey) {
        self.virtual_keys_by_value.insert(vk.value.clone(), vk.id.clone());
        self.virtual_keys.insert(vk.id.clone(), Arc::new(Mutex::new(vk)));
    }

    pub fn insert_team(&self, team: Team) {
        self.teams.insert(team.id.clone(), Arc::new(Mutex::new(team)));
    }

    pub fn insert_customer(&self, customer: Customer) {
        self.customers.insert(customer.id.clone(), Arc::new(Mutex::new(customer)));
    }

    fn resolve(&self, vk_value: &str) -> Result<Row<VirtualKey>, GovernanceError> {
        let id = self
            .virtual_keys_by_value
            .get(vk_value)
            .ok_or(GovernanceError::KeyNotFound)?
            .clone();
        self.virtual_keys.get(&id).map(Arc::clone).ok_or(GovernanceError::KeyNotFound)
    }

    /// Pre-hook: lock-free reads against the VK, then its team, then its
    /// customer, in that order (spec.md §4.4).
    pub fn check(&self, vk_value: &str, model: &str, provider: Provider, now: DateTime<Utc>) -> Result<(), GovernanceError> {
        let vk_row = self.resolve(vk_value)?;
        let vk = vk_row.lock();
        if !vk.is_active {
            return Err(GovernanceError::KeyInactive);
        }
        if !vk.permits(model, provider) {
            return Err(GovernanceError::NotAllowed);
        }
        if let Some(budget) = &vk.budget {
            budget.check(now, Level::VirtualKey)?;
        }
        if let Some(rl) = &vk.rate_limit {
            rl.check(now, Level::VirtualKey)?;
        }

        match &vk.owner {
            Owner::Team(team_id) => {
                if let Some(team_row) = self.teams.get(team_id) {
                    let team = team_row.lock();
                    if let Some(budget) = &team.budget {
                        budget.check(now, Level::Team)?;
                    }
                    if let Some(customer_id) = &team.customer {
                        if let Some(customer_row) = self.customers.get(customer_id) {
                            let customer = customer_row.lock();
                            if let Some(budget) = &customer.budget {
                                budget.check(now, Level::Customer)?;
                            }
                        }
                    }
                }
            },
            Owner::Customer(customer_id) => {
                if let Some(customer_row) = self.customers.get(customer_id) {
                    let customer = customer_row.lock();
                    if let Some(budget) = &customer.budget {
                        budget.check(now, Level::Customer)?;
                    }
                }
            },
        }
        Ok(())
    }

    /// Post-hook: lock each budget row in the same hierarchy order,
    /// reset-if-needed, add cost (spec.md §4.4). Never fails — a cost that
    /// can't be applied (unknown VK) is simply dropped, since the request
    /// already completed by the time this runs.
    pub fn apply_cost(&self, vk_value: &str, cost: f64, tokens: u64, now: DateTime<Utc>) {
        let Ok(vk_row) = self.resolve(vk_value) else {
            return;
        };
        let mut vk = vk_row.lock();
        if let Some(budget) = &mut vk.budget {
            budget.apply_cost(cost, now);
        }
        if let Some(rl) = &mut vk.rate_limit {
            rl.apply_usage(tokens, now);
        }
        let owner = vk.owner.clone();
        drop(vk);

        let team_id = match &owner {
            Owner::Team(id) => Some(id.clone()),
            Owner::Customer(_) => None,
        };
        let customer_id = match &owner {
            Owner::Customer(id) => Some(id.clone()),
            Owner::Team(_) => None,
        };
        if let Some(team_id) = team_id {
            if let Some(team_row) = self.teams.get(&team_id) {
                let mut team = team_row.lock();
                if let Some(budget) = &mut team.budget {
                    budget.apply_cost(cost, now);
                }
                if let Some(customer_id) = team.customer.clone() {
                    if let Some(customer_row) = self.customers.get(&customer_id) {
                        let mut customer = customer_row.lock();
                        if let Some(budget) = &mut customer.budget {
                            budget.apply_cost(cost, now);
                        }
                    }
                }
            }
        } else if let Some(customer_id) = customer_id {
            if let Some(customer_row) = self.customers.get(&customer_id) {
                let mut customer = customer_row.lock();
                if let Some(budget) = &mut customer.budget {
                    budget.apply_cost(cost, now);
                }
            }
        }
    }

    /// Background resetter tick (spec.md §5 "Scheduling"): zero any budget
    /// or rate-limit counters past their window, independent of traffic.
    pub fn reset_expired(&self, now: DateTime<Utc>) {
        for row in self.virtual_keys.iter() {
            let mut vk = row.value().lock();
            if let Some(b) = &mut vk.budget {
                b.reset_if_due(now);
            }
            if let Some(rl) = &mut vk.rate_limit {
                rl.apply_usage(0, now);
            }
        }
        for row in self.teams.iter() {
            if let Some(b) = &mut row.value().lock().budget {
                b.reset_if_due(now);
            }
        }
        for row in self.customers.iter() {
            if let Some(b) = &mut row.value().lock().budget {
                b.reset_if_due(now);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-01-01T00:00:00Z".parse().unwrap()
    }

    #[test]
    fn team_budget_exceeded_rejects_when_customer_is_not() {
        let store = GovernanceStore::new();
        store.insert_customer(Customer {
            id: "cust1".into(),
            budget: Some(Budget::new("b-cust", 1000.0, Duration::from_secs(3600), now()).unwrap()),
        });
        let mut team_budget = Budget::new("b-team", 10.0, Duration::from_secs(3600), now()).unwrap();
        team_budget.current_usage = 9.99;
        store.insert_team(Team {
            id: "team1".into(),
            customer: Some("cust1".into()),
            budget: Some(team_budget),
        });
        store.insert_virtual_key(VirtualKey {
            id: "vk1".into(),
            value: "sk-test".into(),
            is_active: true,
            allowed_models: vec![],
            allowed_providers: vec![],
            owner: Owner::Team("team1".into()),
            budget: None,
            rate_limit: None,
        });

        assert!(store.check("sk-test", "gpt-x", Provider::OpenAI, now()).is_ok());

        store.apply_cost("sk-test", 0.50, 10, now());

        let err = store.check("sk-test", "gpt-x", Provider::OpenAI, now()).unwrap_err();
        assert!(matches!(err, GovernanceError::BudgetExceeded { level: Level::Team }));
    }

    #[test]
    fn rate_limit_without_reset_is_rejected_at_construction() {
        let err = RateLimit::new("rl1", Some(100), None, None, None, now()).unwrap_err();
        assert!(matches!(err, GovernanceError::InvalidRateLimit(_)));
    }

    #[test]
    fn inactive_key_is_rejected_before_budget_check() {
        let store = GovernanceStore::new();
        store.insert_virtual_key(VirtualKey {
            id: "vk1".into(),
            value: "sk-test".into(),
            is_active: false,
            allowed_models: vec![],
            allowed_providers: vec![],
            owner: Owner::Customer("cust1".into()),
            budget: None,
            rate_limit: None,
        });
        let err = store.check("sk-test", "gpt-x", Provider::OpenAI, now()).unwrap_err();
        assert!(matches!(err, GovernanceError::KeyInactive));
    }
}
