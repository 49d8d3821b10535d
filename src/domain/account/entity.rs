//! Account entity

use crate::domain::shared::value_objects::AccountId;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Marketplace role of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Client,
    Advisor,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Client => "client",
            Role::Advisor => "advisor",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "client" => Some(Role::Client),
            "advisor" => Some(Role::Advisor),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability of an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    /// Online and free to take a call
    Available,
    /// On a call
    Busy,
    /// Approved but offline
    Approved,
    /// Awaiting approval
    Pending,
}

impl AccountStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccountStatus::Available => "Available",
            AccountStatus::Busy => "Busy",
            AccountStatus::Approved => "Approved",
            AccountStatus::Pending => "Pending",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Available" => Some(AccountStatus::Available),
            "Busy" => Some(AccountStatus::Busy),
            "Approved" => Some(AccountStatus::Approved),
            "Pending" => Some(AccountStatus::Pending),
            _ => None,
        }
    }
}

impl fmt::Display for AccountStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account as seen by the session core
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub role: Role,
    pub full_name: String,
    pub status: AccountStatus,
    /// Per-minute rate; only meaningful for advisors
    pub rate_per_minute: Option<Decimal>,
    /// Wallet balance, never negative
    pub wallet: Decimal,
}

impl Account {
    pub fn client(id: AccountId, full_name: &str, wallet: Decimal) -> Self {
        Self {
            id,
            role: Role::Client,
            full_name: full_name.to_string(),
            status: AccountStatus::Available,
            rate_per_minute: None,
            wallet,
        }
    }

    pub fn advisor(id: AccountId, full_name: &str, rate_per_minute: Decimal) -> Self {
        Self {
            id,
            role: Role::Advisor,
            full_name: full_name.to_string(),
            status: AccountStatus::Available,
            rate_per_minute: Some(rate_per_minute),
            wallet: Decimal::ZERO,
        }
    }

    pub fn with_status(mut self, status: AccountStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_wallet(mut self, wallet: Decimal) -> Self {
        self.wallet = wallet;
        self
    }

    pub fn is_advisor(&self) -> bool {
        self.role == Role::Advisor
    }

    pub fn is_client(&self) -> bool {
        self.role == Role::Client
    }
}
