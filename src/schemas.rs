use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::money::Money;

pub type MemberId = String;

/// ISO 4217 style currency code, stored upper-cased.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into().trim().to_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CurrencyCode {
    fn default() -> Self {
        Self::new("USD")
    }
}

impl From<String> for CurrencyCode {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<CurrencyCode> for String {
    fn from(value: CurrencyCode) -> Self {
        value.0
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Admin,
    #[default]
    Member,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct GroupMember {
    pub user_id: MemberId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub role: MemberRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Group {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub currency: CurrencyCode,
    pub created_by: MemberId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub members: Vec<GroupMember>,
}

impl Group {
    pub fn member(&self, user_id: &str) -> Option<&GroupMember> {
        self.members.iter().find(|member| member.user_id == user_id)
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.member(user_id)
            .is_some_and(|member| member.role == MemberRole::Admin)
    }
}

/// One member's share of one expense.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Split {
    pub user_id: MemberId,
    pub display_name: String,
    pub amount: Money,
    /// Set on the payer's own entry, which never counts as a debt.
    pub paid: bool,
}

#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Expense {
    pub id: String,
    pub group_id: String,
    pub title: String,
    pub amount: Money,
    #[serde(default)]
    pub currency: CurrencyCode,
    pub paid_by: MemberId,
    pub created_by: MemberId,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub splits: Vec<Split>,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementStatus {
    #[default]
    Pending,
    Completed,
    Rejected,
}

/// A payment recorded between two members of a group.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct Settlement {
    pub id: String,
    pub group_id: String,
    pub from_user_id: MemberId,
    pub to_user_id: MemberId,
    pub amount: Money,
    #[serde(default)]
    pub currency: CurrencyCode,
    pub date: NaiveDate,
    #[serde(default)]
    pub status: SettlementStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// What one counterparty and the viewpoint user owe each other.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Balance {
    pub user_id: MemberId,
    pub display_name: String,
    pub you_owe: Money,
    pub they_owe: Money,
    /// Positive when the viewpoint user is owed.
    pub net_balance: Money,
}
