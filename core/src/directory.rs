//! Collaborator records a lead is correlated with: users, networks,
//! merchants, affiliates, offers, campaigns and promo tools.
//!
//! These are read-mostly. They are seeded from configuration and only
//! read by the lead services and the policy.

use crate::types::{Currency, RecordId, UserId};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Affiliate,
    Merchant,
    Network,
    ManagerAdmin,
    ManagerMerchant,
    ManagerAffiliate,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Affiliate        => "affiliate",
            Role::Merchant         => "merchant",
            Role::Network          => "network",
            Role::ManagerAdmin     => "manager_admin",
            Role::ManagerMerchant  => "manager_merchant",
            Role::ManagerAffiliate => "manager_affiliate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "affiliate"         => Some(Role::Affiliate),
            "merchant"          => Some(Role::Merchant),
            "network"           => Some(Role::Network),
            "manager_admin"     => Some(Role::ManagerAdmin),
            "manager_merchant"  => Some(Role::ManagerMerchant),
            "manager_affiliate" => Some(Role::ManagerAffiliate),
            _                   => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id:   UserId,
    pub role: Role,
}

/// A network, merchant or affiliate: anything with an owning user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnedRecord {
    pub id:       RecordId,
    pub owner_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkManager {
    pub id:         RecordId,
    pub user_id:    UserId,
    pub network_id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkParticipant {
    pub id:           RecordId,
    pub network_id:   RecordId,
    pub affiliate_id: RecordId,
    #[serde(default)]
    pub manager_id:   Option<RecordId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Offer {
    pub id:          RecordId,
    pub network_id:  RecordId,
    pub merchant_id: RecordId,
    #[serde(default)]
    pub manager_id:  Option<RecordId>,
    pub currency:    Currency,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Campaign {
    pub id:           RecordId,
    pub offer_id:     RecordId,
    pub affiliate_id: RecordId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromoTool {
    pub id:       RecordId,
    pub offer_id: RecordId,
}
