//! Who may see and act on a lead.
//!
//! RULE: The affiliate side may only look. The merchant owner and the
//! network side (network owner and its managers) may also act.

use crate::{
    directory::Role,
    error::{LeadError, LeadResult},
    lead::Lead,
    store::LeadStore,
    types::{LeadId, UserId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadAbility {
    View,
    History,
    Approve,
    Reject,
    Update,
}

impl LeadAbility {
    fn affiliate_may(&self) -> bool {
        matches!(self, LeadAbility::View | LeadAbility::History)
    }
}

pub struct LeadPolicy<'a> {
    store: &'a LeadStore,
}

impl<'a> LeadPolicy<'a> {
    pub fn new(store: &'a LeadStore) -> Self {
        Self { store }
    }

    pub fn allows(&self, user_id: UserId, ability: LeadAbility, lead: &Lead) -> LeadResult<bool> {
        let Some(user) = self.store.user(user_id)? else {
            return Ok(false);
        };
        let allowed = match user.role {
            Role::Affiliate => ability.affiliate_may() && self.owns_affiliate(user_id, lead)?,
            Role::Merchant => self.owns_merchant(user_id, lead)?,
            _ => self.is_network_side(user_id, user.role, lead)?,
        };
        Ok(allowed)
    }

    /// Fails with `Forbidden` unless `ability` is allowed.
    pub fn authorize(&self, user_id: UserId, ability: LeadAbility, lead: &Lead) -> LeadResult<()> {
        if self.allows(user_id, ability, lead)? {
            Ok(())
        } else {
            log::warn!("User {user_id} may not {ability:?} lead {}", lead.id);
            Err(LeadError::Forbidden { user_id })
        }
    }

    /// Every requested lead must exist and pass the single-lead check.
    ///
    /// Returns the leads in id order.
    pub fn batch(&self, user_id: UserId, ability: LeadAbility, ids: &[LeadId]) -> LeadResult<Vec<Lead>> {
        let leads = self.store.leads_by_ids(ids)?;
        if let Some(missing) = ids.iter().find(|id| !leads.iter().any(|lead| lead.id == **id)) {
            return Err(LeadError::not_found("lead", missing));
        }
        for lead in &leads {
            self.authorize(user_id, ability, lead)?;
        }
        Ok(leads)
    }

    fn owns_affiliate(&self, user_id: UserId, lead: &Lead) -> LeadResult<bool> {
        Ok(self
            .store
            .affiliate(lead.affiliate_id)?
            .is_some_and(|affiliate| affiliate.owner_id == user_id))
    }

    fn owns_merchant(&self, user_id: UserId, lead: &Lead) -> LeadResult<bool> {
        Ok(self
            .store
            .merchant(lead.merchant_id)?
            .is_some_and(|merchant| merchant.owner_id == user_id))
    }

    fn is_network_side(&self, user_id: UserId, role: Role, lead: &Lead) -> LeadResult<bool> {
        if role == Role::Network {
            return Ok(self
                .store
                .network(lead.network_id)?
                .is_some_and(|network| network.owner_id == user_id));
        }
        let Some(manager) = self.store.network_manager_for_user(user_id)? else {
            return Ok(false);
        };
        let allowed = match role {
            Role::ManagerMerchant => self
                .store
                .offer(lead.offer_id)?
                .is_some_and(|offer| offer.manager_id == Some(manager.id)),
            Role::ManagerAffiliate => self
                .store
                .network_participant(lead.network_id, lead.affiliate_id)?
                .is_some_and(|participant| participant.manager_id == Some(manager.id)),
            Role::ManagerAdmin => manager.network_id == lead.network_id,
            _ => false,
        };
        Ok(allowed)
    }
}
