//! Offer rates and the reward-split calculation.
//!
//! The split is the only place lead payment fields are computed:
//!   merchant_payment = fixed amount, or payment × merchant% (percent rates)
//!   network_profit   = merchant_payment × commission%
//!   affiliate_profit = merchant_payment − network_profit
//!
//! so merchant_payment == affiliate_profit + network_profit always holds.

use crate::{
    error::{LeadError, LeadResult},
    money::{percent_of, to_minor},
    types::{Minor, RecordId},
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Fixed,
    Percent,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Fixed   => "fixed",
            PaymentType::Percent => "percent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed"   => Some(PaymentType::Fixed),
            "percent" => Some(PaymentType::Percent),
            _         => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfferRate {
    pub id:                        RecordId,
    pub offer_id:                  RecordId,
    pub payment_type:              PaymentType,
    /// Major units for fixed rates, a percentage of the payment for percent rates.
    pub merchant_payment_amount:   Decimal,
    /// Network commission, percent of the merchant payment.
    pub commission_payment_amount: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LeadRewards {
    pub merchant_payment: Minor,
    pub affiliate_profit: Minor,
    pub network_profit:   Minor,
}

impl OfferRate {
    pub fn is_percent(&self) -> bool {
        self.payment_type == PaymentType::Percent
    }

    /// Split a payment (minor units) into merchant/affiliate/network parts.
    ///
    /// `affiliate_commission` is the per-affiliate commission override for
    /// this rate, if the affiliate has one.
    pub fn calculate_lead_rewards(
        &self,
        payment: Option<Minor>,
        affiliate_commission: Option<Decimal>,
    ) -> LeadResult<LeadRewards> {
        let merchant_payment = match (self.payment_type, payment) {
            (PaymentType::Percent, Some(payment)) => {
                percent_of(payment, self.merchant_payment_amount)?
            }
            (PaymentType::Percent, None) => {
                return Err(LeadError::InvalidRateType(format!(
                    "offer rate {} is percent-based and needs a payment",
                    self.id
                )));
            }
            (PaymentType::Fixed, Some(_)) => {
                return Err(LeadError::InvalidRateType(format!(
                    "offer rate {} is fixed and does not accept a payment",
                    self.id
                )));
            }
            (PaymentType::Fixed, None) => to_minor(self.merchant_payment_amount)?,
        };

        let commission = affiliate_commission.unwrap_or(self.commission_payment_amount);
        let network_profit = percent_of(merchant_payment, commission)?;

        Ok(LeadRewards {
            merchant_payment,
            affiliate_profit: merchant_payment - network_profit,
            network_profit,
        })
    }
}
