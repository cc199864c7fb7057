use crate::{
    directory::{Campaign, NetworkManager, NetworkParticipant, Offer, OwnedRecord, PromoTool, Role, User},
    offer_rate::{OfferRate, PaymentType},
    types::RecordId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Shared credential the tracker uses for postbacks (HTTP basic auth).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerAuthConfig {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerApiConfig {
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    pub timeout_secs: u64,
}

/// Retry policy and pacing of the tracker replay worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    pub max_attempts: u32,
    /// Back-off grows linearly: attempt n waits n × retry_delay_secs.
    pub retry_delay_secs: i64,
    pub batch_size: usize,
    pub poll_interval_ms: u64,
    /// A claimed job still running after this long is claimed again.
    #[serde(default = "default_lease_secs")]
    pub lease_secs: i64,
}

fn default_lease_secs() -> i64 {
    300
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRateAffiliateConfig {
    pub offer_rate_id: RecordId,
    pub affiliate_id: RecordId,
    pub commission_payment_amount: Decimal,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryConfig {
    #[serde(default)]
    pub users: Vec<User>,
    #[serde(default)]
    pub networks: Vec<OwnedRecord>,
    #[serde(default)]
    pub merchants: Vec<OwnedRecord>,
    #[serde(default)]
    pub affiliates: Vec<OwnedRecord>,
    #[serde(default)]
    pub network_managers: Vec<NetworkManager>,
    #[serde(default)]
    pub network_participants: Vec<NetworkParticipant>,
    #[serde(default)]
    pub offers: Vec<Offer>,
    #[serde(default)]
    pub offer_rates: Vec<OfferRate>,
    #[serde(default)]
    pub offer_rate_affiliates: Vec<OfferRateAffiliateConfig>,
    #[serde(default)]
    pub campaigns: Vec<Campaign>,
    #[serde(default)]
    pub promo_tools: Vec<PromoTool>,
}

#[derive(Debug, Clone, Deserialize)]
struct GatewayFile {
    tracker_auth: TrackerAuthConfig,
    tracker_api: TrackerApiConfig,
    jobs: JobsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeadConfig {
    pub tracker_auth: TrackerAuthConfig,
    pub tracker_api: TrackerApiConfig,
    pub jobs: JobsConfig,
    pub directory: DirectoryConfig,
}

impl LeadConfig {
    /// Load from the data/ directory.
    /// In tests, use LeadConfig::default_test().
    pub fn load(data_dir: &str) -> anyhow::Result<Self> {
        let path = format!("{data_dir}/gateway.json");
        let content = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let gateway: GatewayFile = serde_json::from_str(&content)?;

        let directory_path = format!("{data_dir}/directory/directory.json");
        let directory_content = std::fs::read_to_string(&directory_path)
            .map_err(|e| anyhow::anyhow!("Cannot read {directory_path}: {e}"))?;
        let directory: DirectoryConfig = serde_json::from_str(&directory_content)?;

        if gateway.jobs.max_attempts == 0 {
            anyhow::bail!("jobs.max_attempts must be at least 1");
        }

        Ok(Self {
            tracker_auth: gateway.tracker_auth,
            tracker_api: gateway.tracker_api,
            jobs: gateway.jobs,
            directory,
        })
    }

    /// Config with hardcoded defaults for use in tests.
    ///
    /// Directory fixture:
    ///   users 1..=8    network owner, merchant owner, affiliate owner,
    ///                  merchant manager, affiliate manager, admin manager,
    ///                  a foreign merchant, a second affiliate
    ///   offer 1        network 1, merchant 1, managed by manager 1, USD
    ///   rate 1         percent 100 / commission 10 (affiliate 2 pays 25)
    ///   rate 2         fixed 20.00 / commission 10.5
    ///   rate 3         percent 100 / commission 10.5
    ///   campaign 1, 2  offer 1 for affiliates 1 and 2
    pub fn default_test() -> Self {
        let user = |id, role| User { id, role };
        let owned = |id, owner_id| OwnedRecord { id, owner_id };
        let rate = |id, payment_type, merchant: i64, commission: Decimal| OfferRate {
            id,
            offer_id: 1,
            payment_type,
            merchant_payment_amount: Decimal::from(merchant),
            commission_payment_amount: commission,
        };

        Self {
            tracker_auth: TrackerAuthConfig {
                username: "tracker@leads.test".into(),
                password: "TGAedEeD5kJs9JyxEszs".into(),
            },
            tracker_api: TrackerApiConfig {
                base_url: "http://127.0.0.1:9/api".into(),
                token: None,
                timeout_secs: 5,
            },
            jobs: JobsConfig {
                max_attempts: 3,
                retry_delay_secs: 0,
                batch_size: 100,
                poll_interval_ms: 10,
                lease_secs: 300,
            },
            directory: DirectoryConfig {
                users: vec![
                    user(1, Role::Network),
                    user(2, Role::Merchant),
                    user(3, Role::Affiliate),
                    user(4, Role::ManagerMerchant),
                    user(5, Role::ManagerAffiliate),
                    user(6, Role::ManagerAdmin),
                    user(7, Role::Merchant),
                    user(8, Role::Affiliate),
                ],
                networks: vec![owned(1, 1)],
                merchants: vec![owned(1, 2), owned(2, 7)],
                affiliates: vec![owned(1, 3), owned(2, 8)],
                network_managers: vec![
                    NetworkManager { id: 1, user_id: 4, network_id: 1 },
                    NetworkManager { id: 2, user_id: 5, network_id: 1 },
                    NetworkManager { id: 3, user_id: 6, network_id: 1 },
                ],
                network_participants: vec![NetworkParticipant {
                    id: 1,
                    network_id: 1,
                    affiliate_id: 1,
                    manager_id: Some(2),
                }],
                offers: vec![Offer {
                    id: 1,
                    network_id: 1,
                    merchant_id: 1,
                    manager_id: Some(1),
                    currency: "USD".into(),
                }],
                offer_rates: vec![
                    rate(1, PaymentType::Percent, 100, Decimal::from(10)),
                    rate(2, PaymentType::Fixed, 20, Decimal::new(105, 1)),
                    rate(3, PaymentType::Percent, 100, Decimal::new(105, 1)),
                ],
                offer_rate_affiliates: vec![OfferRateAffiliateConfig {
                    offer_rate_id: 1,
                    affiliate_id: 2,
                    commission_payment_amount: Decimal::from(25),
                }],
                campaigns: vec![
                    Campaign { id: 1, offer_id: 1, affiliate_id: 1 },
                    Campaign { id: 2, offer_id: 1, affiliate_id: 2 },
                ],
                promo_tools: vec![
                    PromoTool { id: 1, offer_id: 1 },
                    PromoTool { id: 2, offer_id: 1 },
                ],
            },
        }
    }
}
