//! Lead gateway: the postback HTTP endpoint, the tracker HTTP client and
//! the replay worker loop around `leadtrack-core`.

pub mod http;
pub mod tracker_client;
pub mod worker;
