use std::time::Instant;

use crate::config::FaucetConfig;
use crate::store::UserStore;

#[derive(Clone)]
pub struct AppState {
    pub users: UserStore,
    pub faucet: FaucetConfig,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(users: UserStore, faucet: FaucetConfig) -> Self {
        assert!(
            faucet.cooldown_ms <= crate::config::MAX_FAUCET_COOLDOWN_MS,
            "Faucet cooldown must be validated before serving"
        );
        Self {
            users,
            faucet,
            start_time: Instant::now(),
        }
    }
}
