use sovledger_core::Config;
use sovledger_gate::SovereignGate;

pub struct AppState {
    pub config: Config,
    pub gate: SovereignGate,
}

impl AppState {
    pub fn new(config: Config, gate: SovereignGate) -> Self {
        Self { config, gate }
    }
}
