//! Fee policy is injected, never decided here (SPEC_FULL.md §6.6): the core
//! only ever asks a `FeeProvider` for a satoshis-per-byte figure.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeeLevel {
    Priority,
    Normal,
    Economic,
    SuperEconomic,
    FeeBump,
}

pub trait FeeProvider: Send + Sync {
    fn fee_per_byte(&self, level: FeeLevel) -> u64;
}

/// A constant-table fee provider, useful for tests and as the simplest
/// possible production implementation (one static table, no mempool
/// sampling). Rates are satoshis/byte.
#[derive(Debug, Clone)]
pub struct StaticFeeProvider {
    pub priority: u64,
    pub normal: u64,
    pub economic: u64,
    pub super_economic: u64,
    pub fee_bump: u64,
}

impl Default for StaticFeeProvider {
    fn default() -> Self {
        // Mirrors the teacher's own `NewFeeProvider(3, 2, 1, 1, nil)` spread:
        // priority highest, economic/super-economic near the relay floor.
        StaticFeeProvider {
            priority: 5,
            normal: 3,
            economic: 2,
            super_economic: 1,
            fee_bump: 10,
        }
    }
}

impl FeeProvider for StaticFeeProvider {
    fn fee_per_byte(&self, level: FeeLevel) -> u64 {
        match level {
            FeeLevel::Priority => self.priority,
            FeeLevel::Normal => self.normal,
            FeeLevel::Economic => self.economic,
            FeeLevel::SuperEconomic => self.super_economic,
            FeeLevel::FeeBump => self.fee_bump,
        }
    }
}
