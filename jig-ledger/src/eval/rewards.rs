//! Rewards state carried from one header to the next

use jig_protocol::{BlockHeader, ConsensusParams};

/// Rewards fields of a header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RewardsState {
    /// Accumulated rewards per unit
    pub level: u64,
    /// Rate paid out per round
    pub rate: u64,
    /// Remainder not yet distributed
    pub residue: u64,
    /// Round of the next rate recalculation
    pub recalculation_round: u64,
}

impl RewardsState {
    /// Rewards fields of `header`
    pub fn of(header: &BlockHeader) -> Self {
        Self {
            level: header.rewards_level,
            rate: header.rewards_rate,
            residue: header.rewards_residue,
            recalculation_round: header.rewards_recalculation_round,
        }
    }

    /// Write the fields into `header`
    pub fn store(&self, header: &mut BlockHeader) {
        header.rewards_level = self.level;
        header.rewards_rate = self.rate;
        header.rewards_residue = self.residue;
        header.rewards_recalculation_round = self.recalculation_round;
    }

    /// State for `next_round` given the pool balance and the reward units
    /// outstanding at the end of the previous round.
    ///
    /// The level advances at the previous rate; a new rate only applies from
    /// the round after a recalculation.
    pub fn next(&self, next_round: u64, proto: &ConsensusParams, pool_balance: u64, total_units: u64) -> Self {
        let mut out = *self;
        if next_round == self.recalculation_round {
            out.rate = match proto.min_balance.checked_add(self.residue) {
                Some(reserved) if pool_balance > reserved => {
                    (pool_balance - reserved) / proto.rewards_rate_refresh_interval
                }
                _ => 0,
            };
            out.recalculation_round = next_round + proto.rewards_rate_refresh_interval;
        }
        if total_units == 0 {
            return out;
        }

        let reserved = proto.min_balance.saturating_add(self.residue);
        let mut rate = self.rate;
        if pool_balance <= reserved {
            rate = 0;
        } else if pool_balance.saturating_sub(rate) < reserved {
            rate = pool_balance - reserved;
        }

        let distributable = rate.saturating_add(self.residue);
        out.level = self.level.saturating_add(distributable / total_units);
        out.residue = distributable % total_units;
        out
    }

    /// Amount moved out of the pool when advancing from `prev` at `units`
    pub fn withdrawal(&self, prev: &RewardsState, units: u64) -> u64 {
        self.level.saturating_sub(prev.level).saturating_mul(units)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proto() -> ConsensusParams {
        ConsensusParams::future()
    }

    #[test]
    fn test_zero_rate_keeps_level() {
        let prev = RewardsState {
            recalculation_round: 500_000,
            ..Default::default()
        };
        let next = prev.next(1, &proto(), 123_456_789, 1_000);
        assert_eq!(next, prev);
        assert_eq!(next.withdrawal(&prev, 1_000), 0);
    }

    #[test]
    fn test_recalculation_sets_rate_for_later_rounds() {
        let prev = RewardsState {
            recalculation_round: 10,
            ..Default::default()
        };
        let pool = 100_000 + 500_000 * 3;
        let next = prev.next(10, &proto(), pool, 1);
        assert_eq!(next.rate, 3);
        assert_eq!(next.recalculation_round, 500_010);
        // Old rate (0) still applied this round
        assert_eq!(next.level, 0);
    }

    #[test]
    fn test_level_and_residue_advance() {
        let prev = RewardsState {
            level: 5,
            rate: 10,
            residue: 1,
            recalculation_round: 500_000,
        };
        let next = prev.next(2, &proto(), 10_000_000, 4);
        assert_eq!(next.level, 5 + 11 / 4);
        assert_eq!(next.residue, 11 % 4);
        assert_eq!(next.withdrawal(&prev, 4), 8);
    }

    #[test]
    fn test_rate_capped_by_pool() {
        let prev = RewardsState {
            level: 0,
            rate: 1_000_000,
            residue: 0,
            recalculation_round: 500_000,
        };
        let next = prev.next(2, &proto(), 100_010, 1);
        assert_eq!(next.level, 10);
    }
}
