//! Relative scheduler that keeps two components in sync cycle-wise.
//!
//! The scheduler holds one clock per component and repeatedly steps
//! whichever is behind, so the CPU and PPU interleave at machine-cycle
//! granularity without any notion of wall time. After each `run_for` the
//! common prefix of both counters is discarded; the clocks only ever carry
//! the residual imbalance, so they cannot overflow.

/// Cycle counter tracking master-clock ticks (T-cycles).
///
/// One machine cycle is four ticks; instruction costs are credited in
/// machine cycles while the PPU, APU and timer tick once per T-cycle.
#[derive(Debug, Default, Clone, Copy)]
pub struct Clock {
    t: u64,
}

impl Clock {
    pub fn reset(&mut self) {
        self.t = 0;
    }

    pub fn add_t(&mut self, ticks: u64) {
        self.t += ticks;
    }

    pub fn add_m(&mut self, cycles: u64) {
        self.t += cycles * 4;
    }

    pub fn t(&self) -> u64 {
        self.t
    }

    pub fn m(&self) -> u64 {
        self.t / 4
    }
}

/// Two-clock dispatcher for the CPU and PPU step functions.
#[derive(Debug, Default)]
pub struct Scheduler {
    pub cpu_clock: Clock,
    pub ppu_clock: Clock,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.cpu_clock.reset();
        self.ppu_clock.reset();
    }

    /// Run until the CPU clock has advanced by at least `ticks` T-cycles
    /// (it may go slightly past, since steps are indivisible).
    ///
    /// On each iteration the component whose clock is lower is stepped,
    /// with ties going to the CPU. `cpu_step` reports its cost in machine
    /// cycles, `ppu_step` in T-cycles.
    pub fn run_for<C>(
        &mut self,
        ticks: u64,
        ctx: &mut C,
        cpu_step: fn(&mut C) -> u64,
        ppu_step: fn(&mut C) -> u64,
    ) {
        let target = self.cpu_clock.t() + ticks;

        while self.cpu_clock.t() < target {
            if self.cpu_clock.t() <= self.ppu_clock.t() {
                let m = cpu_step(ctx);
                self.cpu_clock.add_m(m);
            } else {
                let t = ppu_step(ctx);
                self.ppu_clock.add_t(t);
            }
        }

        self.rebase();
    }

    /// Drop the common prefix of both counters, keeping only the imbalance.
    fn rebase(&mut self) {
        let common = self.cpu_clock.t.min(self.ppu_clock.t);
        self.cpu_clock.t -= common;
        self.ppu_clock.t -= common;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_t_m_conversion() {
        let mut clock = Clock::default();
        clock.add_m(3);
        assert_eq!(clock.t(), 12);
        assert_eq!(clock.m(), 3);

        clock.add_t(2);
        assert_eq!(clock.t(), 14);
        assert_eq!(clock.m(), 3);

        clock.reset();
        assert_eq!(clock.t(), 0);
    }

    #[test]
    fn test_run_for_interleaves_with_cpu_winning_ties() {
        // CPU steps cost 1 m-cycle (4 ticks), PPU steps 1 tick: the PPU is
        // stepped while it trails the CPU, the CPU wins exact ties.
        let mut sched = Scheduler::new();
        let mut counts = (0u64, 0u64);

        sched.run_for(
            16,
            &mut counts,
            |c: &mut (u64, u64)| {
                c.0 += 1;
                1
            },
            |c: &mut (u64, u64)| {
                c.1 += 1;
                1
            },
        );

        // Four CPU steps to reach the 16-tick target; the PPU trails the
        // last step by one machine cycle.
        assert_eq!(counts.0, 4);
        assert_eq!(counts.1, 12);
    }

    #[test]
    fn test_run_for_rebases_clocks() {
        let mut sched = Scheduler::new();
        let mut ctx = ();

        // CPU steps are chunky (3 m = 12 ticks) so the clocks end uneven.
        sched.run_for(10, &mut ctx, |_| 3, |_| 1);

        // The smaller counter is always rebased to zero.
        assert!(sched.cpu_clock.t() == 0 || sched.ppu_clock.t() == 0);
        assert!(sched.cpu_clock.t() <= 12);
        assert!(sched.ppu_clock.t() <= 12);
    }

    #[test]
    fn test_split_runs_match_one_run() {
        fn drive(chunks: &[u64]) -> (u64, u64) {
            let mut sched = Scheduler::new();
            let mut counts = (0u64, 0u64);
            for &n in chunks {
                sched.run_for(
                    n,
                    &mut counts,
                    |c: &mut (u64, u64)| {
                        c.0 += 1;
                        2
                    },
                    |c: &mut (u64, u64)| {
                        c.1 += 1;
                        1
                    },
                );
            }
            counts
        }

        assert_eq!(drive(&[1000]), drive(&[300, 300, 400]));
        assert_eq!(drive(&[1000]), drive(&[1, 999]));
    }
}
