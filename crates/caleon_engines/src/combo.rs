#![forbid(unsafe_code)]

use std::collections::{BTreeSet, VecDeque};

use caleon_kernel_contracts::error::HarmonizeError;
use caleon_kernel_contracts::harmonization::{HarmonizationSource, SeedCombo};
use rand::seq::SliceRandom;
use rand::Rng;

/// Per-harmonizer memory of drawn combos.
///
/// Insertion happens only for the combo a successful draw returns, so a failed
/// draw never leaves a phantom entry behind. Once `max_history` is reached the
/// oldest combo is forgotten first. Older combos are also forgotten when they
/// would leave a run without enough unseen combos to finish.
#[derive(Debug, Clone)]
pub struct ComboHistory {
    used: BTreeSet<SeedCombo>,
    order: VecDeque<SeedCombo>,
    max_history: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrawLimits {
    pub logic_set_size: usize,
    pub max_attempts: u32,
}

/// Combos drawn by one harmonize call. Uniqueness is strict inside a run.
#[derive(Debug, Clone, Default)]
pub struct ComboRun {
    drawn: BTreeSet<SeedCombo>,
    cycles: u32,
}

impl ComboRun {
    pub fn new(cycles: u32) -> Self {
        Self {
            drawn: BTreeSet::new(),
            cycles,
        }
    }

    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    pub fn len(&self) -> usize {
        self.drawn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawn.is_empty()
    }

    pub fn contains(&self, combo: &SeedCombo) -> bool {
        self.drawn.contains(combo)
    }

    fn still_needed(&self) -> u128 {
        (self.cycles as u128)
            .saturating_sub(self.drawn.len() as u128)
            .max(1)
    }
}

impl ComboHistory {
    pub fn new(max_history: usize) -> Self {
        Self {
            used: BTreeSet::new(),
            order: VecDeque::new(),
            max_history: max_history.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, combo: &SeedCombo) -> bool {
        self.used.contains(combo)
    }

    /// Iterates drawn combos, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &SeedCombo> {
        self.order.iter()
    }

    /// Draws one philosopher and `logic_set_size` distinct logic seeds that
    /// `run` has not drawn yet and, while the space allows it, that no earlier
    /// run has drawn either.
    ///
    /// Fails only when the catalog cannot supply `run.cycles()` distinct
    /// combos or the run has already used every combo.
    pub fn draw<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        harmonizer: HarmonizationSource,
        philosophers: &[String],
        logic_seeds: &[String],
        limits: DrawLimits,
        run: &mut ComboRun,
    ) -> Result<SeedCombo, HarmonizeError> {
        let philosophers = dedup(philosophers);
        let logic_seeds = dedup(logic_seeds);
        let space = combo_space(philosophers.len(), logic_seeds.len(), limits.logic_set_size);

        if space < run.cycles as u128 || space <= run.len() as u128 {
            return Err(HarmonizeError::ExhaustedSeedSpace {
                harmonizer,
                space,
                used: run.len(),
                attempts: 0,
            });
        }

        self.make_room(&philosophers, &logic_seeds, space, run);

        for _ in 0..limits.max_attempts {
            let Some(philosopher) = philosophers.choose(rng) else {
                break;
            };
            let logic_set: Vec<String> = logic_seeds
                .choose_multiple(rng, limits.logic_set_size)
                .cloned()
                .collect();
            let combo = SeedCombo::new(philosopher.clone(), logic_set);
            if !self.used.contains(&combo) && !run.contains(&combo) {
                return Ok(self.accept(combo, run));
            }
        }

        match self.first_unseen(rng, &philosophers, &logic_seeds, limits.logic_set_size, run) {
            Some(combo) => Ok(self.accept(combo, run)),
            None => Err(HarmonizeError::ExhaustedSeedSpace {
                harmonizer,
                space,
                used: run.len(),
                attempts: limits.max_attempts,
            }),
        }
    }

    fn accept(&mut self, combo: SeedCombo, run: &mut ComboRun) -> SeedCombo {
        run.drawn.insert(combo.clone());
        self.record(combo.clone());
        combo
    }

    fn record(&mut self, combo: SeedCombo) {
        while self.order.len() >= self.max_history {
            if let Some(evicted) = self.order.pop_front() {
                self.used.remove(&evicted);
            }
        }
        self.used.insert(combo.clone());
        self.order.push_back(combo);
    }

    /// Forgets the oldest combos from earlier runs until the current catalog
    /// has enough unseen combos left for the rest of `run`.
    fn make_room(
        &mut self,
        philosophers: &[String],
        logic_seeds: &[String],
        space: u128,
        run: &ComboRun,
    ) {
        let philosopher_ids: BTreeSet<&str> = philosophers.iter().map(String::as_str).collect();
        let logic_ids: BTreeSet<&str> = logic_seeds.iter().map(String::as_str).collect();
        let in_catalog = |c: &SeedCombo| {
            philosopher_ids.contains(c.philosopher.as_str())
                && c.logic_set.iter().all(|l| logic_ids.contains(l.as_str()))
        };

        let mut seen = self
            .used
            .iter()
            .filter(|&c| in_catalog(c) || run.contains(c))
            .count() as u128;
        seen += run.drawn.iter().filter(|c| !self.used.contains(*c)).count() as u128;

        let needed = run.still_needed();
        let mut evicted = 0usize;
        while space.saturating_sub(seen) < needed {
            let Some(oldest) = self.order.front() else {
                break;
            };
            if run.contains(oldest) {
                break;
            }
            if let Some(oldest) = self.order.pop_front() {
                self.used.remove(&oldest);
                if in_catalog(&oldest) {
                    seen = seen.saturating_sub(1);
                }
                evicted += 1;
            }
        }
        if evicted > 0 {
            log::debug!("combo history recycled {evicted} combos from earlier runs");
        }
    }

    /// Walks every logic set in lexicographic order, philosophers shuffled,
    /// and returns the first combo neither this run nor the history holds.
    fn first_unseen<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        philosophers: &[String],
        logic_seeds: &[String],
        set_size: usize,
        run: &ComboRun,
    ) -> Option<SeedCombo> {
        let mut order: Vec<&String> = philosophers.iter().collect();
        order.shuffle(rng);
        for philosopher in order {
            let mut idx: Vec<usize> = (0..set_size).collect();
            loop {
                let logic_set = idx.iter().map(|&i| logic_seeds[i].clone()).collect();
                let combo = SeedCombo::new(philosopher.clone(), logic_set);
                if !self.used.contains(&combo) && !run.contains(&combo) {
                    return Some(combo);
                }
                if !next_combination(&mut idx, logic_seeds.len()) {
                    break;
                }
            }
        }
        None
    }
}

/// Advances `idx` to the next k-subset of `0..n` in lexicographic order.
fn next_combination(idx: &mut [usize], n: usize) -> bool {
    let k = idx.len();
    let mut i = k;
    while i > 0 {
        i -= 1;
        if idx[i] < n - k + i {
            idx[i] += 1;
            for j in i + 1..k {
                idx[j] = idx[j - 1] + 1;
            }
            return true;
        }
    }
    false
}

/// Number of distinct combos: `philosophers * C(logic_seeds, set_size)`, saturating.
pub fn combo_space(philosophers: usize, logic_seeds: usize, set_size: usize) -> u128 {
    if set_size == 0 || set_size > logic_seeds {
        return 0;
    }
    binomial(logic_seeds as u128, set_size as u128)
        .checked_mul(philosophers as u128)
        .unwrap_or(u128::MAX)
}

fn binomial(n: u128, k: u128) -> u128 {
    let k = k.min(n - k);
    let mut acc: u128 = 1;
    for i in 1..=k {
        match acc.checked_mul(n - k + i) {
            Some(v) => acc = v / i,
            None => return u128::MAX,
        }
    }
    acc
}

fn dedup(ids: &[String]) -> Vec<String> {
    ids.iter()
        .filter(|id| !id.trim().is_empty())
        .cloned()
        .collect::<BTreeSet<String>>()
        .into_iter()
        .collect()
}
