//! Pareto dominance and NSGA-II crowding distance over the four delegation
//! objectives (trust, latency, cost, capability), all normalized to [0,1]
//! with higher always better.

/// Default tie-break weights when crowding distance alone cannot separate
/// two boundary-equal candidates.
pub const DEFAULT_WEIGHTS: Weights = Weights { trust: 0.4, latency: 0.25, cost: 0.15, capability: 0.2 };

#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub trust: f64,
    pub latency: f64,
    pub cost: f64,
    pub capability: f64,
}

/// One candidate's objective vector, all components in [0,1], higher better.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Objectives {
    pub trust: f64,
    pub latency: f64,
    pub cost: f64,
    pub capability: f64,
}

impl Objectives {
    fn as_array(&self) -> [f64; 4] {
        [self.trust, self.latency, self.cost, self.capability]
    }

    pub fn weighted_sum(&self, w: &Weights) -> f64 {
        self.trust * w.trust + self.latency * w.latency + self.cost * w.cost + self.capability * w.capability
    }
}

/// `a` dominates `b` iff `a` is ≥ `b` on every objective and > on at least
/// one.
pub fn dominates(a: &Objectives, b: &Objectives) -> bool {
    let (a, b) = (a.as_array(), b.as_array());
    let mut strictly_better = false;
    for i in 0..a.len() {
        if a[i] < b[i] {
            return false;
        }
        if a[i] > b[i] {
            strictly_better = true;
        }
    }
    strictly_better
}

/// Indices of the non-dominated front within `candidates`.
pub fn pareto_front(candidates: &[Objectives]) -> Vec<usize> {
    let mut front = Vec::new();
    for (i, a) in candidates.iter().enumerate() {
        let dominated = candidates.iter().enumerate().any(|(j, b)| i != j && dominates(b, a));
        if !dominated {
            front.push(i);
        }
    }
    front
}

/// NSGA-II crowding distance over `front` (indices into `candidates`).
/// Boundary members on any objective get `f64::INFINITY`.
pub fn crowding_distance(candidates: &[Objectives], front: &[usize]) -> Vec<f64> {
    let n = front.len();
    if n == 0 {
        return Vec::new();
    }
    if n <= 2 {
        return vec![f64::INFINITY; n];
    }

    let mut distance = vec![0.0; n];
    for obj_idx in 0..4 {
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            let va = candidates[front[a]].as_array()[obj_idx];
            let vb = candidates[front[b]].as_array()[obj_idx];
            va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
        });

        distance[order[0]] = f64::INFINITY;
        distance[order[n - 1]] = f64::INFINITY;

        let min_val = candidates[front[order[0]]].as_array()[obj_idx];
        let max_val = candidates[front[order[n - 1]]].as_array()[obj_idx];
        let span = max_val - min_val;
        if span <= f64::EPSILON {
            continue;
        }

        for k in 1..n - 1 {
            if distance[order[k]].is_infinite() {
                continue;
            }
            let prev = candidates[front[order[k - 1]]].as_array()[obj_idx];
            let next = candidates[front[order[k + 1]]].as_array()[obj_idx];
            distance[order[k]] += (next - prev) / span;
        }
    }
    distance
}

/// Select one candidate index from the full set via the Pareto-crowding
/// strategy: compute the front, then either return its sole member, or
/// break ties by crowding distance (largest wins — most isolated, so most
/// exploratory), falling back to the weighted sum when distances tie.
pub fn select_crowding(candidates: &[Objectives], weights: &Weights) -> Option<usize> {
    if candidates.is_empty() {
        return None;
    }
    let front = pareto_front(candidates);
    if front.len() == 1 {
        return Some(front[0]);
    }
    let distances = crowding_distance(candidates, &front);

    let mut best_local = 0;
    for k in 1..front.len() {
        let better = distances[k] > distances[best_local]
            || (distances[k] == distances[best_local]
                && candidates[front[k]].weighted_sum(weights) > candidates[front[best_local]].weighted_sum(weights));
        if better {
            best_local = k;
        }
    }
    Some(front[best_local])
}

/// Select via plain weighted sum over the whole candidate set (no Pareto
/// filtering first) — used by the `pareto_weighted` strategy.
pub fn select_weighted(candidates: &[Objectives], weights: &Weights) -> Option<usize> {
    candidates
        .iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.weighted_sum(weights).partial_cmp(&b.weighted_sum(weights)).unwrap())
        .map(|(i, _)| i)
}

#[cfg(test)]
mod tests {
    use super::*;

    // S2 — four peers with objective vectors (trust, latency, cost,
    // capability): A=(0.9,0.2,0.5,1), B=(0.5,0.9,0.5,1), C=(0.4,0.4,0.4,1),
    // D=(0.8,0.9,0.6,1). A holds the unique maximum trust so dominance
    // alone can't drop it from the front; the front is {A, D} and D wins
    // selection via the weighted-sum tie-break, not via dominance.
    fn scenario_s2() -> Vec<Objectives> {
        vec![
            Objectives { trust: 0.9, latency: 0.2, cost: 0.5, capability: 1.0 }, // A
            Objectives { trust: 0.5, latency: 0.9, cost: 0.5, capability: 1.0 }, // B
            Objectives { trust: 0.4, latency: 0.4, cost: 0.4, capability: 1.0 }, // C
            Objectives { trust: 0.8, latency: 0.9, cost: 0.6, capability: 1.0 }, // D
        ]
    }

    #[test]
    fn s2_front_is_a_and_d() {
        let candidates = scenario_s2();
        let front = pareto_front(&candidates);
        assert_eq!(front, vec![0, 3]);
    }

    #[test]
    fn s2_c_is_dominated_by_a_b_and_d() {
        let candidates = scenario_s2();
        assert!(dominates(&candidates[0], &candidates[2]));
        assert!(dominates(&candidates[1], &candidates[2]));
        assert!(dominates(&candidates[3], &candidates[2]));
    }

    #[test]
    fn select_crowding_breaks_front_tie_on_weighted_sum() {
        // Front is {A, D}; a two-member front gets infinite crowding
        // distance on both sides, so the weighted-sum tie-break decides —
        // D's higher latency/cost/capability weighted sum beats A's.
        let candidates = scenario_s2();
        let selected = select_crowding(&candidates, &DEFAULT_WEIGHTS).unwrap();
        assert_eq!(selected, 3);
    }

    #[test]
    fn boundary_members_get_infinite_crowding_distance() {
        let candidates = vec![
            Objectives { trust: 0.1, latency: 0.5, cost: 0.5, capability: 0.5 },
            Objectives { trust: 0.5, latency: 0.5, cost: 0.5, capability: 0.5 },
            Objectives { trust: 0.9, latency: 0.5, cost: 0.5, capability: 0.5 },
        ];
        // All three are mutually non-dominated on a single varying axis here
        // since trust differs while the rest tie — the middle one is not a
        // boundary member on the trust axis.
        let front = pareto_front(&candidates);
        let distances = crowding_distance(&candidates, &front);
        let front_of_idx1 = front.iter().position(|&i| i == 1);
        if let Some(pos) = front_of_idx1 {
            assert!(distances[pos].is_finite());
        }
    }

    #[test]
    fn selected_candidate_is_always_non_dominated() {
        let candidates = scenario_s2();
        let selected = select_crowding(&candidates, &DEFAULT_WEIGHTS).unwrap();
        let front = pareto_front(&candidates);
        assert!(front.contains(&selected));
    }
}
