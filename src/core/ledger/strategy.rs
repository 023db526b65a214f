//! Node scoring for raw resource requests.

use crate::config::AllocationStrategy;
use crate::core::{ResourceKind, ResourceVector};

use super::node_state::NodeResourceState;

/// Utilization the scoring functions steer toward.
pub const TARGET_UTILIZATION: f64 = 0.75;
/// Performance score assumed for nodes without history.
pub const DEFAULT_PERFORMANCE_SCORE: f64 = 0.5;

const BALANCED_KINDS: [ResourceKind; 4] = [
    ResourceKind::Cpu,
    ResourceKind::Memory,
    ResourceKind::Gpu,
    ResourceKind::Network,
];

/// General fitness of `node` for `request`, at least `1.0`.
///
/// Rewards post-allocation utilization near the target, requests that leave
/// the buffer untouched, penalises fragmentation and scales by the node's
/// performance factor when one is known.
#[must_use]
pub fn suitability_score(node: &NodeResourceState, request: &ResourceVector) -> f64 {
    let mut score = 100.0;
    for (kind, amount) in request.requested() {
        if node.total.get(kind) <= 0.0 {
            continue;
        }
        let post = node.utilization_after(kind, request);
        score += (1.0 - (post - TARGET_UTILIZATION).abs()) * 20.0;
        if node.fits_outside_buffer(kind, amount) {
            score += 10.0;
        }
    }
    score -= node.fragmentation() * 10.0;
    if let Some(perf) = &node.performance {
        score *= perf.factor();
    }
    f64::max(score, 1.0)
}

/// Score of `node` under `strategy`; higher is better.
#[must_use]
pub fn strategy_score(strategy: AllocationStrategy, node: &NodeResourceState, request: &ResourceVector) -> f64 {
    match strategy {
        AllocationStrategy::Greedy => {
            node.available.cpu + node.available.memory + node.available.gpu
        }
        AllocationStrategy::Balanced => {
            let utils: Vec<f64> = BALANCED_KINDS
                .iter()
                .map(|k| node.utilization_after(*k, request))
                .collect();
            1.0 / (1.0 + variance(&utils))
        }
        AllocationStrategy::Performance => node
            .performance
            .map_or(DEFAULT_PERFORMANCE_SCORE, |p| p.score()),
        AllocationStrategy::Energy => {
            let mean = (node.utilization_after(ResourceKind::Cpu, request)
                + node.utilization_after(ResourceKind::Memory, request))
                / 2.0;
            1.0 - (mean - TARGET_UTILIZATION).abs()
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::NodePerformance;

    fn node(cpu: f64, memory: f64, gpu: f64) -> NodeResourceState {
        NodeResourceState::new(
            "n".into(),
            ResourceVector {
                cpu,
                memory,
                gpu,
                network: 1000.0,
                ..ResourceVector::default()
            },
            0.1,
        )
    }

    fn cpu_mem(cpu: f64, memory: f64) -> ResourceVector {
        ResourceVector {
            cpu,
            memory,
            ..ResourceVector::default()
        }
    }

    #[test]
    fn variance_of_constant_is_zero() {
        assert!(variance(&[0.5, 0.5, 0.5]).abs() < 1e-12);
        assert!((variance(&[0.0, 1.0]) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn greedy_prefers_most_free_capacity() {
        let small = node(4.0, 16.0, 0.0);
        let big = node(32.0, 128.0, 24.0);
        let req = cpu_mem(1.0, 1.0);
        assert!(
            strategy_score(AllocationStrategy::Greedy, &big, &req)
                > strategy_score(AllocationStrategy::Greedy, &small, &req)
        );
    }

    #[test]
    fn energy_prefers_target_utilization() {
        let mut warm = node(10.0, 10.0, 0.0);
        warm.apply(&cpu_mem(6.0, 6.0));
        let cold = node(10.0, 10.0, 0.0);
        let req = cpu_mem(1.5, 1.5);
        // warm lands at 75%, cold at 15%
        assert!((strategy_score(AllocationStrategy::Energy, &warm, &req) - 1.0).abs() < 1e-9);
        assert!(
            strategy_score(AllocationStrategy::Energy, &cold, &req)
                < strategy_score(AllocationStrategy::Energy, &warm, &req)
        );
    }

    #[test]
    fn performance_uses_history_or_default() {
        let mut proven = node(8.0, 8.0, 0.0);
        proven.performance = Some(NodePerformance {
            completed: 10,
            failed: 0,
            total_execution_ms: 0,
        });
        let unknown = node(8.0, 8.0, 0.0);
        let req = cpu_mem(1.0, 1.0);
        assert!((strategy_score(AllocationStrategy::Performance, &proven, &req) - 1.0).abs() < 1e-9);
        assert!(
            (strategy_score(AllocationStrategy::Performance, &unknown, &req) - DEFAULT_PERFORMANCE_SCORE).abs()
                < 1e-9
        );
    }

    #[test]
    fn suitability_rewards_target_fit_and_buffer() {
        let n = node(10.0, 10.0, 0.0);
        // post utilization 0.75 on both: +20 +10 each
        let req = cpu_mem(7.5, 7.5);
        assert!((suitability_score(&n, &req) - 160.0).abs() < 1e-9);

        let mut flaky = node(10.0, 10.0, 0.0);
        flaky.performance = Some(NodePerformance {
            completed: 0,
            failed: 4,
            total_execution_ms: 0,
        });
        assert!((suitability_score(&flaky, &req) - 80.0).abs() < 1e-9);
    }
}
