use crate::types::{ProbeResult, Ranking, SpeedResult};

/// Fastest first. Equal throughputs keep their incoming order.
pub fn rank_by_throughput(mut results: Vec<SpeedResult>) -> Ranking {
    results.sort_by(|a, b| b.throughput_kbs.total_cmp(&a.throughput_kbs));
    Ranking::ByThroughput(results)
}

/// Lowest handshake latency first. Equal latencies keep their incoming order.
pub fn rank_by_latency(mut results: Vec<ProbeResult>) -> Ranking {
    results.sort_by_key(|r| r.latency);
    Ranking::ByLatency(results)
}
