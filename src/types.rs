use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// One address/port pair considered for probing.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Candidate {
    pub address: IpAddr,
    pub port: u16,
}

impl Candidate {
    /// Returns `None` for port 0, which can never be dialed.
    pub fn new(address: IpAddr, port: u16) -> Option<Self> {
        (port != 0).then_some(Self { address, port })
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }
}

impl fmt::Display for Candidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.socket_addr())
    }
}

/// Location metadata attached to a result. All fields stay empty when the
/// datacenter code is unknown to the geo database.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct GeoInfo {
    pub region: String,
    pub city: String,
    pub region_localized: String,
    pub country: String,
    pub city_localized: String,
    pub flag: String,
}

impl GeoInfo {
    pub fn is_empty(&self) -> bool {
        *self == GeoInfo::default()
    }
}

/// A candidate that passed the connectivity probe.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ProbeResult {
    pub candidate: Candidate,
    pub datacenter: String,
    pub location_code: String,
    pub geo: GeoInfo,
    pub latency: Duration,
}

impl ProbeResult {
    pub fn latency_ms(&self) -> u128 {
        self.latency.as_millis()
    }

    pub fn city_label(&self) -> String {
        crate::geo::city_label(&self.geo.city_localized, &self.geo.city, &self.datacenter)
    }
}

/// A probe survivor that also passed the speed test.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SpeedResult {
    pub probe: ProbeResult,
    /// Measured download rate in kB/s (1 kB = 1024 bytes).
    pub throughput_kbs: f64,
}

impl SpeedResult {
    pub fn throughput_mbs(&self) -> f64 {
        self.throughput_kbs / 1024.0
    }
}

/// Final ordered output of a run. Which variant is produced depends on
/// whether the speed-test stage was active.
#[derive(Debug, Clone, PartialEq)]
pub enum Ranking {
    /// Ascending handshake latency.
    ByLatency(Vec<ProbeResult>),
    /// Descending throughput.
    ByThroughput(Vec<SpeedResult>),
}

impl Ranking {
    pub fn len(&self) -> usize {
        match self {
            Ranking::ByLatency(v) => v.len(),
            Ranking::ByThroughput(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn speed_tested(&self) -> bool {
        matches!(self, Ranking::ByThroughput(_))
    }

    /// Iterate the probe part of every ranked entry, in rank order.
    pub fn probes(&self) -> Box<dyn Iterator<Item = &ProbeResult> + '_> {
        match self {
            Ranking::ByLatency(v) => Box::new(v.iter()),
            Ranking::ByThroughput(v) => Box::new(v.iter().map(|s| &s.probe)),
        }
    }
}

/// Human readable rate: MB/s with two decimals at or above 1 MB/s, else kB/s.
pub fn format_throughput(kbs: f64) -> String {
    let mbs = kbs / 1024.0;
    if mbs >= 1.0 {
        format!("{mbs:.2} MB/s")
    } else {
        format!("{kbs:.0} kB/s")
    }
}
