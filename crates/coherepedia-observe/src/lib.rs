//! coherepedia-observe: vendor-neutral observability ABI.
//!
//! The index crates depend only on these traits and event types. Backends
//! (Prometheus, OTLP, a test recorder) live elsewhere.

pub trait Counter: Send + Sync {
    fn inc(&self, v: u64);
}
pub trait Gauge: Send + Sync {
    fn set(&self, v: i64);
}
pub trait Histogram: Send + Sync {
    fn observe(&self, v: f64);
}

pub trait Meter: Send + Sync + 'static {
    fn counter(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter>;
    fn gauge(
        &self,
        name: &'static str,
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge>;
    fn histo(
        &self,
        name: &'static str,
        _buckets: &'static [f64],
        labels: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram>;
    fn emit(&self, evt: IndexEvent);
}

/// A do-nothing meter for tests and users who don't care about telemetry.
#[derive(Clone, Default)]
pub struct NoopMeter;
struct NoopC;
impl Counter for NoopC {
    fn inc(&self, _v: u64) {}
}
struct NoopG;
impl Gauge for NoopG {
    fn set(&self, _v: i64) {}
}
struct NoopH;
impl Histogram for NoopH {
    fn observe(&self, _v: f64) {}
}
impl Meter for NoopMeter {
    fn counter(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Counter> {
        Box::new(NoopC)
    }
    fn gauge(
        &self,
        _n: &'static str,
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Gauge> {
        Box::new(NoopG)
    }
    fn histo(
        &self,
        _n: &'static str,
        _b: &'static [f64],
        _l: &'static [(&'static str, &'static str)],
    ) -> Box<dyn Histogram> {
        Box::new(NoopH)
    }
    fn emit(&self, _e: IndexEvent) {}
}

/// Typed index lifecycle events (vector contents never included).
#[non_exhaustive]
#[derive(Clone, Debug)]
pub enum IndexEvent {
    Build(BuildEvt),
    Search(SearchEvt),
}

#[derive(Clone, Debug)]
pub struct BuildEvt {
    /// Index base name.
    pub index: String,
    pub kind: BuildKind,
}
#[derive(Clone, Debug)]
pub enum BuildKind {
    /// Quantizers trained from a sample
    QuantizersTrained { samples: usize, ms: u32 },
    /// Quantizers loaded from cached files
    QuantizersLoaded,
    /// Periodic insertion progress
    Progress { nodes: u64 },
    /// One dataset shard fully inserted
    ShardDone { shard: u32, rows: u64 },
    /// Degree-bound cleanup finished
    Cleanup { nodes: u64, ms: u32 },
    /// Graph and compressed-vector files finalized
    IndexWritten { nodes: u64, bytes: u64 },
}

#[derive(Clone, Debug)]
pub struct SearchEvt {
    pub kind: SearchKind,
}
#[derive(Clone, Debug)]
pub enum SearchKind {
    /// Graph and compressed vectors mapped and validated
    Opened { nodes: u64, dimension: u32 },
    /// A search returned nothing (empty graph or everything filtered)
    EmptyResult,
}

/// Macros (simple versions). Can be feature-gated if desired.
#[macro_export]
macro_rules! obs_count {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.counter($name, $labels).inc($v as u64);
    }};
}
#[macro_export]
macro_rules! obs_gauge {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.gauge($name, $labels).set($v as i64);
    }};
}
#[macro_export]
macro_rules! obs_hist {
    ($m:expr, $name:expr, $labels:expr, $v:expr) => {{
        $m.histo($name, &[], $labels).observe($v as f64);
    }};
}
#[macro_export]
macro_rules! obs_timed {
    ($m:expr, $name:expr, $labels:expr, $body:block) => {{
        let __t = std::time::Instant::now();
        let __ret = { $body };
        let __ms = __t.elapsed().as_secs_f64() * 1000.0;
        $m.histo($name, &[], $labels).observe(__ms);
        __ret
    }};
}
