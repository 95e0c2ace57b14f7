use std::collections::BTreeMap;
use std::fmt::Write;
use std::time::{Duration, Instant};

use crate::floating_type_mod::FT;

#[derive(Clone)]
pub struct Counter<T> {
    values: Vec<T>,
    last_start: Instant,
}

impl<T> Counter<T> {
    fn new() -> Self {
        Counter::<T> {
            last_start: Instant::now(),
            values: Vec::new(),
        }
    }

    fn add_value(&mut self, v: T) {
        self.values.push(v);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Counter<FT> {
    pub fn avg(&self) -> FT {
        self.values.iter().cloned().sum::<FT>() / self.values.len() as FT
    }
    pub fn min(&self) -> FT {
        self.values.iter().cloned().fold(FT::INFINITY, FT::min)
    }
    pub fn max(&self) -> FT {
        self.values.iter().cloned().fold(FT::NEG_INFINITY, FT::max)
    }
    pub fn last(&self) -> Option<FT> {
        self.values.last().cloned()
    }
}

impl Counter<Duration> {
    fn begin(&mut self) {
        self.last_start = Instant::now();
    }

    fn end(&mut self) {
        self.values.push(Instant::now() - self.last_start);
    }

    fn end_add_to_last(&mut self) {
        let duration = Instant::now() - self.last_start;
        match self.values.last_mut() {
            Some(last) => *last += duration,
            None => self.values.push(duration),
        }
    }

    pub fn avg(&self) -> Duration {
        if self.values.is_empty() {
            return Duration::ZERO;
        }
        self.sum() / self.values.len() as u32
    }

    pub fn sum(&self) -> Duration {
        self.values.iter().cloned().sum::<Duration>()
    }
}

pub struct ValueCounters {
    counters: BTreeMap<String, Counter<FT>>,
    enabled: bool,
}

impl ValueCounters {
    pub fn new(enabled: bool) -> ValueCounters {
        ValueCounters {
            counters: BTreeMap::new(),
            enabled,
        }
    }

    pub fn add_value(&mut self, id: &str, v: FT) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<FT>::new)
                .add_value(v);
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<FT>> {
        self.counters.get(id)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

/// Wall clock time per labelled phase; disabled counters cost nothing.
pub struct PerformanceCounters {
    counters: BTreeMap<String, Counter<Duration>>,
    enabled: bool,
}

impl PerformanceCounters {
    pub fn new(enabled: bool) -> PerformanceCounters {
        PerformanceCounters {
            counters: BTreeMap::new(),
            enabled,
        }
    }

    pub fn begin(&mut self, id: &str) {
        if self.enabled {
            self.counters
                .entry(id.to_string())
                .or_insert_with(Counter::<Duration>::new)
                .begin();
        }
    }

    pub fn end(&mut self, id: &str) {
        if self.enabled {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.end();
            }
        }
    }

    /// Add the time since `begin` to the last measurement (for phases entered several times per frame).
    pub fn end_add_to_last(&mut self, id: &str) {
        if self.enabled {
            if let Some(counter) = self.counters.get_mut(id) {
                counter.end_add_to_last();
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<&Counter<Duration>> {
        self.counters.get(id)
    }
}

pub fn write_counters(pcounters: &PerformanceCounters, vcounters: &ValueCounters) -> String {
    let mut s = String::new();

    if let Some(step) = pcounters.get("simulation-step") {
        let _ = writeln!(
            s,
            "simulation-time: {:.3}ms over {} frames",
            step.sum().as_secs_f64() * 1000.,
            step.len()
        );
        let _ = writeln!(s);
    }

    for (label, pcounter) in &pcounters.counters {
        let _ = writeln!(s, "{}: avg:{:.4}ms", label, pcounter.avg().as_secs_f64() * 1000.);
    }
    let _ = writeln!(s);

    for (label, vcounter) in &vcounters.counters {
        if vcounter.is_empty() {
            continue;
        }
        let _ = writeln!(
            s,
            "{}: min:{} max:{} avg:{}",
            label,
            vcounter.min(),
            vcounter.max(),
            vcounter.avg()
        );
    }

    s
}
