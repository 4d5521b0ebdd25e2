use std::{collections::HashMap, sync::Mutex, time::Instant};

use once_cell::sync::Lazy;

static SCOPE_INFO: Lazy<Mutex<HashMap<String, ScopeInfo>>> = Lazy::new(|| Mutex::new(HashMap::new()));

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScopeInfo {
    pub count: usize,
    pub micros: u64,
}

pub fn phase_scope<R>(name: &str, f: impl FnOnce() -> R) -> R {
    let start = Instant::now();
    let r = f();
    let elapsed = start.elapsed().as_micros() as u64;

    log::debug!("phase {} took {}us", name, elapsed);

    // A poisoned table only loses timings.
    if let Ok(mut info) = SCOPE_INFO.lock() {
        let entry = info.entry(name.to_string()).or_default();
        entry.count += 1;
        entry.micros += elapsed;
    }

    r
}

/// Snapshot of every phase seen so far, sorted by name.
pub fn scope_report() -> Vec<(String, ScopeInfo)> {
    let Ok(info) = SCOPE_INFO.lock() else {
        return Vec::new();
    };

    let mut report: Vec<_> = info.iter().map(|(name, info)| (name.clone(), *info)).collect();
    report.sort_by(|a, b| a.0.cmp(&b.0));
    report
}
