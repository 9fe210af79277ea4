//! Startup preloading: push every catalog name through a [SessionCache] before serving requests.
//!
//! The point is to make the factory do its slow work (downloading weights, populating on-disk caches) once up front,
//! whatever the in-memory capacity is.  The default model is requested again at the end so that it is the session
//! left resident.
use std::time::Instant;

use tracing::{info, warn};

use crate::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PreloadStatus {
    Ready,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreloadOutcome {
    pub name: String,
    pub status: PreloadStatus,
}

impl PreloadOutcome {
    pub fn is_ready(&self) -> bool {
        self.status == PreloadStatus::Ready
    }
}

/// What happened to each catalog name, in catalog order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreloadReport {
    pub outcomes: Vec<PreloadOutcome>,
    /// Result of the final request for the default model; `None` if preloading didn't run.
    pub default_outcome: Option<PreloadOutcome>,
}

impl PreloadReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_ready())
            .map(|o| o.name.as_str())
    }

    /// Names which failed, along with why.
    pub fn failed(&self) -> impl Iterator<Item = (&str, &str)> {
        self.outcomes.iter().filter_map(|o| match &o.status {
            PreloadStatus::Failed(why) => Some((o.name.as_str(), why.as_str())),
            PreloadStatus::Ready => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        match &self.default_outcome {
            Some(o) if !o.is_ready() => false,
            _ => self.outcomes.iter().all(PreloadOutcome::is_ready),
        }
    }
}

fn load_one<F: SessionFactory>(cache: &SessionCache<F>, name: &str) -> PreloadOutcome {
    let status = match cache.get_or_create(name) {
        Ok(_) => PreloadStatus::Ready,
        Err(e) => PreloadStatus::Failed(e.to_string()),
    };
    PreloadOutcome {
        name: name.to_string(),
        status,
    }
}

/// Create a session for every catalog name, then make the default the most recently used.
///
/// The default is created last, so that even with room for a single session each name reaches the factory once.
/// Failures are recorded in the report and never stop the pass.
pub fn preload<F: SessionFactory>(cache: &SessionCache<F>) -> PreloadReport {
    let catalog = cache.catalog();
    let default_name = catalog.default_name();
    let started = Instant::now();
    let mut outcomes = Vec::with_capacity(catalog.len());

    info!(
        models = catalog.len(),
        default = default_name,
        "Preloading model sessions"
    );
    // Default last: with a single slot it must not be evicted by a later name and then rebuilt.
    let others = catalog.iter().filter(|n| *n != default_name);
    for name in others.chain(std::iter::once(default_name)) {
        info!(model = name, "Initializing model");
        let outcome = load_one(cache, name);
        if let PreloadStatus::Failed(why) = &outcome.status {
            warn!(model = name, error = %why, "Model failed to preload");
        }
        outcomes.push(outcome);
    }

    // Report in catalog order, whatever order we loaded in.
    let mut report = PreloadReport::default();
    for name in catalog.iter() {
        if let Some(i) = outcomes.iter().position(|o| o.name == name) {
            report.outcomes.push(outcomes.swap_remove(i));
        }
    }

    let default_outcome = load_one(cache, default_name);
    if let PreloadStatus::Failed(why) = &default_outcome.status {
        warn!(model = default_name, error = %why, "Default model is not resident after preload");
    }
    report.default_outcome = Some(default_outcome);

    info!(
        ok = report.succeeded().count(),
        failed = report.failed().count(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Preload finished"
    );
    report
}

/// Run [preload] if `enabled`; otherwise do nothing and sessions get created by the first request that needs them.
pub fn preload_if_enabled<F: SessionFactory>(
    cache: &SessionCache<F>,
    enabled: bool,
) -> PreloadReport {
    if !enabled {
        info!("Preloading disabled; sessions will be created on first use");
        return PreloadReport::default();
    }
    preload(cache)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::io::{Error as IoError, ErrorKind};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// Records every name it is asked for; fails on the names in its broken set.
    struct RecordingFactory {
        calls: Mutex<Vec<String>>,
        broken: HashSet<&'static str>,
    }

    impl SessionFactory for Arc<RecordingFactory> {
        type Handle = String;
        type Error = IoError;

        fn create(&self, name: &str) -> Result<String, IoError> {
            self.calls.lock().unwrap().push(name.to_string());
            if self.broken.contains(name) {
                return Err(IoError::new(ErrorKind::Other, format!("cannot fetch {}", name)));
            }
            Ok(name.to_uppercase())
        }
    }

    fn build_cache(
        names: &[&str],
        default: &str,
        max_sessions: usize,
        broken: &[&'static str],
    ) -> (Arc<RecordingFactory>, SessionCache<Arc<RecordingFactory>>) {
        let factory = Arc::new(RecordingFactory {
            calls: Mutex::new(vec![]),
            broken: broken.iter().copied().collect(),
        });
        let config = SessionCacheConfigBuilder::default()
            .max_sessions(max_sessions)
            .build()
            .unwrap();
        let catalog = Catalog::new(names, default).unwrap();
        (factory.clone(), SessionCache::new(factory, catalog, config))
    }

    fn report_names(report: &PreloadReport) -> Vec<&str> {
        report.outcomes.iter().map(|o| o.name.as_str()).collect()
    }

    #[test]
    fn test_capacity_one_loads_everything_once() {
        let (factory, cache) = build_cache(&["a", "b", "c", "d"], "b", 1, &[]);

        let report = preload(&cache);

        // One call per name; the default goes last so it never has to be recreated.
        let calls = factory.calls.lock().unwrap().clone();
        assert_eq!(calls, vec!["a", "c", "d", "b"]);

        assert_eq!(cache.resident(), vec!["b"]);
        assert!(report.is_clean());
        assert_eq!(
            report.succeeded().collect::<Vec<_>>(),
            vec!["a", "b", "c", "d"]
        );
    }

    #[test]
    fn test_default_resident_when_capacity_allows() {
        let (factory, cache) = build_cache(&["a", "b", "c"], "b", 3, &[]);

        preload(&cache);

        assert_eq!(factory.calls.lock().unwrap().len(), 3);
        assert_eq!(cache.resident(), vec!["b", "c", "a"]);
    }

    #[test]
    fn test_last_name_as_default_needs_no_recreation() {
        let (factory, cache) = build_cache(&["a", "b", "c"], "c", 1, &[]);
        preload(&cache);
        assert_eq!(factory.calls.lock().unwrap().len(), 3);
        assert_eq!(cache.resident(), vec!["c"]);
    }

    #[test]
    fn test_failures_do_not_stop_the_pass() {
        let (factory, cache) = build_cache(&["a", "b", "c"], "a", 2, &["b"]);

        let report = preload(&cache);

        assert_eq!(*factory.calls.lock().unwrap(), vec!["b", "c", "a"]);
        assert!(!report.is_clean());
        assert_eq!(report.succeeded().collect::<Vec<_>>(), vec!["a", "c"]);
        let failed = report.failed().collect::<Vec<_>>();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "b");
        assert!(failed[0].1.contains("cannot fetch b"));
        assert_eq!(cache.resident(), vec!["a", "c"]);
        assert!(report.default_outcome.unwrap().is_ready());
        // Outcomes stay in catalog order.
        let again = preload(&cache);
        assert_eq!(report_names(&again), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_broken_default_is_reported() {
        let (_, cache) = build_cache(&["a", "b"], "a", 1, &["a"]);

        let report = preload(&cache);

        let default_outcome = report.default_outcome.clone().unwrap();
        assert_eq!(default_outcome.name, "a");
        assert!(!default_outcome.is_ready());
        assert!(!report.is_clean());
        assert_eq!(cache.resident(), vec!["b"]);
    }

    #[test]
    fn test_disabled_preload_is_a_no_op() {
        let (factory, cache) = build_cache(&["a", "b"], "a", 1, &[]);

        let report = preload_if_enabled(&cache, false);

        assert_eq!(report, PreloadReport::default());
        assert!(report.is_clean());
        assert!(factory.calls.lock().unwrap().is_empty());
        assert!(cache.is_empty());

        // Lazy creation still works.
        assert_eq!(*cache.get_or_create("b").unwrap(), "B");
    }
}
