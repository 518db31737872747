use crate::Error;
use kube::ResourceExt;
use prometheus::{HistogramVec, IntCounter, IntCounterVec, Registry, histogram_opts, opts};
use tokio::time::Instant;

#[derive(Clone)]
pub struct Metrics {
    pub reconciliations: IntCounter,
    pub failures: IntCounterVec,
    pub reconcile_duration: HistogramVec,
    /// Calls to the web API of a Cryostat, by operation and outcome
    pub remote_calls: IntCounterVec,
    pub remote_call_duration: HistogramVec,
}

impl Default for Metrics {
    fn default() -> Self {
        let reconcile_duration = HistogramVec::new(
            histogram_opts!(
                "cryostat_operator_reconcile_duration_seconds",
                "The duration of reconcile to complete in seconds"
            )
            .buckets(vec![0.01, 0.1, 0.25, 0.5, 1., 5., 15., 60.]),
            &["kind"],
        )
        .unwrap();
        let failures = IntCounterVec::new(
            opts!(
                "cryostat_operator_reconciliation_errors_total",
                "reconciliation errors",
            ),
            &["kind", "instance", "error"],
        )
        .unwrap();
        let reconciliations =
            IntCounter::new("cryostat_operator_reconciliations_total", "reconciliations").unwrap();
        let remote_calls = IntCounterVec::new(
            opts!(
                "cryostat_operator_remote_calls_total",
                "calls made to the Cryostat web API",
            ),
            &["operation", "outcome"],
        )
        .unwrap();
        let remote_call_duration = HistogramVec::new(
            histogram_opts!(
                "cryostat_operator_remote_call_duration_seconds",
                "The duration of calls to the Cryostat web API in seconds"
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.5, 1., 5., 30.]),
            &["operation"],
        )
        .unwrap();
        Metrics {
            reconciliations,
            failures,
            reconcile_duration,
            remote_calls,
            remote_call_duration,
        }
    }
}

impl Metrics {
    /// Register API metrics to start tracking them.
    pub fn register(self, registry: &Registry) -> Result<Self, prometheus::Error> {
        registry.register(Box::new(self.reconcile_duration.clone()))?;
        registry.register(Box::new(self.failures.clone()))?;
        registry.register(Box::new(self.reconciliations.clone()))?;
        registry.register(Box::new(self.remote_calls.clone()))?;
        registry.register(Box::new(self.remote_call_duration.clone()))?;
        Ok(self)
    }

    pub fn reconcile_failure<T: kube::Resource<DynamicType = ()>>(&self, rc: &T, e: &Error) {
        self.failures
            .with_label_values(&[
                T::kind(&()).as_ref(),
                rc.name_any().as_ref(),
                e.metric_label(),
            ])
            .inc()
    }

    pub fn count_and_measure<T: kube::Resource<DynamicType = ()>>(&self) -> ReconcileMeasurer<T> {
        self.reconciliations.inc();
        ReconcileMeasurer {
            start: Instant::now(),
            metric: self.reconcile_duration.clone(),
            _resource_type: std::marker::PhantomData,
        }
    }

    /// Records a finished call to Cryostat, started at `start`
    pub fn remote_call<T>(&self, operation: &str, start: Instant, result: &Result<T, Error>) {
        let outcome = match result {
            Ok(_) => "success",
            Err(Error::RecordingCallFailed(e)) if e.is_status() => "rejected",
            Err(_) => "unreachable",
        };
        self.remote_calls
            .with_label_values(&[operation, outcome])
            .inc();
        self.remote_call_duration
            .with_label_values(&[operation])
            .observe(start.elapsed().as_secs_f64());
    }
}

/// Smart function duration measurer
///
/// Relies on Drop to calculate duration and register the observation in the histogram
pub struct ReconcileMeasurer<T: kube::Resource<DynamicType = ()>> {
    start: Instant,
    metric: HistogramVec,
    _resource_type: std::marker::PhantomData<T>,
}

impl<T: kube::Resource<DynamicType = ()>> Drop for ReconcileMeasurer<T> {
    fn drop(&mut self) {
        #[allow(clippy::cast_precision_loss)]
        let duration = self.start.elapsed().as_millis() as f64 / 1000.0;
        self.metric
            .with_label_values(&[T::kind(&()).as_ref()])
            .observe(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_calls_are_counted_by_outcome() {
        let metrics = Metrics::default();
        let start = Instant::now();

        metrics.remote_call("list-recordings", start, &Ok(()));
        metrics.remote_call("list-recordings", start, &Ok(()));
        metrics.remote_call::<()>(
            "list-recordings",
            start,
            &Err(Error::CryostatNotFound("default".into())),
        );

        let calls = |outcome| {
            metrics
                .remote_calls
                .with_label_values(&["list-recordings", outcome])
                .get()
        };
        assert_eq!(calls("success"), 2);
        assert_eq!(calls("unreachable"), 1);
        assert_eq!(calls("rejected"), 0);
        assert_eq!(
            metrics
                .remote_call_duration
                .with_label_values(&["list-recordings"])
                .get_sample_count(),
            3
        );
    }

    #[test]
    fn all_metrics_register() {
        let registry = Registry::new();
        Metrics::default().register(&registry).unwrap();
        let names: Vec<String> = registry
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        assert!(names.contains(&"cryostat_operator_reconciliations_total".to_string()));
    }
}
