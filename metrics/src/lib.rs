use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::string::FromUtf8Error;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus: {0}")]
    Prometheus(#[from] prometheus::Error),
    #[error("metrics output is not utf-8: {0}")]
    Encoding(#[from] FromUtf8Error),
}

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    block_processing_results: IntCounterVec,
    chain_height: IntGauge,
    block_queue_jobs: IntGauge,
    block_processing_time: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let block_processing_results = IntCounterVec::new(
            Opts::new("block_processing_results_total", "Blocks run through the acceptance pipeline by outcome"),
            &["result"],
        )?;
        registry.register(Box::new(block_processing_results.clone()))?;

        let chain_height = IntGauge::with_opts(Opts::new("chain_height", "Height of the chain head"))?;
        registry.register(Box::new(chain_height.clone()))?;

        let block_queue_jobs = IntGauge::with_opts(Opts::new("block_queue_jobs", "Jobs waiting in the block queue"))?;
        registry.register(Box::new(block_queue_jobs.clone()))?;

        let block_processing_time = HistogramVec::new(
            HistogramOpts::new("block_processing_time_seconds", "Time taken to process one block")
                .buckets(vec![0.005, 0.01, 0.025, 0.05, 0.1, 1.0]),
            &[],
        )?;
        registry.register(Box::new(block_processing_time.clone()))?;

        Ok(Self {
            registry,
            block_processing_results,
            chain_height,
            block_queue_jobs,
            block_processing_time,
        })
    }

    pub fn record_block_result(&self, result: &str) {
        self.block_processing_results.with_label_values(&[result]).inc();
    }

    pub fn set_chain_height(&self, height: u64) {
        self.chain_height.set(height as i64);
    }

    pub fn set_queue_jobs(&self, jobs: usize) {
        self.block_queue_jobs.set(jobs as i64);
    }

    pub fn observe_processing_time(&self, seconds: f64) {
        self.block_processing_time.with_label_values::<&str>(&[]).observe(seconds);
    }

    pub fn block_results(&self, result: &str) -> u64 {
        self.block_processing_results.with_label_values(&[result]).get()
    }

    pub fn chain_height(&self) -> u64 {
        self.chain_height.get().max(0) as u64
    }

    /// Text exposition of every registered metric.
    pub fn gather(&self) -> Result<String, MetricsError> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::<u8>::new();
        let encoder = TextEncoder::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_records_results_by_label() {
        let metrics = Metrics::new().unwrap();
        metrics.record_block_result("accepted");
        metrics.record_block_result("accepted");
        metrics.record_block_result("rejected");
        assert_eq!(metrics.block_results("accepted"), 2);
        assert_eq!(metrics.block_results("rejected"), 1);
    }

    #[test]
    fn test_gather_exposes_metrics() {
        let metrics = Metrics::new().unwrap();
        metrics.set_chain_height(42);
        metrics.set_queue_jobs(3);
        metrics.observe_processing_time(0.02);
        metrics.record_block_result("accepted");
        let text = metrics.gather().unwrap();
        assert!(text.contains("chain_height 42"));
        assert!(text.contains("block_queue_jobs 3"));
        assert!(text.contains("block_processing_time_seconds_count 1"));
        assert!(text.contains("block_processing_results_total{result=\"accepted\"} 1"));
    }
}
