//! Batch evaluator: resolves the accelerator capability once, then routes every
//! batch to the accelerator or the CPU reference path.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        mpsc, Arc, Mutex, PoisonError,
    },
    thread,
    time::Duration,
};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::accelerator::{
    Accelerator, AcceleratorCapability, AcceleratorError, AcceleratorInitError,
    AcceleratorSettings, TensorShape,
};
use crate::batch::{evaluate_cpu, pack_rows, AcceleratorRow, DimsPair, ValidationError};
use crate::wire::{EngineStatus, SdfRequest, SdfResponse};
use crate::Scalar;

type Reply = Result<Vec<Scalar>, AcceleratorError>;

struct Job {
    rows: Vec<AcceleratorRow>,
    reply: mpsc::Sender<Reply>,
}

/// Owns the accelerator on its own thread so calls are serialized and can be
/// abandoned after a timeout.
///
/// At most one job is ever queued or running. `in_flight` is raised by the
/// caller before a job is sent and lowered by the worker before it replies, so
/// a caller holding `turn` that finds it raised knows a timed-out job is still
/// occupying the device.
struct AcceleratorWorker {
    jobs: mpsc::SyncSender<Job>,
    turn: Mutex<()>,
    in_flight: Arc<AtomicBool>,
    timeout: Duration,
    label: String,
}

impl AcceleratorWorker {
    fn spawn(
        mut accelerator: Box<dyn Accelerator>,
        timeout: Duration,
    ) -> Result<Self, AcceleratorInitError> {
        let label = accelerator.label().to_owned();
        let (jobs, queue) = mpsc::sync_channel::<Job>(1);
        let in_flight = Arc::new(AtomicBool::new(false));
        let worker_in_flight = Arc::clone(&in_flight);
        thread::Builder::new()
            .name("sdf-accelerator".into())
            .spawn(move || {
                while let Ok(job) = queue.recv() {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| accelerator.invoke(&job.rows)))
                            .unwrap_or_else(|payload| {
                                Err(AcceleratorError::Panicked(panic_message(payload.as_ref())))
                            });
                    worker_in_flight.store(false, Ordering::Release);
                    // The caller may have given up after a timeout.
                    let _ = job.reply.send(outcome);
                }
            })
            .map_err(AcceleratorInitError::Worker)?;
        Ok(Self {
            jobs,
            turn: Mutex::new(()),
            in_flight,
            timeout,
            label,
        })
    }

    fn invoke(&self, rows: Vec<AcceleratorRow>) -> Reply {
        let expected = rows.len();
        let _turn = self.turn.lock().unwrap_or_else(PoisonError::into_inner);
        if self.in_flight.load(Ordering::Acquire) {
            return Err(AcceleratorError::Stalled);
        }

        let (reply, answer) = mpsc::channel();
        self.in_flight.store(true, Ordering::Release);
        if let Err(err) = self.jobs.try_send(Job { rows, reply }) {
            self.in_flight.store(false, Ordering::Release);
            return Err(match err {
                mpsc::TrySendError::Full(_) => AcceleratorError::Stalled,
                mpsc::TrySendError::Disconnected(_) => AcceleratorError::WorkerUnavailable,
            });
        }

        let values = match answer.recv_timeout(self.timeout) {
            Ok(outcome) => outcome?,
            Err(mpsc::RecvTimeoutError::Timeout) => {
                return Err(AcceleratorError::Timeout(self.timeout))
            }
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                return Err(AcceleratorError::WorkerUnavailable)
            }
        };
        if values.len() != expected {
            return Err(AcceleratorError::ShapeMismatch {
                expected,
                actual: values.len(),
            });
        }
        Ok(values)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_owned()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// The two evaluation paths, chosen once at startup.
enum ComputeBackend {
    Cpu,
    Accelerated(AcceleratorWorker),
}

impl ComputeBackend {
    fn invoke_batch(&self, positions: &[[Scalar; 3]], dims: DimsPair) -> Reply {
        match self {
            ComputeBackend::Cpu => Ok(evaluate_cpu(positions, dims)),
            ComputeBackend::Accelerated(worker) => worker.invoke(pack_rows(positions, dims)),
        }
    }

    fn label(&self) -> &str {
        match self {
            ComputeBackend::Cpu => "cpu",
            ComputeBackend::Accelerated(worker) => &worker.label,
        }
    }
}

/// Per-path batch counters.
#[derive(Debug, Default)]
pub struct EvaluatorStats {
    accelerated: AtomicU64,
    cpu: AtomicU64,
    fallbacks: AtomicU64,
}

/// Point-in-time copy of [`EvaluatorStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub accelerated_batches: u64,
    pub cpu_batches: u64,
    pub fallbacks: u64,
}

impl EvaluatorStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            accelerated_batches: self.accelerated.load(Ordering::Relaxed),
            cpu_batches: self.cpu.load(Ordering::Relaxed),
            fallbacks: self.fallbacks.load(Ordering::Relaxed),
        }
    }
}

/// Batched lattice SDF evaluation with transparent accelerator fallback.
pub struct BatchEvaluator {
    capability: AcceleratorCapability,
    backend: ComputeBackend,
    stats: EvaluatorStats,
}

impl BatchEvaluator {
    /// Evaluator that never touches an accelerator.
    pub fn cpu_only() -> Self {
        Self {
            capability: AcceleratorCapability::NotRequested,
            backend: ComputeBackend::Cpu,
            stats: EvaluatorStats::default(),
        }
    }

    /// Resolves the capability exactly once.
    ///
    /// `probe` runs only when acceleration was requested. Any probe failure,
    /// a shape the lattice rows do not fit, or a worker that cannot start
    /// leaves the evaluator on the CPU path for its whole lifetime.
    pub fn initialize<P>(settings: &AcceleratorSettings, probe: P) -> Self
    where
        P: FnOnce(&AcceleratorSettings) -> Result<Box<dyn Accelerator>, AcceleratorInitError>,
    {
        if !settings.requested {
            info!("accelerator not requested; using CPU evaluation");
            return Self::cpu_only();
        }

        match Self::start_accelerator(settings, probe) {
            Ok(worker) => {
                info!(device = %worker.label, timeout = ?worker.timeout, "accelerator available");
                Self {
                    capability: AcceleratorCapability::Available,
                    backend: ComputeBackend::Accelerated(worker),
                    stats: EvaluatorStats::default(),
                }
            }
            Err(err) => {
                warn!(error = %err, "accelerator unavailable; falling back to CPU evaluation");
                Self {
                    capability: AcceleratorCapability::Unavailable,
                    backend: ComputeBackend::Cpu,
                    stats: EvaluatorStats::default(),
                }
            }
        }
    }

    fn start_accelerator<P>(
        settings: &AcceleratorSettings,
        probe: P,
    ) -> Result<AcceleratorWorker, AcceleratorInitError>
    where
        P: FnOnce(&AcceleratorSettings) -> Result<Box<dyn Accelerator>, AcceleratorInitError>,
    {
        let accelerator = probe(settings)?;
        let shape = accelerator.shape();
        if shape != TensorShape::LATTICE {
            return Err(AcceleratorInitError::ShapeMismatch {
                expected: TensorShape::LATTICE,
                actual: shape,
            });
        }
        AcceleratorWorker::spawn(accelerator, settings.timeout)
    }

    pub fn capability(&self) -> AcceleratorCapability {
        self.capability
    }

    pub fn is_accelerated(&self) -> bool {
        self.capability == AcceleratorCapability::Available
    }

    pub fn backend_label(&self) -> &str {
        self.backend.label()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            accelerator_available: self.is_accelerated(),
            capability: self.capability,
            backend: self.backend_label().to_owned(),
            stats: self.stats(),
        }
    }

    /// Evaluates one distance per position, aligned with the input order.
    ///
    /// Fails only on invalid periods. Accelerator faults are logged and the
    /// batch is recomputed on the CPU.
    pub fn evaluate(
        &self,
        positions: &[[Scalar; 3]],
        dims: [Scalar; 2],
    ) -> Result<Vec<Scalar>, ValidationError> {
        let dims = DimsPair::new(dims)?;
        Ok(self.evaluate_validated(positions, dims))
    }

    /// Same as [`BatchEvaluator::evaluate`] for already validated periods.
    pub fn evaluate_validated(&self, positions: &[[Scalar; 3]], dims: DimsPair) -> Vec<Scalar> {
        if positions.is_empty() {
            return Vec::new();
        }

        match self.backend.invoke_batch(positions, dims) {
            Ok(values) => {
                let counter = match self.backend {
                    ComputeBackend::Cpu => &self.stats.cpu,
                    ComputeBackend::Accelerated(_) => &self.stats.accelerated,
                };
                counter.fetch_add(1, Ordering::Relaxed);
                debug!(batch = positions.len(), backend = self.backend_label(), "batch evaluated");
                values
            }
            Err(err) => {
                error!(
                    error = %err,
                    batch = positions.len(),
                    "accelerator invocation failed; recomputing batch on CPU"
                );
                self.stats.fallbacks.fetch_add(1, Ordering::Relaxed);
                self.stats.cpu.fetch_add(1, Ordering::Relaxed);
                evaluate_cpu(positions, dims)
            }
        }
    }

    /// Evaluates a decoded request payload.
    pub fn handle(&self, request: &SdfRequest) -> Result<SdfResponse, ValidationError> {
        let sdf_values = self.evaluate(&request.positions, request.dims)?;
        Ok(SdfResponse { sdf_values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::compare;
    use crate::sdf::lattice_distance;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    /// Exact accelerator that counts invocations.
    struct ExactAccelerator {
        calls: Arc<AtomicUsize>,
    }

    impl Accelerator for ExactAccelerator {
        fn label(&self) -> &str {
            "exact-test-device"
        }

        fn invoke(&mut self, rows: &[AcceleratorRow]) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(rows
                .iter()
                .map(|row| lattice_distance(row.position, row.dims))
                .collect())
        }
    }

    /// Returns a fixed sentinel so tests can tell which path answered.
    struct SentinelAccelerator;

    impl Accelerator for SentinelAccelerator {
        fn label(&self) -> &str {
            "sentinel"
        }

        fn invoke(&mut self, rows: &[AcceleratorRow]) -> Reply {
            Ok(vec![42.0; rows.len()])
        }
    }

    enum Fault {
        Error,
        ShortOutput,
        Hang(Duration),
        Panic,
    }

    struct FaultyAccelerator {
        fault: Fault,
        calls: Arc<AtomicUsize>,
    }

    impl Accelerator for FaultyAccelerator {
        fn label(&self) -> &str {
            "faulty"
        }

        fn invoke(&mut self, rows: &[AcceleratorRow]) -> Reply {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.fault {
                Fault::Error => Err(AcceleratorError::Device("bus reset".into())),
                Fault::ShortOutput => Ok(vec![0.0; rows.len().saturating_sub(1)]),
                Fault::Hang(delay) => {
                    thread::sleep(delay);
                    Ok(vec![0.0; rows.len()])
                }
                Fault::Panic => panic!("delegate crashed"),
            }
        }
    }

    struct WideAccelerator;

    impl Accelerator for WideAccelerator {
        fn label(&self) -> &str {
            "wide"
        }

        fn shape(&self) -> TensorShape {
            TensorShape {
                input_width: 6,
                output_width: 1,
            }
        }

        fn invoke(&mut self, rows: &[AcceleratorRow]) -> Reply {
            Ok(vec![0.0; rows.len()])
        }
    }

    fn requested() -> AcceleratorSettings {
        AcceleratorSettings {
            requested: true,
            timeout: Duration::from_millis(500),
            ..Default::default()
        }
    }

    fn random_positions(count: usize, seed: u64) -> Vec<[Scalar; 3]> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        (0..count)
            .map(|_| {
                [
                    rng.gen_range(-12.0..12.0),
                    rng.gen_range(-3.0..3.0),
                    rng.gen_range(-12.0..12.0),
                ]
            })
            .collect()
    }

    fn faulty(fault: Fault) -> (BatchEvaluator, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let evaluator = BatchEvaluator::initialize(&requested(), move |_| {
            Ok(Box::new(FaultyAccelerator {
                fault,
                calls: probe_calls,
            }) as Box<dyn Accelerator>)
        });
        (evaluator, calls)
    }

    #[test]
    fn not_requested_never_probes() {
        let settings = AcceleratorSettings::default();
        let evaluator = BatchEvaluator::initialize(&settings, |_| {
            panic!("probe must not run when acceleration is not requested")
        });
        assert_eq!(evaluator.capability(), AcceleratorCapability::NotRequested);
        assert_eq!(evaluator.backend_label(), "cpu");
    }

    #[test]
    fn failed_probe_is_unavailable_and_uses_cpu() {
        let evaluator = BatchEvaluator::initialize(&requested(), |_| {
            Err(AcceleratorInitError::NoDevice)
        });
        assert_eq!(evaluator.capability(), AcceleratorCapability::Unavailable);
        assert!(!evaluator.is_accelerated());

        let out = evaluator.evaluate(&[[0.0, 0.0, 0.0]], [2.0, 2.0]).unwrap();
        assert!((out[0] + 1.0).abs() <= 1e-6);
        assert_eq!(evaluator.stats().cpu_batches, 1);
    }

    #[test]
    fn mismatched_shape_is_unavailable() {
        let evaluator = BatchEvaluator::initialize(&requested(), |_| {
            Ok(Box::new(WideAccelerator) as Box<dyn Accelerator>)
        });
        assert_eq!(evaluator.capability(), AcceleratorCapability::Unavailable);
    }

    #[test]
    fn available_accelerator_answers_batches() {
        let evaluator = BatchEvaluator::initialize(&requested(), |_| {
            Ok(Box::new(SentinelAccelerator) as Box<dyn Accelerator>)
        });
        assert_eq!(evaluator.capability(), AcceleratorCapability::Available);
        assert_eq!(evaluator.backend_label(), "sentinel");

        let out = evaluator
            .evaluate(&[[0.0, 0.0, 0.0], [5.0, 5.0, 5.0]], [2.0, 2.0])
            .unwrap();
        assert_eq!(out, vec![42.0, 42.0]);
        assert_eq!(evaluator.stats().accelerated_batches, 1);
        assert_eq!(evaluator.stats().fallbacks, 0);
    }

    #[test]
    fn empty_batch_skips_accelerator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let evaluator = BatchEvaluator::initialize(&requested(), move |_| {
            Ok(Box::new(ExactAccelerator { calls: probe_calls }) as Box<dyn Accelerator>)
        });
        let out = evaluator.evaluate(&[], [3.0, 0.5]).unwrap();
        assert!(out.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn validation_runs_before_any_path() {
        let (evaluator, calls) = faulty(Fault::Error);
        let positions = [[0.0, 0.0, 0.0]];
        assert_eq!(
            evaluator.evaluate(&positions, [0.0, 1.0]),
            Err(ValidationError::ZeroPeriod { axis: 0 })
        );
        assert!(matches!(
            evaluator.evaluate(&positions, [Scalar::NAN, 1.0]),
            Err(ValidationError::NonFinitePeriod { axis: 0, .. })
        ));
        assert!(evaluator.evaluate(&[], [1.0, 0.0]).is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn runtime_faults_fall_back_to_cpu() {
        let positions = random_positions(64, 0xFA11);
        let expected = BatchEvaluator::cpu_only()
            .evaluate(&positions, [2.0, 3.0])
            .unwrap();

        for fault in [Fault::Error, Fault::ShortOutput, Fault::Panic] {
            let (evaluator, calls) = faulty(fault);
            let out = evaluator.evaluate(&positions, [2.0, 3.0]).unwrap();
            assert_eq!(out, expected);
            assert_eq!(calls.load(Ordering::SeqCst), 1);
            // Capability is not downgraded by a per-call failure.
            assert_eq!(evaluator.capability(), AcceleratorCapability::Available);
            let stats = evaluator.stats();
            assert_eq!(stats.fallbacks, 1);
            assert_eq!(stats.accelerated_batches, 0);
        }
    }

    #[test]
    fn worker_survives_a_panic() {
        let (evaluator, calls) = faulty(Fault::Panic);
        for _ in 0..3 {
            let out = evaluator.evaluate(&[[1.0, 0.0, 0.0]], [2.0, 2.0]).unwrap();
            assert!(out[0].abs() <= 1e-6);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(evaluator.stats().fallbacks, 3);
    }

    #[test]
    fn hung_accelerator_times_out_to_cpu() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let settings = AcceleratorSettings {
            requested: true,
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let evaluator = BatchEvaluator::initialize(&settings, move |_| {
            Ok(Box::new(FaultyAccelerator {
                fault: Fault::Hang(Duration::from_millis(400)),
                calls: probe_calls,
            }) as Box<dyn Accelerator>)
        });

        let out = evaluator.evaluate(&[[0.0, 0.0, 0.0]], [2.0, 2.0]).unwrap();
        assert!((out[0] + 1.0).abs() <= 1e-6);
        assert_eq!(evaluator.stats().fallbacks, 1);
    }

    #[test]
    fn abandoned_calls_are_not_replayed_on_the_device() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let settings = AcceleratorSettings {
            requested: true,
            timeout: Duration::from_millis(5),
            ..Default::default()
        };
        let evaluator = BatchEvaluator::initialize(&settings, move |_| {
            Ok(Box::new(FaultyAccelerator {
                fault: Fault::Hang(Duration::from_millis(50)),
                calls: probe_calls,
            }) as Box<dyn Accelerator>)
        });

        for _ in 0..20 {
            let out = evaluator.evaluate(&[[1.0, 0.0, 0.0]], [2.0, 2.0]).unwrap();
            assert!(out[0].abs() <= 1e-6);
        }
        assert_eq!(evaluator.stats().fallbacks, 20);

        // Only the first call reached the device; the rest skipped the stalled worker.
        thread::sleep(Duration::from_millis(300));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    /// Hangs on its first call only, then answers exactly.
    struct SlowStartAccelerator {
        calls: Arc<AtomicUsize>,
        first_call: Duration,
    }

    impl Accelerator for SlowStartAccelerator {
        fn label(&self) -> &str {
            "slow-start"
        }

        fn invoke(&mut self, rows: &[AcceleratorRow]) -> Reply {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                thread::sleep(self.first_call);
            }
            Ok(rows
                .iter()
                .map(|row| lattice_distance(row.position, row.dims))
                .collect())
        }
    }

    #[test]
    fn worker_is_used_again_once_the_stalled_call_finishes() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let settings = AcceleratorSettings {
            requested: true,
            timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let evaluator = BatchEvaluator::initialize(&settings, move |_| {
            Ok(Box::new(SlowStartAccelerator {
                calls: probe_calls,
                first_call: Duration::from_millis(80),
            }) as Box<dyn Accelerator>)
        });
        let positions = [[0.0, 0.0, 0.0]];

        evaluator.evaluate(&positions, [2.0, 2.0]).unwrap();
        evaluator.evaluate(&positions, [2.0, 2.0]).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(evaluator.stats().fallbacks, 2);

        thread::sleep(Duration::from_millis(300));
        let out = evaluator.evaluate(&positions, [2.0, 2.0]).unwrap();
        assert!((out[0] + 1.0).abs() <= 1e-6);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        let stats = evaluator.stats();
        assert_eq!(stats.accelerated_batches, 1);
        assert_eq!(stats.fallbacks, 2);
    }

    #[test]
    fn enabling_acceleration_keeps_results_within_tolerance() {
        let positions = random_positions(2048, 0x5EED);
        let dims = [1.75, 2.5];
        let cpu = BatchEvaluator::cpu_only().evaluate(&positions, dims).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let accelerated = BatchEvaluator::initialize(&requested(), move |_| {
            Ok(Box::new(ExactAccelerator { calls: probe_calls }) as Box<dyn Accelerator>)
        });
        let accel = accelerated.evaluate(&positions, dims).unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let report = compare(&cpu, &accel);
        assert!(report.within(crate::PARITY_TOLERANCE), "{report:?}");
    }

    #[test]
    fn concurrent_callers_share_one_evaluator() {
        let calls = Arc::new(AtomicUsize::new(0));
        let probe_calls = Arc::clone(&calls);
        let evaluator = BatchEvaluator::initialize(&requested(), move |_| {
            Ok(Box::new(ExactAccelerator { calls: probe_calls }) as Box<dyn Accelerator>)
        });

        thread::scope(|scope| {
            for seed in 0..8u64 {
                let evaluator = &evaluator;
                scope.spawn(move || {
                    let positions = random_positions(128, seed);
                    let out = evaluator.evaluate(&positions, [2.0, 2.0]).unwrap();
                    assert_eq!(out.len(), positions.len());
                    for (p, d) in positions.iter().zip(out.iter()) {
                        assert_eq!(*d, lattice_distance(*p, [2.0, 2.0]));
                    }
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 8);
        assert_eq!(evaluator.stats().accelerated_batches, 8);
    }

    #[test]
    fn evaluator_is_shareable() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<BatchEvaluator>();
    }

    #[test]
    fn handle_wraps_values_in_response() {
        let request = SdfRequest {
            positions: vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0]],
            dims: [2.0, 2.0],
        };
        let response = BatchEvaluator::cpu_only().handle(&request).unwrap();
        assert_eq!(response.sdf_values.len(), 2);
        assert!((response.sdf_values[0] + 1.0).abs() <= 1e-6);
        assert!(response.sdf_values[1].abs() <= 1e-6);
    }
}
