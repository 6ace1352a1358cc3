// benches/bench_arbitration.rs
use criterion::{black_box, criterion_group, criterion_main, AxisScale, Criterion, PlotConfiguration};
use green_corridor::clock::ManualClock;
use green_corridor::config::EngineConfig;
use green_corridor::control_system::preemption_engine::{ControlRequest, PreemptionEngine};
use green_corridor::data_structures::{AmbulanceId, Severity, SignalId, SignalSite};
use green_corridor::route_engine::signals::SignalRegistry;
use std::sync::Arc;
use std::time::Duration;

const SEVERITIES: [Severity; 4] = [Severity::Low, Severity::Moderate, Severity::High, Severity::Critical];

// Engine with `num_signals` junctions spaced along one avenue.
fn create_engine(num_signals: usize) -> PreemptionEngine {
    let sites = (0..num_signals)
        .map(|i| SignalSite::new(format!("S{}", i), format!("Junction {}", i), 13.0 + i as f64 * 0.001, 80.25))
        .collect();
    let registry = SignalRegistry::new(sites).unwrap();
    PreemptionEngine::with_clock(EngineConfig::default(), registry, Arc::new(ManualClock::new(0))).unwrap()
}

// Requests from `num_ambulances` contenders cycling over every signal.
fn create_requests(num_signals: usize, num_ambulances: usize) -> Vec<ControlRequest> {
    (0..num_signals * 4)
        .map(|i| ControlRequest {
            signal_id: SignalId::new(format!("S{}", i % num_signals)),
            ambulance_id: AmbulanceId::new(format!("AMB-{}", i % num_ambulances)),
            severity: SEVERITIES[i % 4],
            distance_km: Some((i % 15) as f64 / 10.0),
            requested_at: i as u64,
        })
        .collect()
}

fn bench_request_control(c: &mut Criterion) {
    let mut group = c.benchmark_group("request_control");

    group.sample_size(100);
    group.measurement_time(Duration::from_secs(5));
    group.warm_up_time(Duration::from_secs(2));
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &size in [50, 100, 200].iter() {
        group.bench_function(format!("size_{}", size), |b| {
            let engine = create_engine(size);
            let requests = create_requests(size, 8);
            b.iter(|| {
                for req in &requests {
                    black_box(engine.request_control(req.clone()).unwrap());
                }
                for i in 0..8 {
                    engine.complete_trip(&AmbulanceId::new(format!("AMB-{}", i))).unwrap();
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_request_control);
criterion_main!(benches);
