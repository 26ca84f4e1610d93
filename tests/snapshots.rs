// Snapshot comparison, acceptance, metrics, caching and selection through full runs.

mod common;

use common::Workspace;
use snapbook::report::{CaseLog, FailureKind};
use snapbook::snapshot::NO_SNAPSHOT;
use snapbook::{Direction, Outcome, Suite, Unit, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

#[test]
fn accept_mode_writes_baselines() {
    let suite = Suite::builder("greet")
        .unit(Unit::new("hello", |t| {
            t.tln("hello");
            Ok(Value::Nil)
        }))
        .build()
        .unwrap();
    let ws = Workspace::new();

    let first = ws.run(&[suite.clone()], ws.config());
    let unit = first.get("greet/hello").unwrap();
    assert_eq!(unit.outcome, Outcome::Diff);
    assert_eq!(unit.diff.as_deref(), Some(NO_SNAPSHOT));
    assert!(ws.snapshot("greet/hello").is_none());

    let second = ws.accept_all(&[suite.clone()]);
    assert!(second.get("greet/hello").unwrap().accepted);
    assert_eq!(ws.snapshot("greet/hello").as_deref(), Some("hello\n"));

    let third = ws.run(&[suite], ws.config());
    let unit = third.get("greet/hello").unwrap();
    assert_eq!(unit.outcome, Outcome::Ok);
    assert!(!unit.accepted);
}

fn latency_suite(latency: Arc<AtomicU64>) -> Suite {
    Suite::builder("bench")
        .unit(Unit::new("latency", move |t| {
            let value = f64::from_bits(latency.load(Ordering::SeqCst));
            t.tmetric("latency", value, 5.0, Some(Direction::Max));
            Ok(Value::from(value))
        }))
        .build()
        .unwrap()
}

#[test]
fn directional_metric_tolerates_jitter_and_flags_regressions() {
    let ws = Workspace::new();
    ws.write_snapshot("bench/latency", "latency: 50.0\n");
    let latency = Arc::new(AtomicU64::new(52.0f64.to_bits()));
    let suite = latency_suite(latency.clone());

    let report = ws.run(&[suite.clone()], ws.config());
    let unit = report.get("bench/latency").unwrap();
    assert_eq!(unit.outcome, Outcome::Ok);
    assert_eq!(unit.output, "latency: 50.0\n");

    latency.store(80.0f64.to_bits(), Ordering::SeqCst);
    // even accept mode must not bless a regression
    let report = ws.run(&[suite], ws.config().with_accept(true));
    let unit = report.get("bench/latency").unwrap();
    assert_eq!(unit.outcome, Outcome::Fail);
    assert!(unit.failures.contains(&FailureKind::RegressionViolation));
    assert_eq!(unit.output, "latency: 80.0 [REGRESSION: was 50.0]\n");
    assert_eq!(ws.snapshot("bench/latency").as_deref(), Some("latency: 50.0\n"));
}

#[test]
fn recapture_prints_fresh_values() {
    let ws = Workspace::new();
    ws.write_snapshot("bench/latency", "latency: 50.0\n");
    let suite = latency_suite(Arc::new(AtomicU64::new(52.0f64.to_bits())));

    let report = ws.run(&[suite], ws.config().with_recapture(true).with_accept(true));
    let unit = report.get("bench/latency").unwrap();
    assert!(unit.accepted);
    assert_eq!(ws.snapshot("bench/latency").as_deref(), Some("latency: 52.0\n"));
}

#[test]
fn cached_computation_runs_once_across_runs() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let suite = Suite::builder("cached")
        .unit(Unit::new("square", move |t| {
            let value = t.cache().get_or_compute("square", &[Value::from(7)], || {
                counter.fetch_add(1, Ordering::SeqCst);
                Value::from(49)
            })?;
            t.tln(&format!("square: {}", value));
            Ok(value)
        }))
        .build()
        .unwrap();
    let ws = Workspace::new();

    ws.accept_all(&[suite.clone()]);
    let report = ws.run(&[suite.clone()], ws.config());
    assert!(!report.has_failures());
    assert_eq!(calls.load(Ordering::SeqCst), 1);

    ws.run(&[suite], ws.config().with_force_recompute(true));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

fn pair() -> Suite {
    Suite::builder("s")
        .unit(Unit::new("a", |t| {
            t.tln("a");
            Ok(Value::from("x"))
        }))
        .unit(Unit::unary("b", "a", |t, a| {
            t.tln(&format!("got {}", a));
            Ok(Value::Nil)
        }))
        .build()
        .unwrap()
}

#[test]
fn unselected_dependencies_are_read_from_disk() {
    let ws = Workspace::new();
    ws.accept_all(&[pair()]);

    let report = ws.run(&[pair()], ws.config().with_filter(Some("s/b".into())));
    assert_eq!(report.total(), 1);
    assert_eq!(report.get("s/b").unwrap().outcome, Outcome::Ok);

    std::fs::remove_file(ws.output_dir().join("s/a.value.json")).unwrap();
    let report = ws.run(&[pair()], ws.config().with_filter(Some("s/b".into())));
    let unit = report.get("s/b").unwrap();
    assert_eq!(unit.outcome, Outcome::Fail);
    assert_eq!(unit.failures, vec![FailureKind::MissingDependency]);
}

#[test]
fn non_finite_dependency_values_are_read_back_from_disk() {
    let suite = || {
        Suite::builder("f")
            .unit(Unit::new("a", |t| {
                t.tln("a");
                Ok(Value::Float(f64::NAN))
            }))
            .unit(Unit::unary("b", "a", |t, a| {
                let nan = a.as_f64().map_or(false, f64::is_nan);
                t.tln(&format!("nan: {}", nan));
                Ok(Value::Float(f64::NEG_INFINITY))
            }))
            .build()
            .unwrap()
    };
    let ws = Workspace::new();
    ws.accept_all(&[suite()]);

    let report = ws.run(&[suite()], ws.config().with_filter(Some("f/b".into())));
    let unit = report.get("f/b").unwrap();
    assert_eq!(unit.outcome, Outcome::Ok, "{:?}", unit.message);
    assert_eq!(unit.output, "nan: true\n");
    assert_eq!(unit.value, Some(Value::Float(f64::NEG_INFINITY)));
}

#[test]
fn only_failed_reruns_what_did_not_pass() {
    let broken = Arc::new(AtomicBool::new(true));
    let flag = broken.clone();
    let suite = Suite::builder("mixed")
        .unit(Unit::new("good", |t| {
            t.tln("good");
            Ok(Value::Nil)
        }))
        .unit(Unit::new("flaky", move |t| {
            t.tln("flaky");
            if flag.load(Ordering::SeqCst) {
                t.fail("still broken");
            }
            Ok(Value::Nil)
        }))
        .build()
        .unwrap();
    let ws = Workspace::new();

    let first = ws.accept_all(&[suite.clone()]);
    assert_eq!(first.get("mixed/flaky").unwrap().outcome, Outcome::Fail);

    broken.store(false, Ordering::SeqCst);
    let config = ws.config().with_only_failed(true).with_accept(true);
    let second = ws.run(&[suite.clone()], config.clone());
    assert_eq!(second.total(), 1);
    assert_eq!(second.get("mixed/flaky").unwrap().outcome, Outcome::Ok);

    let third = ws.run(&[suite], config);
    assert_eq!(third.total(), 0);

    let cases = CaseLog::load(&ws.output_dir().join("cases.json")).unwrap();
    assert_eq!(cases.cases.len(), 2);
    assert!(cases.cases.values().all(|c| c.outcome == Outcome::Ok));
}
