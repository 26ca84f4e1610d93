// Demo suite for the snapbook runner.
// Usage: snapbook-demo [FILTER] [-p [THREADS]] [-u] [--snapshots DIR] [--out DIR]
//
// SNAPBOOK_DEMO_LATENCY overrides the measured latency, which makes it easy to
// watch a directional metric regress.

use snapbook::unit::UnitResult;
use snapbook::{cli, Direction, RunContext, Suite, Unit, Value};
use std::env;
use std::process::ExitCode;
use std::thread;
use std::time::Duration;

fn pipeline() -> snapbook::Result<Suite> {
    Suite::builder("pipeline")
        .unit(Unit::new("fetch", |t| {
            t.h1("fetch");
            t.tln("fetched: x");
            Ok(Value::from("x"))
        }))
        .unit(Unit::unary("extend", "fetch", |t, fetched| {
            let extended = format!("{}y", fetched.as_str().unwrap_or_default());
            t.tln(&format!("extended: {}", extended));
            Ok(Value::from(extended))
        }))
        .unit(Unit::binary("combine", ["fetch", "extend"], |t, a, b| {
            t.tln(&format!("combined: ({}, {})", a, b));
            Ok(Value::List(vec![a, b]))
        }))
        .build()
}

fn metrics() -> snapbook::Result<Suite> {
    Suite::builder("metrics")
        .unit(Unit::new("latency", |t| {
            let latency = env::var("SNAPBOOK_DEMO_LATENCY")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .unwrap_or(50.0);
            t.h1("latency");
            t.tmetric("latency_ms", latency, 5.0, Some(Direction::Max));
            t.iln(&format!("measured {} ms", latency));
            Ok(Value::from(latency))
        }))
        .unit(Unit::new("squares", |t| {
            let mut total = 0;
            for n in 1..=4i64 {
                let square = t
                    .cache()
                    .get_or_compute("square", &[Value::from(n)], || Value::from(n * n))?;
                total += square.as_i64().unwrap_or_default();
            }
            t.assert_that(total == 30, "sum of squares is 30");
            Ok(Value::from(total))
        }))
        .build()
}

fn writer(label: &'static str) -> impl Fn(&mut RunContext) -> UnitResult + Send + Sync + 'static {
    move |t| {
        let port = t.port()?;
        t.iln(&format!("listening on {}", port));
        thread::sleep(Duration::from_millis(20));
        t.tln(&format!("{} wrote to db", label));
        Ok(Value::Nil)
    }
}

fn storage() -> snapbook::Result<Suite> {
    Suite::builder("storage")
        .setup(|t| {
            t.iln("db ready");
            Ok(())
        })
        .teardown(|t| {
            t.iln("db closed");
            Ok(())
        })
        .unit(Unit::new("writer_a", writer("writer a")).with_locks(["db"]))
        .unit(Unit::new("writer_b", writer("writer b")).with_locks(["db"]))
        .build()
}

fn main() -> ExitCode {
    let suites = match (pipeline(), metrics(), storage()) {
        (Ok(p), Ok(m), Ok(s)) => vec![p, m, s],
        (Err(e), _, _) | (_, Err(e), _) | (_, _, Err(e)) => {
            cli::print_error(e);
            return ExitCode::FAILURE;
        }
    };
    cli::run(suites)
}
