use criterion::{Criterion, black_box, criterion_group, criterion_main};

use corvid_engine::{Config, Engine};

const FIB: &str = r#"
fun fib(n) {
    if (n < 2) return n;
    return fib(n - 1) + fib(n - 2);
}
fib(20)
"#;

const LOOP: &str = r#"
class Counter { init() { this.n = 0; } bump() { this.n = this.n + 1; } }
var c = Counter();
for (var i = 0; i < 10000; i = i + 1) c.bump();
c.n
"#;

const ARRAYS: &str = r#"
var a = [];
for (var i = 0; i < 2000; i = i + 1) a.push(i * 2);
var total = 0;
for (var i = 0; i < a.len(); i = i + 1) total = total + a[i];
total
"#;

fn quiet_engine() -> Engine {
    Engine::with_config(Config::new().write(|_| {}))
}

fn bench_compile(c: &mut Criterion) {
    c.bench_function("compile_fib", |b| {
        b.iter(|| {
            let mut engine = quiet_engine();
            black_box(engine.compile("main", black_box(FIB)).unwrap());
        })
    });
}

fn bench_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("run");
    for (name, source) in [("fib_20", FIB), ("method_calls", LOOP), ("array_sum", ARRAYS)] {
        group.bench_function(name, |b| {
            let mut engine = quiet_engine();
            b.iter(|| black_box(engine.eval(black_box(source)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_compile, bench_run);
criterion_main!(benches);
