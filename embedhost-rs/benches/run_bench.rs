use criterion::{black_box, criterion_group, criterion_main, Criterion};
use embedhost::lua::LuaRuntime;
use embedhost::{ScriptUnit, Session, SessionConfig};

const SCRIPT: &str = "\
local t = {}
for i = 1, 200 do t[i] = i * i end
local s = 0
for _, v in ipairs(t) do s = s + v end
return s
";

fn make_script(repeats: usize) -> String {
    SCRIPT.repeat(repeats).replacen("return s\n", "", repeats - 1)
}

fn bench_run(c: &mut Criterion) {
    let session = Session::<LuaRuntime>::init(SessionConfig::new().argv(["bench"]))
        .expect("session init");

    let small = make_script(1);
    let large = make_script(20);

    let mut g = c.benchmark_group("run_script");

    let mut unit = ScriptUnit::from_buffer(small.as_str());
    g.bench_function("cached_small", |b| {
        b.iter(|| black_box(session.run_script(&mut unit)))
    });
    g.bench_function("recompiled_small", |b| {
        b.iter(|| {
            unit.invalidate();
            black_box(session.run_script(&mut unit))
        })
    });

    let mut unit = ScriptUnit::from_buffer(large.as_str());
    g.bench_function("cached_large", |b| {
        b.iter(|| black_box(session.run_script(&mut unit)))
    });
    g.bench_function("recompiled_large", |b| {
        b.iter(|| {
            unit.invalidate();
            black_box(session.run_script(&mut unit))
        })
    });

    g.bench_function("run_buffer_small", |b| {
        b.iter(|| black_box(session.run_buffer(black_box(&small))))
    });

    g.finish();
}

criterion_group!(benches, bench_run);
criterion_main!(benches);
