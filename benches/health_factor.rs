use criterion::{black_box, criterion_group, criterion_main, Criterion};
use defi_lending_aggregator::{
    models::ActionKind,
    risk::{approximate, approximate_from_liquidity, RiskSnapshot},
    utils::math::{from_units, to_units},
};

fn benchmark_health_factor(c: &mut Criterion) {
    // $10,000 collateral at LT 0.825 against $6,000 of debt
    let snapshot = RiskSnapshot::new(8_250.0, 6_000.0);
    let actions = [
        ActionKind::Supply,
        ActionKind::Withdraw,
        ActionKind::Borrow,
        ActionKind::Repay,
        ActionKind::EnableCollateral,
    ];

    c.bench_function("health_factor_projection", |b| {
        b.iter(|| {
            for kind in actions {
                black_box(snapshot.project(black_box(kind), black_box(3_000.0), black_box(0.825)));
            }
        })
    });

    c.bench_function("health_factor_approximation", |b| {
        b.iter(|| {
            for kind in actions {
                black_box(approximate(black_box(1.4), kind));
            }
            black_box(approximate_from_liquidity(black_box(2_500.0), 0.0, black_box(6_000.0)))
        })
    });

    c.bench_function("amount_unit_conversion", |b| {
        b.iter(|| {
            let raw = from_units(black_box(1_234.567_891), 18);
            black_box(to_units(raw, 18))
        })
    });
}

criterion_group!(benches, benchmark_health_factor);
criterion_main!(benches);
