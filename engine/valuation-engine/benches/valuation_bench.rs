use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rust_decimal::Decimal;
use valuation_engine::pricing::BlackScholesModel;
use valuation_engine::{ContractTerms, EngineConfig, OptionKind, OptionTerms, Position, Tick, ValuationEngine};

fn bench_black_scholes(c: &mut Criterion) {
    let model = BlackScholesModel { spot: 151.0, strike: 150.0, time_to_expiry: 30.0 / 365.0, rate: 0.02, volatility: 0.25 };

    c.bench_function("black_scholes_price_and_greeks", |b| {
        b.iter(|| {
            let model = black_box(model);
            black_box((model.price(OptionKind::Call), model.greeks(OptionKind::Call)))
        })
    });
}

fn bench_tick_fan_out(c: &mut Criterion) {
    let engine = ValuationEngine::new(EngineConfig::default()).unwrap();
    let t0 = Utc.with_ymd_and_hms(2025, 1, 2, 15, 0, 0).unwrap();
    engine.load_instrument("AAPL", ContractTerms::Stock).unwrap();

    // 1000 option positions across 10 portfolios, all reading AAPL
    for strike in 0..50 {
        let instrument_id = format!("AAPL-C{}", 100 + strike * 2);
        engine
            .load_instrument(
                &instrument_id,
                ContractTerms::Option(OptionTerms {
                    underlying_id: "AAPL".to_string(),
                    strike: Decimal::from(100 + strike * 2),
                    expiry: t0 + Duration::days(90),
                    kind: OptionKind::Call,
                    multiplier: Decimal::from(100),
                }),
            )
            .unwrap();
        for n in 0..20 {
            engine
                .register_position(Position::new(
                    format!("{instrument_id}-{n}"),
                    instrument_id.clone(),
                    Decimal::from(n + 1),
                    format!("PF{}", n % 10),
                ))
                .unwrap();
        }
    }

    let mut seconds = 0;
    c.bench_function("tick_fan_out_1000_positions", |b| {
        b.iter(|| {
            seconds += 1;
            let tick = Tick::new("AAPL", Decimal::from(150 + seconds % 7), t0 + Duration::seconds(seconds))
                .with_volatility(0.25);
            black_box(engine.apply_tick(tick)).unwrap();
        })
    });
}

criterion_group!(benches, bench_black_scholes, bench_tick_fan_out);
criterion_main!(benches);
