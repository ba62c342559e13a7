use common::{IdGenerator, OrderId};
use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use domain::{CreateOrderRequest, GoodsId, Money, UserId, plan_shards};
use std::hint::black_box;

fn bench_plan_shards(c: &mut Criterion) {
    let mut group = c.benchmark_group("domain/plan_shards");
    let min = OrderId::new(310_000_000_000_000_000);
    let max = OrderId::new(310_000_000_987_654_321);

    for count in [1_usize, 10, 100] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| plan_shards(black_box(min), black_box(max), count));
        });
    }
    group.finish();
}

fn bench_price_and_amount(c: &mut Criterion) {
    c.bench_function("domain/parse_price_and_multiply", |b| {
        b.iter(|| {
            let price = Money::parse_minor(black_box("1999")).unwrap();
            price.checked_multiply(black_box(3)).unwrap()
        });
    });
}

fn bench_validate_request(c: &mut Criterion) {
    let request = CreateOrderRequest::new(
        GoodsId::new(1001),
        2,
        UserId::new(42),
        "1 Main Street",
        "Alice",
        "5550100",
    );

    c.bench_function("domain/validate_request", |b| {
        b.iter(|| black_box(&request).validate().unwrap());
    });
}

fn bench_next_id(c: &mut Criterion) {
    let generator = IdGenerator::with_machine_id(1).unwrap();

    c.bench_function("common/next_id", |b| {
        b.iter(|| generator.next_id().unwrap());
    });
}

criterion_group!(
    benches,
    bench_plan_shards,
    bench_price_and_amount,
    bench_validate_request,
    bench_next_id
);
criterion_main!(benches);
