use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use mlflow_iris::datasets::load_iris;
use mlflow_iris::training::{train_test_split, RandomForest};

fn bench_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("forest_fit");
    group.sample_size(10); // Fitting is slow relative to prediction

    let iris = load_iris().unwrap();
    let split = train_test_split(&iris.data, &iris.target, 0.2, 42).unwrap();

    for n_estimators in [10usize, 50, 100].iter() {
        group.bench_with_input(
            BenchmarkId::new("fit", n_estimators),
            n_estimators,
            |b, &n| {
                b.iter(|| {
                    let mut forest = RandomForest::new(n).with_max_depth(6).with_random_state(42);
                    forest.fit(black_box(&split.x_train), black_box(&split.y_train)).unwrap();
                })
            },
        );
    }

    group.finish();
}

fn bench_predict(c: &mut Criterion) {
    let iris = load_iris().unwrap();
    let mut forest = RandomForest::new(100).with_max_depth(6).with_random_state(42);
    forest.fit(&iris.data, &iris.target).unwrap();

    c.bench_function("forest_predict_150", |b| {
        b.iter(|| forest.predict(black_box(&iris.data)).unwrap())
    });
}

criterion_group!(benches, bench_fit, bench_predict);
criterion_main!(benches);
