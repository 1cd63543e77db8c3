use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use filter_builder::envelope;
use filter_builder::{Attribute, CollectionOperator, RowTree, SchemaRegistry, Translator};
use std::hint::black_box;
use std::sync::Arc;

fn declared(rows: &RowTree, class: &str, name: &str) -> Attribute {
    Attribute::Declared(rows.registry().attribute_in(class, name).unwrap().clone())
}

// A filter with `groups` to-many groups, each holding a few comparisons.
fn build_rows(registry: Arc<SchemaRegistry>, groups: usize) -> RowTree {
    let mut rows = RowTree::new(registry, "Epoch").unwrap();
    let root = rows.root();
    rows.set_collection_operator(root, CollectionOperator::And).unwrap();

    for i in 0..groups {
        let label = rows.add_attribute_row(root).unwrap();
        rows.set_childmost_attribute(label, declared(&rows, "Epoch", "epochGroup")).unwrap();
        rows.set_childmost_attribute(label, declared(&rows, "EpochGroup", "label")).unwrap();
        rows.set_attribute_value(label, &format!("group-{}", i)).unwrap();

        let responses = rows.add_attribute_row(root).unwrap();
        rows.set_childmost_attribute(responses, declared(&rows, "Epoch", "responses")).unwrap();
        rows.set_collection_operator(responses, CollectionOperator::Or).unwrap();
        let rate = rows.add_attribute_row(responses).unwrap();
        rows.set_childmost_attribute(rate, declared(&rows, "Response", "samplingRate")).unwrap();
        rows.set_attribute_operator(rate, ">").unwrap();
        rows.set_attribute_value(rate, "1000.5").unwrap();

        let prop = rows.add_attribute_row(root).unwrap();
        rows.set_childmost_attribute(prop, Attribute::ANY_PROPERTY).unwrap();
        rows.set_prop_name(prop, "trial").unwrap();
        rows.set_attribute_value(prop, &i.to_string()).unwrap();
    }
    rows
}

fn benchmark_to_expression(c: &mut Criterion) {
    let registry = Arc::new(SchemaRegistry::with_default_catalog().unwrap());
    let translator = Translator::new(registry.clone());
    let mut group = c.benchmark_group("to_expression_tree");

    for size in [1, 10, 100] {
        let rows = build_rows(registry.clone(), size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &rows, |b, rows| {
            b.iter(|| black_box(translator.to_expression_tree(black_box(rows)).unwrap()))
        });
    }
    group.finish();
}

fn benchmark_to_rows(c: &mut Criterion) {
    let registry = Arc::new(SchemaRegistry::with_default_catalog().unwrap());
    let translator = Translator::new(registry.clone());
    let mut group = c.benchmark_group("to_row_tree");

    for size in [1, 10, 100] {
        let tree = translator.to_expression_tree(&build_rows(registry.clone(), size)).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(size), &tree, |b, tree| {
            b.iter(|| black_box(translator.to_row_tree(black_box(tree)).unwrap()))
        });
    }
    group.finish();
}

fn benchmark_envelope(c: &mut Criterion) {
    let registry = Arc::new(SchemaRegistry::with_default_catalog().unwrap());
    let translator = Translator::new(registry.clone());
    let tree = translator.to_expression_tree(&build_rows(registry, 50)).unwrap();
    let bytes = envelope::write(&tree).unwrap();

    let mut group = c.benchmark_group("envelope");
    group.bench_function("write", |b| b.iter(|| black_box(envelope::write(black_box(&tree)).unwrap())));
    group.bench_function("read", |b| b.iter(|| black_box(envelope::read(black_box(&bytes)).unwrap())));
    group.finish();
}

criterion_group!(benches, benchmark_to_expression, benchmark_to_rows, benchmark_envelope);
criterion_main!(benches);
