use criterion::{criterion_group, criterion_main, Criterion};
use std::hint::black_box;
use vauban::composer::conffs_stages;
use vauban::config::VaubanConfig;
use vauban::tree::ImageTree;

/// A single chain of `depth` images, each adding a few configuration steps.
fn deep_definitions(depth: usize) -> String {
    let mut yaml = String::from("configuration:\n  ignore_stage_in_conffs: [step-0-1]\n  always_apply_stage_in_conffs: [sshd]\n");
    for level in 0..depth {
        let indent = "  ".repeat(level);
        yaml.push_str(&format!(
            "{indent}image-{level}:\n{indent}  stages: [step-{level}-0, step-{level}-1, step-{level}-2]\n"
        ));
    }
    yaml
}

fn bench_conffs_stages(c: &mut Criterion) {
    let config = VaubanConfig::from_yaml_str(&deep_definitions(40)).unwrap();
    let tree = ImageTree::from_config(&config).unwrap();
    let leaf = tree.resolve("image-39").unwrap();

    c.bench_function("conffs stages of a deep image", |b| {
        b.iter(|| conffs_stages(black_box(&config.global), &tree, leaf))
    });
}

fn bench_tree_load(c: &mut Criterion) {
    let yaml = deep_definitions(40);
    c.bench_function("image tree from definitions", |b| {
        b.iter(|| {
            let config = VaubanConfig::from_yaml_str(black_box(&yaml)).unwrap();
            ImageTree::from_config(&config).unwrap()
        })
    });
}

criterion_group!(benches, bench_conffs_stages, bench_tree_load);
criterion_main!(benches);
