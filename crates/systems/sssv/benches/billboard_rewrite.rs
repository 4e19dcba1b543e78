use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use recomp_core::Rdram;
use sssv_patches::cache::{compute_identity, IdentityCache, QuadCorners};
use sssv_patches::rewrite::billboard_commands;
use sssv_patches::scene::{sprite_row, Scene, SceneSprite};
use sssv_patches::{BillboardConfig, BillboardControls, BillboardRewriter, RewriteEngine, RewriteSettings};

fn bench_single_rewrite(c: &mut Criterion) {
    let mut group = c.benchmark_group("billboard_single");

    let scene = Scene::default();
    let mut mem = Rdram::extended();
    scene.install(&mut mem);
    let sprite = SceneSprite::new([0, 0, -655_360], 32, 8);

    group.bench_function("rewrite", |b| {
        let mut engine = RewriteEngine::default();
        let mut frame = 0;
        b.iter(|| {
            scene.begin_frame(&mut mem, frame);
            frame += 1;
            let ctx = scene.sprite_context(&mut mem, &sprite);
            black_box(engine.rewrite(&mut mem, &ctx, &BillboardConfig::default()));
        });
    });

    group.bench_function("command_build", |b| {
        b.iter(|| {
            black_box(billboard_commands(
                black_box(0x8CAA),
                0x8090_0000,
                0x8090_0040,
                0x8090_0080,
                0x1234_5678,
            ))
        });
    });

    group.finish();
}

fn bench_frame(c: &mut Criterion) {
    let mut group = c.benchmark_group("billboard_frame");

    for sprite_count in [16, 128, 512].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(sprite_count),
            sprite_count,
            |b, &count| {
                let scene = Scene::default();
                let mut mem = Rdram::extended();
                scene.install(&mut mem);
                let sprites = sprite_row(count);
                let mut rewriter =
                    BillboardRewriter::new(RewriteSettings::default(), BillboardControls::release());
                let mut frame = 0;

                b.iter(|| {
                    scene.begin_frame(&mut mem, frame);
                    frame += 1;
                    for sprite in &sprites {
                        let ctx = scene.sprite_context(&mut mem, sprite);
                        black_box(rewriter.hook_energy_items(&mut mem, &ctx));
                    }
                });
            },
        );
    }

    group.finish();
}

fn bench_identity_cache(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_cache");

    group.bench_function("lookup_and_update", |b| {
        let mut cache = IdentityCache::default();
        let corners = QuadCorners::from_rect(-4, -4, 4, 4);
        let mut i = 0i32;
        b.iter(|| {
            let sig = [i % 64, 0, -10];
            let id = compute_identity(sig[0], sig[1], sig[2], 32, 32, 8, 0x73F1_7C00);
            i = i.wrapping_add(1);
            black_box(cache.lookup_and_update(id, corners, sig));
        });
    });

    group.finish();
}

criterion_group!(benches, bench_single_rewrite, bench_frame, bench_identity_cache);
criterion_main!(benches);
