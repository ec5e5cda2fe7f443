use criterion::{black_box, criterion_group, criterion_main, Criterion};
use tokio::runtime::Runtime;

use gridstake::{Actor, Engine, GridKind, MemStore, Page};

fn pool_with_grid(rt: &Runtime) -> (Engine, i64) {
    rt.block_on(async {
        let engine = Engine::new(MemStore::new());
        let pool = engine
            .create_pool(1, "Bench Pool", GridKind::Std100, "")
            .await
            .unwrap();
        let grids = engine.grids_for_pool(pool.id, Page::default()).await.unwrap();
        (engine, grids.items[0].id)
    })
}

fn bench_claim_full_board(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();

    c.bench_function("claim_full_board(100)", |b| {
        b.iter(|| {
            let (engine, grid_id) = pool_with_grid(&rt);
            rt.block_on(async {
                for square_id in 0..100 {
                    engine
                        .claim(
                            black_box(grid_id),
                            black_box(square_id),
                            "Bench Player",
                            &Actor::user(square_id as i64 + 1),
                        )
                        .await
                        .unwrap();
                }
            });
        });
    });
}

fn bench_claim_conflict(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, grid_id) = pool_with_grid(&rt);
    rt.block_on(async {
        engine.claim(grid_id, 0, "Holder", &Actor::user(1)).await.unwrap();
    });

    // A claim that loses its guard: the hot path when a popular square fills.
    c.bench_function("claim_conflict", |b| {
        b.iter(|| {
            rt.block_on(async {
                let _ = engine.claim(black_box(grid_id), 0, "Loser", &Actor::user(2)).await;
            });
        });
    });
}

fn bench_board_read(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let (engine, grid_id) = pool_with_grid(&rt);
    rt.block_on(async {
        for square_id in 0..100 {
            engine
                .claim(grid_id, square_id, "Bench Player", &Actor::user(square_id as i64 + 1))
                .await
                .unwrap();
        }
    });

    c.bench_function("squares_for_grid(100)", |b| {
        b.iter(|| {
            rt.block_on(async { engine.squares_for_grid(black_box(grid_id)).await.unwrap() });
        });
    });
}

fn bench_draw(c: &mut Criterion) {
    c.bench_function("draw_generate(10)", |b| {
        b.iter(|| gridstake::Draw::generate(black_box(10)));
    });
}

criterion_group!(
    benches,
    bench_claim_full_board,
    bench_claim_conflict,
    bench_board_read,
    bench_draw,
);
criterion_main!(benches);
