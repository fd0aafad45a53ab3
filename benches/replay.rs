use criterion::*;
use std::hint::black_box;

use ecs_jobs::engine::access::AccessDescriptor;
use ecs_jobs::engine::commands::CommandBuffer;
use ecs_jobs::engine::job::Job;

mod common;
use common::*;

fn replay_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("replay");
    group.throughput(Throughput::Elements(AGENTS_SMALL as u64));

    group.bench_function("replay_spawn_10k", |b| {
        b.iter_batched(
            || {
                let mut buffer = CommandBuffer::new();
                for i in 0..AGENTS_SMALL {
                    let e = buffer.create();
                    buffer.set_component(e, Wealth { value: i as f32 }).unwrap();
                    buffer.set_component(e, Productivity { rate: 1.0 }).unwrap();
                }
                (setup_world(0).unwrap(), buffer)
            },
            |(mut world, buffer)| {
                black_box(buffer.replay(&mut world).unwrap());
            },
            BatchSize::LargeInput,
        );
    });

    group.bench_function("spawn_in_tick_10k", |b| {
        b.iter_batched(
            || (setup_world(AGENTS_SMALL).unwrap(), make_scheduler(4)),
            |(mut world, mut scheduler)| {
                scheduler
                    .run_with(&mut world, 1.0, |ctx| {
                        let access = AccessDescriptor::builder().read::<Wealth>().build()?;
                        let producer = ctx.schedule(
                            Job::new("split", access, |chunk| {
                                chunk.for_each_read::<Wealth, _>(|row, w| {
                                    let child = row.commands().create();
                                    row.commands().set_component(child, Wealth { value: w.value / 2.0 })
                                })
                            }),
                            &[],
                        )?;
                        ctx.schedule_replay(&[producer])?;
                        Ok(())
                    })
                    .unwrap();
                black_box(world);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

criterion_group!(benches, replay_benchmark);
criterion_main!(benches);
