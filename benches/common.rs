#![allow(dead_code)]

use ecs_jobs::engine::config::SchedulerConfig;
use ecs_jobs::engine::error::ECSResult;
use ecs_jobs::engine::scheduler::Scheduler;
use ecs_jobs::engine::world::World;

pub const AGENTS_SMALL: usize = 10_000;
pub const AGENTS_MED: usize = 100_000;

#[derive(Clone, Copy)]
pub struct Position {
    pub x: f32,
    pub y: f32,
}

#[derive(Clone, Copy)]
pub struct Wealth {
    pub value: f32,
}

#[derive(Clone, Copy)]
pub struct Productivity {
    pub rate: f32,
}

pub fn setup_world(agent_count: usize) -> ECSResult<World> {
    let mut world = World::new();
    for i in 0..agent_count {
        let e = world.create_entity()?;
        world.set(e, Position { x: i as f32, y: 0.0 })?;
        world.set(e, Wealth { value: 100.0 })?;
        world.set(e, Productivity { rate: 1.0 })?;
    }
    Ok(world)
}

pub fn make_scheduler(workers: usize) -> Scheduler {
    Scheduler::new(SchedulerConfig::default().with_worker_threads(workers).with_chunk_size(4096))
        .expect("scheduler")
}
