//! Kinetic priority: a weighted lottery over the queues that currently hold
//! work.
//!
//! Every pick walks the registry in id order, accumulates the priorities of
//! the non-empty queues into cumulative bounds, draws uniformly from
//! `[0, total)` and takes the first queue whose bound exceeds the draw. The
//! bounds are rebuilt on each pick (O(registered queues)), so a queue that
//! drains stops competing immediately. There is no hard starvation bound;
//! each non-empty queue wins with probability `priority / total`.

use std::collections::BTreeMap;
use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use taskman_core::TaskQueueId;

use crate::queue::QueueCore;

/// Index of the entry whose cumulative range contains `draw`.
///
/// `bounds` must be strictly increasing; entry `i` owns
/// `[bounds[i - 1], bounds[i])`.
pub(crate) fn position_for_draw(bounds: &[u32], draw: u32) -> Option<usize> {
    bounds.iter().position(|bound| draw < *bound)
}

/// Pick the next queue to pop from, or `None` when every queue is empty.
///
/// Must be called with the scheduler lock held; `rng` belongs to the
/// scheduler and is only touched under that lock.
pub(crate) fn select_queue<R: Rng>(
    queues: &BTreeMap<TaskQueueId, Arc<QueueCore>>,
    rng: &mut R,
) -> Option<Arc<QueueCore>> {
    let mut bounds = Vec::with_capacity(queues.len());
    let mut candidates = Vec::with_capacity(queues.len());
    let mut total: u32 = 0;
    for queue in queues.values() {
        if queue.is_empty() {
            continue;
        }
        total += u32::from(queue.priority());
        bounds.push(total);
        candidates.push(queue);
    }
    if total == 0 {
        return None;
    }

    let draw = rng.gen_range(0..total);
    let index = position_for_draw(&bounds, draw)?;
    let queue = candidates[index];
    trace!(queue = %queue.id(), draw, total, "queue selected");
    Some(Arc::clone(queue))
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use taskman_core::{Task, TaskExecutionMode, TaskProperties, TaskType, VMType};

    use super::*;
    use crate::queue::TaskQueue;

    const SEED: u64 = 123456;

    fn registry(queues: &[&TaskQueue]) -> BTreeMap<TaskQueueId, Arc<QueueCore>> {
        queues
            .iter()
            .map(|q| (q.id(), Arc::clone(q.core())))
            .collect()
    }

    fn fill(queue: &TaskQueue) {
        let properties =
            TaskProperties::new(queue.task_type(), queue.vm_type(), TaskExecutionMode::Background);
        queue.add_task(Task::create(properties, || {}));
    }

    fn drain(queue: &TaskQueue) {
        while let Some(mut task) = queue.try_pop_task() {
            task.make_invalid();
        }
    }

    #[test]
    fn draw_maps_to_cumulative_ranges() {
        let bounds = [3, 5, 10];
        assert_eq!(position_for_draw(&bounds, 0), Some(0));
        assert_eq!(position_for_draw(&bounds, 2), Some(0));
        assert_eq!(position_for_draw(&bounds, 3), Some(1));
        assert_eq!(position_for_draw(&bounds, 4), Some(1));
        assert_eq!(position_for_draw(&bounds, 5), Some(2));
        assert_eq!(position_for_draw(&bounds, 9), Some(2));
        assert_eq!(position_for_draw(&bounds, 10), None);
    }

    #[test]
    fn empty_queues_never_win() {
        let gc = TaskQueue::new(TaskType::Gc, VMType::StaticVm, 10);
        let jit = TaskQueue::new(TaskType::Jit, VMType::StaticVm, 1);
        fill(&jit);
        let queues = registry(&[&gc, &jit]);
        let mut rng = StdRng::seed_from_u64(SEED);

        for _ in 0..1_000 {
            let picked = select_queue(&queues, &mut rng).unwrap();
            assert_eq!(picked.id(), jit.id());
        }
        drain(&jit);
        assert!(select_queue(&queues, &mut rng).is_none());
    }

    #[test]
    fn picks_converge_to_priority_share() {
        const PICKS: usize = 100_000;
        let gc = TaskQueue::new(TaskType::Gc, VMType::StaticVm, 2);
        let jit = TaskQueue::new(TaskType::Jit, VMType::StaticVm, 8);
        fill(&gc);
        fill(&jit);
        let queues = registry(&[&gc, &jit]);
        let mut rng = StdRng::seed_from_u64(SEED);

        let gc_wins = (0..PICKS)
            .filter(|_| select_queue(&queues, &mut rng).unwrap().id() == gc.id())
            .count();
        let share = gc_wins as f64 / PICKS as f64;
        assert!((share - 0.2).abs() < 0.01, "gc share {share}, expected ~0.2");

        drain(&gc);
        drain(&jit);
    }
}
