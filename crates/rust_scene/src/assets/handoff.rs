//! Background to main thread handoff queue
//!
//! Producers push from any thread through a [`HandoffSender`]. The owner
//! drains everything once per frame with [`HandoffQueue::update`], which is
//! the only point where completed work becomes visible to the scene.

use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ecs::Scene;

/// Work queued for the main thread once a background load completes
pub type MainThreadTask = Box<dyn FnOnce(&Rc<Scene>) + Send>;

type Shared<T> = Arc<Mutex<VecDeque<T>>>;

// A producer that panicked mid-push cannot leave the deque inconsistent, so
// poisoning is ignored.
fn lock<T>(items: &Mutex<VecDeque<T>>) -> MutexGuard<'_, VecDeque<T>> {
    items.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Producer side, cloneable and `Send` when `T` is
#[derive(Debug)]
pub struct HandoffSender<T> {
    items: Shared<T>,
}

impl<T> Clone for HandoffSender<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> HandoffSender<T> {
    /// Queue a finished item
    pub fn push(&self, item: T) {
        lock(&self.items).push_back(item);
    }
}

/// Consumer side, owned by the main thread
#[derive(Debug)]
pub struct HandoffQueue<T> {
    items: Shared<T>,
}

impl<T> Default for HandoffQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HandoffQueue<T> {
    /// Empty queue
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(VecDeque::new())),
        }
    }

    /// New producer handle
    pub fn sender(&self) -> HandoffSender<T> {
        HandoffSender {
            items: Arc::clone(&self.items),
        }
    }

    /// Queue an item from the main thread itself
    pub fn push(&self, item: T) {
        lock(&self.items).push_back(item);
    }

    /// Number of items waiting
    pub fn pending(&self) -> usize {
        lock(&self.items).len()
    }

    /// Hand every waiting item to `consume` in arrival order
    ///
    /// The lock is released before `consume` runs, so consumers may push
    /// again; such items wait for the next call.
    pub fn update(&self, mut consume: impl FnMut(T)) -> usize {
        let drained = std::mem::take(&mut *lock(&self.items));
        let count = drained.len();
        for item in drained {
            consume(item);
        }
        if count > 0 {
            log::trace!("Handed off {count} items to the main thread");
        }
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SceneConfig;
    use crate::ecs::Transform;

    #[test]
    fn test_items_arrive_in_order() {
        let queue = HandoffQueue::new();
        let sender = queue.sender();
        sender.push(1);
        sender.push(2);
        queue.push(3);
        assert_eq!(queue.pending(), 3);

        let mut seen = Vec::new();
        assert_eq!(queue.update(|item| seen.push(item)), 3);
        assert_eq!(seen, vec![1, 2, 3]);
        assert_eq!(queue.pending(), 0);
        assert_eq!(queue.update(|_| unreachable!()), 0);
    }

    #[test]
    fn test_background_producers() {
        let queue = HandoffQueue::new();
        let workers: Vec<_> = (0..4)
            .map(|worker| {
                let sender = queue.sender();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        sender.push(worker * 100 + i);
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let mut total = 0;
        queue.update(|_| total += 1);
        assert_eq!(total, 100);
    }

    #[test]
    fn test_tasks_touch_scene_only_on_update() {
        let scene = Scene::new(SceneConfig::default());
        let queue: HandoffQueue<MainThreadTask> = HandoffQueue::new();
        let sender = queue.sender();

        std::thread::spawn(move || {
            sender.push(Box::new(|scene: &Rc<Scene>| {
                scene.create_node().add_component::<Transform>(()).unwrap();
            }));
        })
        .join()
        .unwrap();
        assert_eq!(scene.component_count(), 0);

        queue.update(|task| task(&scene));
        assert_eq!(scene.component_count(), 1);
    }
}
