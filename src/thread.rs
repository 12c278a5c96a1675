// Copyright 2022 Matthew Ingwersen.
//
// Licensed under the Apache License, Version 2.0 (the "License"); you
// may not use this file except in compliance with the License. You may
// obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied. See the License for the specific language governing
// permissions and limitations under the License.

//! Thread groups and the request handler pool.

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use log::{error, info};
use slab::Slab;

////////////////////////////////////////////////////////////////////////
// THREAD GROUPS                                                      //
////////////////////////////////////////////////////////////////////////

/// A group of threads managed together.
///
/// A `ThreadGroup` runs one-shot threads ([`ThreadGroup::spawn`]) and
/// respawnable threads ([`ThreadGroup::spawn_respawnable`]). It may
/// also own any number of [`HandlerPool`]s (see
/// [`ThreadGroup::start_handler_pool`]).
///
/// Once [`ThreadGroup::shut_down`] is called, no new threads can be
/// started in the group and respawnable threads are no longer
/// restarted when they exit. Long-running tasks should hold an [`Arc`]
/// to their group and poll [`ThreadGroup::is_shutting_down`] so that
/// [`ThreadGroup::await_shutdown`] can complete.
pub struct ThreadGroup {
    state: Mutex<GroupState>,

    /// Notified when shutdown begins and when the last thread exits.
    /// Used with the `state` mutex.
    wakeup: Condvar,
}

#[derive(Default)]
struct GroupState {
    threads: usize,
    pools: Slab<Arc<HandlerPool>>,
    shutting_down: bool,
}

impl ThreadGroup {
    /// Creates a new thread group.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(GroupState::default()),
            wakeup: Condvar::new(),
        })
    }

    /// Starts a thread in the group that runs `task` once.
    pub fn spawn<F>(self: &Arc<Self>, name: String, task: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Err(Error::ShuttingDown);
        }
        spawn_thread(self, &mut state, name, Body::Once(Box::new(task)))?;
        Ok(())
    }

    /// Starts a thread in the group that runs `task`, starting a new
    /// thread to run it again whenever it returns or panics before the
    /// group shuts down. Restarts are throttled to one per
    /// [`RESPAWN_DELAY`].
    pub fn spawn_respawnable<F>(self: &Arc<Self>, name: String, task: F) -> Result<(), Error>
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Err(Error::ShuttingDown);
        }
        spawn_thread(self, &mut state, name, Body::Repeat(Arc::new(task)))?;
        Ok(())
    }

    /// Shuts down the group, including its [`HandlerPool`]s.
    pub fn shut_down(&self) {
        let mut state = self.state.lock().unwrap();
        state.shutting_down = true;
        for pool in state.pools.drain() {
            pool.close();
        }
        self.wakeup.notify_all();
    }

    /// Waits until shutdown has been initiated and every thread in the
    /// group has exited. Calling this from a thread in the group
    /// deadlocks.
    pub fn await_shutdown(&self) {
        let state = self.state.lock().unwrap();
        let _state = self
            .wakeup
            .wait_while(state, |s| !s.shutting_down || s.threads > 0)
            .unwrap();
    }

    /// Returns whether the group is shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().shutting_down
    }

    /// Returns the number of live threads in the group.
    pub fn thread_count(&self) -> usize {
        self.state.lock().unwrap().threads
    }
}

/// The minimum time between two starts of the same respawnable thread.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(1);

/// What a group thread runs.
enum Body {
    Once(Box<dyn FnOnce() + Send + 'static>),
    Repeat(Arc<dyn Fn() + Send + Sync + 'static>),
}

/// Owned by every group thread and dropped when it exits or panics.
/// Keeps the group's thread count accurate and restarts respawnable
/// threads.
struct Lifecycle {
    group: Arc<ThreadGroup>,
    spawner: ThreadId,
    respawn: Option<(Arc<dyn Fn() + Send + Sync + 'static>, Instant)>,
}

fn spawn_thread(
    group: &Arc<ThreadGroup>,
    state: &mut GroupState,
    name: String,
    body: Body,
) -> io::Result<()> {
    let respawn = match &body {
        Body::Once(_) => None,
        Body::Repeat(task) => Some((task.clone(), Instant::now())),
    };
    let lifecycle = Lifecycle {
        group: group.clone(),
        spawner: thread::current().id(),
        respawn,
    };

    state.threads += 1;
    let result = thread::Builder::new().name(name).spawn(move || {
        match body {
            Body::Once(task) => task(),
            Body::Repeat(task) => task(),
        }
        drop(lifecycle);
    });
    if result.is_err() {
        state.threads -= 1;
    }
    result.map(drop)
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        let current = thread::current();

        // Dropped by the spawner itself: the OS thread never started,
        // and spawn_thread (which holds the state lock) cleans up.
        if current.id() == self.spawner {
            return;
        }

        let name = current.name().unwrap_or("anonymous");
        if thread::panicking() {
            error!("Thread {} panicked", name);
        }

        let mut state = self.group.state.lock().unwrap();
        if let Some((task, started)) = &self.respawn {
            if !state.shutting_down {
                if !thread::panicking() {
                    error!("Thread {} exited prematurely", name);
                }

                // The wait is cut short if shutdown begins.
                let elapsed = started.elapsed();
                if elapsed < RESPAWN_DELAY {
                    let delay = RESPAWN_DELAY - elapsed;
                    info!("Respawn of thread {} delayed by {} ms", name, delay.as_millis());
                    state = self.group.wakeup.wait_timeout(state, delay).unwrap().0;
                }

                if !state.shutting_down {
                    let body = Body::Repeat(task.clone());
                    if let Err(e) = spawn_thread(&self.group, &mut state, name.to_owned(), body) {
                        error!("Respawn of thread {} failed: {}", name, e);
                    }
                }
            }
        }

        state.threads -= 1;
        if state.shutting_down && state.threads == 0 {
            self.group.wakeup.notify_all();
        }
    }
}

////////////////////////////////////////////////////////////////////////
// HANDLER POOLS                                                      //
////////////////////////////////////////////////////////////////////////

/// A pool that runs request handlers.
///
/// Every submitted handler starts immediately. If one of the pool's
/// permanent workers is idle, it runs the handler; otherwise a one-shot
/// auxiliary thread is spawned for it in the parent [`ThreadGroup`].
/// Handlers never wait in line behind each other. A worker whose
/// handler panics is not replaced, so later handlers simply run on
/// auxiliary threads.
///
/// A pool may cap the number of handlers in flight (running or handed
/// to a worker but not yet finished). Submissions beyond the cap fail
/// with [`Error::Saturated`].
///
/// A `HandlerPool` is closed when its [`ThreadGroup`] shuts down, or
/// independently through [`HandlerPool::shut_down`]. Handlers already
/// handed to permanent workers still run.
pub struct HandlerPool {
    group: Arc<ThreadGroup>,
    key: usize,
    name: String,
    max_in_flight: Option<usize>,
    state: Mutex<PoolState>,

    /// Wakes idle permanent workers. Used with the `state` mutex.
    work_ready: Condvar,
}

type Handler = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Handler>,
    idle_workers: usize,
    in_flight: usize,
    auxiliaries_spawned: u64,
    closed: bool,
}

/// Configuration options for a [`HandlerPool`].
#[derive(Clone, Debug)]
pub struct HandlerPoolConfig {
    /// Used to name the pool's threads.
    pub name: String,

    /// The number of permanent worker threads.
    pub workers: usize,

    /// The maximum number of handlers in flight, if limited.
    pub max_in_flight: Option<usize>,
}

impl ThreadGroup {
    /// Starts a new [`HandlerPool`] in this group.
    pub fn start_handler_pool(
        self: &Arc<Self>,
        config: HandlerPoolConfig,
    ) -> Result<Arc<HandlerPool>, Error> {
        let mut state = self.state.lock().unwrap();
        if state.shutting_down {
            return Err(Error::ShuttingDown);
        }

        let entry = state.pools.vacant_entry();
        let pool = Arc::new(HandlerPool {
            group: self.clone(),
            key: entry.key(),
            name: config.name,
            max_in_flight: config.max_in_flight,
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(config.workers),
                idle_workers: 0,
                in_flight: 0,
                auxiliaries_spawned: 0,
                closed: false,
            }),
            work_ready: Condvar::new(),
        });
        entry.insert(pool.clone());

        for i in 0..config.workers {
            let worker_pool = pool.clone();
            let body = Body::Once(Box::new(move || run_worker(&worker_pool)));
            let name = format!("{} worker {}", pool.name, i);
            if let Err(e) = spawn_thread(self, &mut state, name, body) {
                // Workers that did start exit once they see the pool
                // closed.
                pool.close();
                state.pools.remove(pool.key);
                return Err(e.into());
            }
        }
        Ok(pool)
    }
}

impl HandlerPool {
    /// Submits a handler to run right away, on an idle permanent worker
    /// or else on a new auxiliary thread.
    pub fn submit<F>(self: &Arc<Self>, handler: F) -> Result<(), Error>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();
        if state.closed {
            return Err(Error::ShuttingDown);
        }
        if let Some(max) = self.max_in_flight {
            if state.in_flight >= max {
                return Err(Error::Saturated);
            }
        }
        state.in_flight += 1;

        // The guard is dropped with the closure, whether or not the
        // handler ever runs.
        let guard = InFlightGuard(self.clone());
        let handler = move || {
            let _guard = guard;
            handler();
        };

        if state.idle_workers > state.queue.len() {
            state.queue.push_back(Box::new(handler));
            self.work_ready.notify_one();
            Ok(())
        } else {
            let id = state.auxiliaries_spawned;
            state.auxiliaries_spawned += 1;
            drop(state);
            let name = format!("{} auxiliary {}", self.name, id);
            self.group.spawn(name, handler)
        }
    }

    /// Returns the number of handlers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.state.lock().unwrap().in_flight
    }

    /// Shuts down the pool. The parent [`ThreadGroup`] keeps running.
    pub fn shut_down(&self) {
        self.group.state.lock().unwrap().pools.try_remove(self.key);
        self.close();
    }

    /// Returns whether the pool has been shut down.
    pub fn is_shutting_down(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    /// Marks the pool closed and wakes its workers so they can exit.
    /// The caller is responsible for removing the pool from its group.
    fn close(&self) {
        self.state.lock().unwrap().closed = true;
        self.work_ready.notify_all();
    }
}

/// Decrements a pool's in-flight count when dropped.
struct InFlightGuard(Arc<HandlerPool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.state.lock().unwrap().in_flight -= 1;
    }
}

/// The loop run by a [`HandlerPool`]'s permanent workers. Returns once
/// the pool is closed and no handlers are left.
fn run_worker(pool: &HandlerPool) {
    loop {
        let mut state = pool.state.lock().unwrap();
        state.idle_workers += 1;
        state = pool
            .work_ready
            .wait_while(state, |s| s.queue.is_empty() && !s.closed)
            .unwrap();
        state.idle_workers -= 1;
        let handler = match state.queue.pop_front() {
            Some(handler) => handler,
            None => return,
        };
        drop(state);
        handler();
    }
}

////////////////////////////////////////////////////////////////////////
// ERRORS                                                             //
////////////////////////////////////////////////////////////////////////

/// An error type for [`ThreadGroup`] and [`HandlerPool`] operations.
#[derive(Debug)]
pub enum Error {
    /// An OS-level error occurred during the creation of a thread.
    Io(io::Error),

    /// The [`ThreadGroup`] or [`HandlerPool`] is shutting down.
    ShuttingDown,

    /// The [`HandlerPool`] already has its maximum number of handlers
    /// in flight.
    Saturated,
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Io(err) => err.fmt(f),
            Self::ShuttingDown => f.write_str("thread group or pool is shutting down"),
            Self::Saturated => f.write_str("too many handlers in flight"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

////////////////////////////////////////////////////////////////////////
// TESTS                                                              //
////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    fn pool_config(workers: usize, max_in_flight: Option<usize>) -> HandlerPoolConfig {
        HandlerPoolConfig {
            name: "test".to_owned(),
            workers,
            max_in_flight,
        }
    }

    #[test]
    fn await_shutdown_waits_for_threads() {
        let exited = Arc::new(Mutex::new(0));
        let group = ThreadGroup::new();
        for i in 0..2 {
            let exited = exited.clone();
            let group_cloned = group.clone();
            group
                .spawn(format!("poller {}", i), move || {
                    while !group_cloned.is_shutting_down() {
                        thread::sleep(Duration::from_millis(20));
                    }
                    *exited.lock().unwrap() += 1;
                })
                .unwrap();
        }
        group.shut_down();
        group.await_shutdown();
        assert_eq!(*exited.lock().unwrap(), 2);
        assert_eq!(group.thread_count(), 0);
    }

    #[test]
    fn respawnable_threads_respawn() {
        let (tx, rx) = mpsc::channel();
        let tx = Mutex::new(tx);
        let group = ThreadGroup::new();
        group
            .spawn_respawnable("flaky".to_owned(), move || {
                let _ = tx.lock().unwrap().send(());
            })
            .unwrap();
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        rx.recv_timeout(RESPAWN_DELAY * 5).unwrap();
        group.shut_down();
        group.await_shutdown();
    }

    #[test]
    fn thread_group_rejects_new_threads_after_shutdown() {
        let group = ThreadGroup::new();
        group.shut_down();
        assert!(matches!(group.spawn("a".to_owned(), || ()), Err(Error::ShuttingDown)));
        assert!(matches!(
            group.spawn_respawnable("b".to_owned(), || ()),
            Err(Error::ShuttingDown)
        ));
        assert!(matches!(
            group.start_handler_pool(pool_config(1, None)),
            Err(Error::ShuttingDown)
        ));
    }

    #[test]
    fn handler_pool_runs_handlers_concurrently() {
        // Eight handlers that can only finish once all of them have
        // started: with two workers, this requires auxiliary threads.
        const N: usize = 8;
        let barrier = Arc::new(std::sync::Barrier::new(N));
        let (tx, rx) = mpsc::channel();
        let group = ThreadGroup::new();
        let pool = group.start_handler_pool(pool_config(2, None)).unwrap();
        for i in 0..N {
            let barrier = barrier.clone();
            let tx = tx.clone();
            pool.submit(move || {
                barrier.wait();
                tx.send(i).unwrap();
            })
            .unwrap();
        }
        let mut done: Vec<usize> = (0..N)
            .map(|_| rx.recv_timeout(Duration::from_secs(5)).unwrap())
            .collect();
        done.sort_unstable();
        assert_eq!(done, (0..N).collect::<Vec<_>>());
        group.shut_down();
        group.await_shutdown();
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn handler_pool_enforces_max_in_flight() {
        let group = ThreadGroup::new();
        let pool = group.start_handler_pool(pool_config(1, Some(1))).unwrap();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        pool.submit(move || {
            let _ = release_rx.recv();
        })
        .unwrap();
        assert_eq!(pool.in_flight(), 1);
        assert!(matches!(pool.submit(|| ()), Err(Error::Saturated)));

        drop(release_tx);
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.in_flight() > 0 {
            assert!(Instant::now() < deadline, "handler never finished");
            thread::sleep(Duration::from_millis(10));
        }
        pool.submit(|| ()).unwrap();
        group.shut_down();
        group.await_shutdown();
    }

    #[test]
    fn handler_pool_rejects_handlers_after_shutdown() {
        let group = ThreadGroup::new();
        let pool = group.start_handler_pool(pool_config(0, None)).unwrap();
        pool.shut_down();
        assert!(pool.is_shutting_down());
        assert!(matches!(pool.submit(|| ()), Err(Error::ShuttingDown)));
        assert_eq!(pool.in_flight(), 0);
    }

    #[test]
    fn handler_pool_tracking_works() {
        let group = ThreadGroup::new();
        let pool1 = group.start_handler_pool(pool_config(0, None)).unwrap();
        let pool2 = group.start_handler_pool(pool_config(0, None)).unwrap();
        assert_eq!(group.state.lock().unwrap().pools.len(), 2);
        pool1.shut_down();
        assert_eq!(group.state.lock().unwrap().pools.len(), 1);
        group.shut_down();
        assert!(pool2.is_shutting_down());
        assert_eq!(group.state.lock().unwrap().pools.len(), 0);
    }
}
