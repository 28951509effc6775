// providers/src/creation.rs

//! At-most-once creation shared by sync threads and async tasks.
//!
//! A [`CreationCell`] is empty, being created by exactly one leader, or ready.
//! Everyone else waits on the leader: threads park, tasks register their
//! waker. The leader holds a [`CreationTicket`]; if the ticket is dropped
//! without completing (creator error, panic, or the leading future being
//! cancelled) the cell goes back to empty and every waiter is woken so one of
//! them can take over.
//!
//! A task leader gets a numeric identity that is pushed on a thread-local
//! stack for as long as its creation future is being polled. A resolution
//! that meets a leader which is running on the current thread is nested
//! inside that leader's creation, so it fails with `CircularDependency`
//! instead of waiting on itself.

use crate::error::{Error, Result};

use parking_lot::Mutex;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::future::{poll_fn, Future};
use std::pin::{pin, Pin};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll, Waker};
use std::thread::{self, Thread, ThreadId};

thread_local! {
  static POLLING_LEADERS: RefCell<Vec<u64>> = const { RefCell::new(Vec::new()) };
}

static NEXT_TASK_LEADER: AtomicU64 = AtomicU64::new(1);

/// Marks a task leader as being polled on this thread until dropped.
struct Polling(u64);

impl Polling {
  fn enter(leader: u64) -> Self {
    POLLING_LEADERS.with(|stack| stack.borrow_mut().push(leader));
    Polling(leader)
  }

  fn is_active(leader: u64) -> bool {
    POLLING_LEADERS.with(|stack| stack.borrow().contains(&leader))
  }
}

impl Drop for Polling {
  fn drop(&mut self) {
    POLLING_LEADERS.with(|stack| {
      let mut stack = stack.borrow_mut();
      if let Some(position) = stack.iter().rposition(|leader| *leader == self.0) {
        stack.remove(position);
      }
    });
  }
}

pub(crate) enum Waiter {
  Sync(Thread),
  Async(Waker),
}

impl Waiter {
  fn wake(self) {
    match self {
      Waiter::Sync(thread) => thread.unpark(),
      Waiter::Async(waker) => waker.wake(),
    }
  }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Leader {
  Thread(ThreadId),
  /// `thread` is where the creation future was last polled.
  Task { id: u64, thread: ThreadId },
}

impl Leader {
  /// Whether the current thread is inside this leader's creation right now.
  fn is_running_here(&self) -> bool {
    match *self {
      Leader::Thread(id) => id == thread::current().id(),
      Leader::Task { id, .. } => Polling::is_active(id),
    }
  }
}

enum State<T> {
  Empty,
  Creating {
    leader: Leader,
    waiters: VecDeque<Waiter>,
  },
  Ready(Arc<T>),
}

pub(crate) struct CreationCell<T> {
  state: Mutex<State<T>>,
}

enum Step<T> {
  Done(Arc<T>),
  Wait,
  Lead,
  Cycle,
}

impl<T> Default for CreationCell<T> {
  fn default() -> Self {
    Self {
      state: Mutex::new(State::Empty),
    }
  }
}

impl<T> CreationCell<T> {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn get(&self) -> Option<Arc<T>> {
    match &*self.state.lock() {
      State::Ready(value) => Some(Arc::clone(value)),
      _ => None,
    }
  }

  /// Ready or being created.
  pub(crate) fn is_occupied(&self) -> bool {
    !matches!(*self.state.lock(), State::Empty)
  }

  /// Empties a ready cell. An in-flight creation is left alone.
  pub(crate) fn take(&self) -> Option<Arc<T>> {
    let mut state = self.state.lock();
    match std::mem::replace(&mut *state, State::Empty) {
      State::Ready(value) => Some(value),
      other => {
        *state = other;
        None
      }
    }
  }

  /// Returns the cached value or runs `create` as the single leader.
  pub(crate) async fn get_or_create<F, Fut>(&self, label: impl Fn() -> String, create: F) -> Result<Arc<T>>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<Arc<T>>>,
  {
    let task = NEXT_TASK_LEADER.fetch_add(1, Ordering::Relaxed);
    loop {
      let step = {
        let mut state = self.state.lock();
        match &*state {
          State::Ready(value) => Step::Done(Arc::clone(value)),
          State::Creating { leader, .. } if leader.is_running_here() => Step::Cycle,
          State::Creating { .. } => Step::Wait,
          State::Empty => {
            *state = State::Creating {
              leader: Leader::Task {
                id: task,
                thread: thread::current().id(),
              },
              waiters: VecDeque::new(),
            };
            Step::Lead
          }
        }
      };

      match step {
        Step::Done(value) => {
          tracing::trace!("creation cell hit");
          return Ok(value);
        }
        Step::Cycle => return Err(Error::CircularDependency { provider: label() }),
        Step::Wait => {
          tracing::trace!("waiting for concurrent creation");
          WaitForCreation { cell: self }.await;
        }
        Step::Lead => break,
      }
    }

    let ticket = CreationTicket::new(self);
    let mut creation = pin!(create());
    let value = poll_fn(|cx| {
      let _polling = Polling::enter(task);
      self.record_task_thread(task);
      creation.as_mut().poll(cx)
    })
    .await?;
    ticket.complete(Arc::clone(&value));
    Ok(value)
  }

  fn record_task_thread(&self, task: u64) {
    if let State::Creating {
      leader: Leader::Task { id, thread: polled_on },
      ..
    } = &mut *self.state.lock()
    {
      if *id == task {
        *polled_on = thread::current().id();
      }
    }
  }

  /// Sync counterpart of [`get_or_create`](Self::get_or_create).
  ///
  /// Parks behind a leader on another thread, task leaders included. A task
  /// leader last polled on this thread may be suspended waiting for it, so
  /// that case fails with `AsyncInSync` instead of parking.
  pub(crate) fn get_or_create_sync<F>(&self, label: impl Fn() -> String, create: F) -> Result<Arc<T>>
  where
    F: FnOnce() -> Result<Arc<T>>,
  {
    let current = thread::current();
    loop {
      {
        let mut state = self.state.lock();
        if let State::Empty = &*state {
          *state = State::Creating {
            leader: Leader::Thread(current.id()),
            waiters: VecDeque::new(),
          };
          break;
        }
        match &mut *state {
          State::Ready(value) => return Ok(Arc::clone(value)),
          State::Creating { leader, .. } if leader.is_running_here() => {
            return Err(Error::CircularDependency { provider: label() })
          }
          State::Creating {
            leader: Leader::Task { thread, .. },
            ..
          } if *thread == current.id() => return Err(Error::AsyncInSync { provider: label() }),
          State::Creating { waiters, .. } => waiters.push_back(Waiter::Sync(current.clone())),
          State::Empty => {}
        }
      }
      thread::park();
    }

    let ticket = CreationTicket::new(self);
    let value = create()?;
    ticket.complete(Arc::clone(&value));
    Ok(value)
  }
}

/// Proof of leadership over a cell's creation.
struct CreationTicket<'a, T> {
  cell: &'a CreationCell<T>,
  completed: bool,
}

impl<'a, T> CreationTicket<'a, T> {
  fn new(cell: &'a CreationCell<T>) -> Self {
    Self {
      cell,
      completed: false,
    }
  }

  fn complete(mut self, value: Arc<T>) {
    self.completed = true;
    let waiters = {
      let mut state = self.cell.state.lock();
      match std::mem::replace(&mut *state, State::Ready(value)) {
        State::Creating { waiters, .. } => waiters,
        _ => VecDeque::new(),
      }
    };
    for waiter in waiters {
      waiter.wake();
    }
  }
}

impl<T> Drop for CreationTicket<'_, T> {
  fn drop(&mut self) {
    if self.completed {
      return;
    }
    let waiters = {
      let mut state = self.cell.state.lock();
      match std::mem::replace(&mut *state, State::Empty) {
        State::Creating { waiters, .. } => waiters,
        other => {
          *state = other;
          VecDeque::new()
        }
      }
    };
    tracing::trace!(waiters = waiters.len(), "creation abandoned, cell reset");
    for waiter in waiters {
      waiter.wake();
    }
  }
}

/// Resolves once the cell leaves the `Creating` state.
struct WaitForCreation<'a, T> {
  cell: &'a CreationCell<T>,
}

impl<T> Future for WaitForCreation<'_, T> {
  type Output = ();

  fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let mut state = self.cell.state.lock();
    match &mut *state {
      State::Creating { waiters, .. } => {
        let registered = waiters
          .iter()
          .any(|waiter| matches!(waiter, Waiter::Async(waker) if waker.will_wake(cx.waker())));
        if !registered {
          waiters.push_back(Waiter::Async(cx.waker().clone()));
        }
        Poll::Pending
      }
      _ => Poll::Ready(()),
    }
  }
}
